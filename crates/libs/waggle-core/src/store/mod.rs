//! Low-level storage operations for database and git.
//!
//! All state lives in two places:
//! 1. **SQLite database** (libsql) — primary storage for queries, search,
//!    and atomic updates
//! 2. **Git archive** — content-addressed on-disk tree, one repository at
//!    the storage root, committed per logical operation
//!
//! The database is tuned for many concurrent agents: WAL mode, a 30-second
//! busy timeout, and a 64MB page cache.

use crate::Result;
use libsql::{Builder, Connection};
use std::path::Path;

/// Type alias for database connections.
pub type Db = Connection;

/// Git-tracked archive layout and write paths.
pub mod archive;

/// Per-archive advisory lock with stale detection.
pub mod archive_lock;

/// Git plumbing over git2.
pub mod git_store;

/// LRU cache of open repository handles.
pub mod repo_cache;

/// Embedded migrations, applied in order on startup.
const MIGRATIONS: [&str; 2] = [
    include_str!("../../../../../migrations/001_initial_schema.sql"),
    include_str!("../../../../../migrations/002_tool_metrics.sql"),
];

/// Open (or create) the database at `db_path` and apply migrations.
pub async fn new_db_pool(db_path: &Path) -> Result<Db> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;
    apply_pragmas_and_migrations(&conn).await?;
    Ok(conn)
}

/// Apply concurrency PRAGMAs and the embedded migration batch.
///
/// Safe to call repeatedly; table creation uses IF NOT EXISTS.
pub async fn apply_pragmas_and_migrations(conn: &Connection) -> Result<()> {
    // WAL enables concurrent reads during writes; busy_timeout keeps writers
    // queueing instead of failing under contention.
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;
    let _ = conn.execute("PRAGMA foreign_keys=ON;", ()).await;

    for migration in MIGRATIONS {
        conn.execute_batch(migration).await?;
    }
    Ok(())
}

/// Canonical timestamp format used across the schema.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC instant the way the schema stores it.
pub fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Current UTC time in schema format.
pub fn now_ts() -> String {
    format_ts(chrono::Utc::now())
}

/// Parse a schema timestamp. Values carry no zone marker and are UTC by
/// contract; anything unparseable collapses to the epoch.
pub fn parse_ts(raw: &str) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::parse_from_str(raw, TS_FORMAT).unwrap_or_default()
}

/// Parse a nullable schema timestamp column.
pub fn parse_ts_opt(raw: Option<String>) -> Option<chrono::NaiveDateTime> {
    raw.and_then(|s| chrono::NaiveDateTime::parse_from_str(&s, TS_FORMAT).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn timestamp_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().unwrap_or_default();
        let formatted = format_ts(ts);
        assert_eq!(formatted, "2026-03-14 09:26:53");
        assert_eq!(parse_ts(&formatted), ts.naive_utc());
    }

    #[test]
    fn bad_timestamp_collapses_to_epoch() {
        assert_eq!(parse_ts("not a date"), chrono::NaiveDateTime::default());
        assert_eq!(parse_ts_opt(None), None);
        assert_eq!(parse_ts_opt(Some("garbage".to_string())), None);
    }
}
