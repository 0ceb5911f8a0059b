//! Advisory file reservations.
//!
//! A reservation is a lease on a path pattern, not a lock: granting always
//! succeeds, and conflicts with other agents' active exclusive reservations
//! are reported alongside the grant so the caller can decide. Expiry is
//! lazy; every listing or conflict check sweeps expired rows first so the
//! externally visible state is always consistent.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::store::{self, archive};
use crate::utils::pathspec;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reservations below this TTL are silently clamped up to it.
pub const TTL_FLOOR_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReservation {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: i64,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: String,
    pub created_ts: NaiveDateTime,
    pub expires_ts: NaiveDateTime,
    pub released_ts: Option<NaiveDateTime>,
}

impl FileReservation {
    /// Active iff not released and not expired.
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.released_ts.is_none() && self.expires_ts > now
    }
}

/// An active reservation joined with its holder's name, as used by
/// conflict checks and listings.
#[derive(Debug, Clone, Serialize)]
pub struct HeldReservation {
    #[serde(flatten)]
    pub reservation: FileReservation,
    pub holder_name: String,
}

/// One conflict found while granting or gating.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationConflict {
    pub path: String,
    pub holder: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub expires_ts: NaiveDateTime,
}

/// Outcome of a renewal for one reservation.
#[derive(Debug, Clone, Serialize)]
pub struct RenewedReservation {
    pub id: i64,
    pub path_pattern: String,
    pub old_expires_ts: NaiveDateTime,
    pub new_expires_ts: NaiveDateTime,
}

pub struct FileReservationBmc;

const RESERVATION_COLUMNS: &str =
    "id, project_id, agent_id, path_pattern, exclusive, reason, created_ts, expires_ts, released_ts";

/// Conflict predicate between an existing reservation and a candidate.
///
/// No conflict when the existing lease is released/expired, when the holder
/// is the candidate agent itself, or when both sides are shared. Otherwise
/// the patterns conflict iff they overlap under symmetric glob matching.
pub fn reservations_conflict(
    existing: &FileReservation,
    holder_is_candidate: bool,
    candidate_path: &str,
    candidate_exclusive: bool,
    now: NaiveDateTime,
) -> bool {
    if !existing.is_active(now) {
        return false;
    }
    if holder_is_candidate {
        return false;
    }
    if !existing.exclusive && !candidate_exclusive {
        return false;
    }
    pathspec::patterns_overlap(&existing.path_pattern, candidate_path)
}

impl FileReservationBmc {
    /// Bulk-release every expired-but-unreleased reservation in a project.
    ///
    /// Runs before any listing or conflict evaluation so passively expired
    /// leases are reflected everywhere as released.
    pub async fn sweep_expired(_ctx: &Ctx, mm: &ModelManager, project_id: i64) -> Result<u64> {
        let db = mm.db();
        let now = store::now_ts();
        let stmt = db
            .prepare(
                r#"
            UPDATE file_reservations SET released_ts = ?
            WHERE project_id = ? AND released_ts IS NULL AND expires_ts < ?
            "#,
            )
            .await?;
        let affected = stmt.execute((now.as_str(), project_id, now.as_str())).await?;
        Ok(affected as u64)
    }

    /// Insert a reservation row. TTLs below the floor are clamped silently.
    pub async fn create(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        path_pattern: &str,
        exclusive: bool,
        reason: &str,
        ttl_seconds: u64,
    ) -> Result<FileReservation> {
        let ttl = ttl_seconds.max(TTL_FLOOR_SECONDS);
        let expires = Utc::now() + Duration::seconds(ttl as i64);
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            INSERT INTO file_reservations (project_id, agent_id, path_pattern, exclusive, reason, expires_ts)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {RESERVATION_COLUMNS}
            "#
            ))
            .await?;
        let mut rows = stmt
            .query((
                project_id,
                agent_id,
                path_pattern,
                exclusive,
                reason,
                store::format_ts(expires),
            ))
            .await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::InvalidInput(
                "Failed to create file reservation".into(),
            ))
        }
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<FileReservation> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM file_reservations WHERE id = ?"
            ))
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::FileReservationNotFound(id.to_string()))
        }
    }

    /// Active reservations with holder names; sweeps expired rows first.
    pub async fn list_active(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<HeldReservation>> {
        Self::sweep_expired(ctx, mm, project_id).await?;
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT fr.id, fr.project_id, fr.agent_id, fr.path_pattern, fr.exclusive, fr.reason,
                   fr.created_ts, fr.expires_ts, fr.released_ts, ag.name
            FROM file_reservations AS fr
            JOIN agents AS ag ON fr.agent_id = ag.id
            WHERE fr.project_id = ? AND fr.released_ts IS NULL
            ORDER BY fr.created_ts DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        let mut reservations = Vec::new();
        while let Some(row) = rows.next().await? {
            let holder_name: String = row.get(9)?;
            reservations.push(HeldReservation {
                reservation: Self::from_row(row)?,
                holder_name,
            });
        }
        Ok(reservations)
    }

    /// All reservations, including released ones; sweeps expired rows first.
    pub async fn list_all(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<HeldReservation>> {
        Self::sweep_expired(ctx, mm, project_id).await?;
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT fr.id, fr.project_id, fr.agent_id, fr.path_pattern, fr.exclusive, fr.reason,
                   fr.created_ts, fr.expires_ts, fr.released_ts, ag.name
            FROM file_reservations AS fr
            JOIN agents AS ag ON fr.agent_id = ag.id
            WHERE fr.project_id = ?
            ORDER BY fr.created_ts DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        let mut reservations = Vec::new();
        while let Some(row) = rows.next().await? {
            let holder_name: String = row.get(9)?;
            reservations.push(HeldReservation {
                reservation: Self::from_row(row)?,
                holder_name,
            });
        }
        Ok(reservations)
    }

    /// Active path patterns held by one agent.
    pub async fn active_patterns_for_agent(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
    ) -> Result<Vec<String>> {
        Ok(Self::list_active(ctx, mm, project_id)
            .await?
            .into_iter()
            .filter(|held| held.reservation.agent_id == agent_id)
            .map(|held| held.reservation.path_pattern)
            .collect())
    }

    /// Conflicts between a candidate pattern and the given active set.
    pub fn conflicts_for(
        active: &[HeldReservation],
        candidate_agent_id: i64,
        candidate_path: &str,
        candidate_exclusive: bool,
        now: NaiveDateTime,
    ) -> Vec<ReservationConflict> {
        active
            .iter()
            .filter(|held| {
                reservations_conflict(
                    &held.reservation,
                    held.reservation.agent_id == candidate_agent_id,
                    candidate_path,
                    candidate_exclusive,
                    now,
                )
            })
            .map(|held| ReservationConflict {
                path: candidate_path.to_string(),
                holder: held.holder_name.clone(),
                path_pattern: held.reservation.path_pattern.clone(),
                exclusive: held.reservation.exclusive,
                expires_ts: held.reservation.expires_ts,
            })
            .collect()
    }

    /// Release active reservations held by an agent, optionally restricted
    /// to ids and/or path patterns. Idempotent: already-released rows are
    /// untouched. Returns the number released.
    pub async fn release(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        ids: Option<&[i64]>,
        paths: Option<&[String]>,
    ) -> Result<u64> {
        let db = mm.db();
        let mut sql = String::from(
            "UPDATE file_reservations SET released_ts = ? \
             WHERE project_id = ? AND agent_id = ? AND released_ts IS NULL",
        );
        let mut params: Vec<libsql::Value> =
            vec![store::now_ts().into(), project_id.into(), agent_id.into()];
        if let Some(ids) = ids
            && !ids.is_empty()
        {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            for id in ids {
                params.push((*id).into());
            }
        }
        if let Some(paths) = paths
            && !paths.is_empty()
        {
            let placeholders = paths.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND path_pattern IN ({placeholders})"));
            for path in paths {
                params.push(path.clone().into());
            }
        }
        let stmt = db.prepare(&sql).await?;
        let affected = stmt
            .execute(libsql::params::Params::Positional(params))
            .await?;
        Ok(affected as u64)
    }

    /// Extend active reservations from `max(now, current_expiry)` by
    /// `extend_seconds` (floored at the TTL minimum). Ids are preserved and
    /// the on-disk artifacts refreshed by the caller from the returned list.
    pub async fn renew(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        extend_seconds: u64,
        ids: Option<&[i64]>,
        paths: Option<&[String]>,
    ) -> Result<Vec<RenewedReservation>> {
        let bump = Duration::seconds(extend_seconds.max(TTL_FLOOR_SECONDS) as i64);
        let now = Utc::now().naive_utc();

        let db = mm.db();
        let mut sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM file_reservations \
             WHERE project_id = ? AND agent_id = ? AND released_ts IS NULL"
        );
        let mut params: Vec<libsql::Value> = vec![project_id.into(), agent_id.into()];
        if let Some(ids) = ids
            && !ids.is_empty()
        {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            for id in ids {
                params.push((*id).into());
            }
        }
        if let Some(paths) = paths
            && !paths.is_empty()
        {
            let placeholders = paths.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND path_pattern IN ({placeholders})"));
            for path in paths {
                params.push(path.clone().into());
            }
        }
        sql.push_str(" ORDER BY expires_ts ASC");

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut held = Vec::new();
        while let Some(row) = rows.next().await? {
            held.push(Self::from_row(row)?);
        }

        let mut renewed = Vec::new();
        for reservation in held {
            let base = if reservation.expires_ts > now {
                reservation.expires_ts
            } else {
                now
            };
            let new_expiry = base + bump;
            let stmt = db
                .prepare("UPDATE file_reservations SET expires_ts = ? WHERE id = ? AND released_ts IS NULL")
                .await?;
            stmt.execute((store::format_ts(new_expiry.and_utc()), reservation.id))
                .await?;
            renewed.push(RenewedReservation {
                id: reservation.id,
                path_pattern: reservation.path_pattern,
                old_expires_ts: reservation.expires_ts,
                new_expires_ts: new_expiry,
            });
        }
        let _ = ctx;
        Ok(renewed)
    }

    /// Write (or refresh) the on-disk JSON artifact for a reservation.
    ///
    /// Caller holds the archive lock.
    pub async fn write_artifact(
        mm: &ModelManager,
        project_slug: &str,
        project_human_key: &str,
        agent_name: &str,
        reservation: &FileReservation,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "id": reservation.id,
            "project": project_human_key,
            "agent": agent_name,
            "path_pattern": reservation.path_pattern,
            "exclusive": reservation.exclusive,
            "reason": reservation.reason,
            "created_ts": reservation.created_ts.and_utc().to_rfc3339(),
            "expires_ts": reservation.expires_ts.and_utc().to_rfc3339(),
        });
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        archive::write_reservation_record(
            &repo,
            project_slug,
            &reservation.path_pattern,
            &payload,
            &format!(
                "file_reservation: {} {}",
                agent_name, reservation.path_pattern
            ),
            &mm.author(),
        )
    }

    fn from_row(row: libsql::Row) -> Result<FileReservation> {
        let exclusive: i64 = row.get(4)?;
        let created_ts_str: String = row.get(6)?;
        let expires_ts_str: String = row.get(7)?;
        let released_ts_str: Option<String> = row.get(8)?;
        Ok(FileReservation {
            id: row.get(0)?,
            project_id: row.get(1)?,
            agent_id: row.get(2)?,
            path_pattern: row.get(3)?,
            exclusive: exclusive != 0,
            reason: row.get(5)?,
            created_ts: store::parse_ts(&created_ts_str),
            expires_ts: store::parse_ts(&expires_ts_str),
            released_ts: store::parse_ts_opt(released_ts_str),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(pattern: &str, exclusive: bool, expired: bool, released: bool) -> FileReservation {
        let now = Utc::now().naive_utc();
        FileReservation {
            id: 1,
            project_id: 1,
            agent_id: 10,
            path_pattern: pattern.to_string(),
            exclusive,
            reason: String::new(),
            created_ts: now - Duration::hours(1),
            expires_ts: if expired {
                now - Duration::minutes(5)
            } else {
                now + Duration::hours(1)
            },
            released_ts: if released { Some(now) } else { None },
        }
    }

    #[test]
    fn released_or_expired_never_conflicts() {
        let now = Utc::now().naive_utc();
        assert!(!reservations_conflict(
            &reservation("src/**", true, true, false),
            false,
            "src/app.py",
            true,
            now
        ));
        assert!(!reservations_conflict(
            &reservation("src/**", true, false, true),
            false,
            "src/app.py",
            true,
            now
        ));
    }

    #[test]
    fn self_overlap_is_benign() {
        let now = Utc::now().naive_utc();
        assert!(!reservations_conflict(
            &reservation("src/**", true, false, false),
            true,
            "src/app.py",
            true,
            now
        ));
    }

    #[test]
    fn shared_shared_never_conflicts() {
        let now = Utc::now().naive_utc();
        assert!(!reservations_conflict(
            &reservation("src/**", false, false, false),
            false,
            "src/app.py",
            false,
            now
        ));
    }

    #[test]
    fn exclusive_overlap_conflicts_both_directions() {
        let now = Utc::now().naive_utc();
        assert!(reservations_conflict(
            &reservation("src/**", true, false, false),
            false,
            "src/app.py",
            true,
            now
        ));
        assert!(reservations_conflict(
            &reservation("src/app.py", true, false, false),
            false,
            "src/*",
            true,
            now
        ));
    }
}
