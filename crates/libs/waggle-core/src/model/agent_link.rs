//! Contact links between agents.
//!
//! A link is a directed edge (requester → target) with a small state
//! machine: `pending → approved | blocked`. Approved links may carry an
//! expiry; an expired approval behaves as if the link were absent. At most
//! one link exists per ordered endpoint tuple.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::store;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLink {
    pub id: i64,
    pub a_project_id: i64,
    pub a_agent_id: i64,
    pub b_project_id: i64,
    pub b_agent_id: i64,
    /// pending | approved | blocked
    pub status: String,
    pub reason: String,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
    pub expires_ts: Option<NaiveDateTime>,
}

impl AgentLink {
    /// Approved and not past its expiry.
    pub fn is_approved(&self, now: NaiveDateTime) -> bool {
        self.status == "approved" && self.expires_ts.is_none_or(|exp| exp > now)
    }

    pub fn is_blocked(&self) -> bool {
        self.status == "blocked"
    }
}

/// Endpoint tuple addressing one directed link.
#[derive(Debug, Clone, Copy)]
pub struct LinkEndpoints {
    pub a_project_id: i64,
    pub a_agent_id: i64,
    pub b_project_id: i64,
    pub b_agent_id: i64,
}

/// An outgoing link joined with target naming, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ContactEntry {
    pub to: String,
    pub to_project: String,
    pub status: String,
    pub reason: String,
    pub updated_ts: NaiveDateTime,
    pub expires_ts: Option<NaiveDateTime>,
}

const LINK_COLUMNS: &str =
    "id, a_project_id, a_agent_id, b_project_id, b_agent_id, status, reason, created_ts, updated_ts, expires_ts";

pub struct AgentLinkBmc;

impl AgentLinkBmc {
    /// Create or refresh a link back to `pending` with a new expiry.
    pub async fn upsert_pending(
        _ctx: &Ctx,
        mm: &ModelManager,
        endpoints: LinkEndpoints,
        reason: &str,
        ttl_seconds: u64,
    ) -> Result<AgentLink> {
        let now = Utc::now();
        let expires = now + Duration::seconds(ttl_seconds.max(60) as i64);
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO agent_links (a_project_id, a_agent_id, b_project_id, b_agent_id, status, reason, expires_ts)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT (a_project_id, a_agent_id, b_project_id, b_agent_id)
            DO UPDATE SET status = 'pending', reason = excluded.reason,
                          updated_ts = strftime('%Y-%m-%d %H:%M:%S', 'now'),
                          expires_ts = excluded.expires_ts
            "#,
            )
            .await?;
        stmt.execute((
            endpoints.a_project_id,
            endpoints.a_agent_id,
            endpoints.b_project_id,
            endpoints.b_agent_id,
            reason,
            store::format_ts(expires),
        ))
        .await?;

        Self::get(mm, endpoints)
            .await?
            .ok_or_else(|| crate::Error::InvalidInput("Failed to upsert contact link".into()))
    }

    /// Resolve a contact request: approve (with optional expiry) or block.
    ///
    /// Approving a request that was never filed creates the approved link
    /// directly, so handshakes work in one round-trip.
    pub async fn respond(
        _ctx: &Ctx,
        mm: &ModelManager,
        endpoints: LinkEndpoints,
        accept: bool,
        ttl_seconds: Option<u64>,
    ) -> Result<AgentLink> {
        let status = if accept { "approved" } else { "blocked" };
        let expires = if accept {
            ttl_seconds.map(|ttl| store::format_ts(Utc::now() + Duration::seconds(ttl.max(60) as i64)))
        } else {
            None
        };
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO agent_links (a_project_id, a_agent_id, b_project_id, b_agent_id, status, reason, expires_ts)
            VALUES (?, ?, ?, ?, ?, '', ?)
            ON CONFLICT (a_project_id, a_agent_id, b_project_id, b_agent_id)
            DO UPDATE SET status = excluded.status,
                          updated_ts = strftime('%Y-%m-%d %H:%M:%S', 'now'),
                          expires_ts = excluded.expires_ts
            "#,
            )
            .await?;
        stmt.execute((
            endpoints.a_project_id,
            endpoints.a_agent_id,
            endpoints.b_project_id,
            endpoints.b_agent_id,
            status,
            expires,
        ))
        .await?;

        Self::get(mm, endpoints)
            .await?
            .ok_or_else(|| crate::Error::InvalidInput("Failed to update contact link".into()))
    }

    /// Fetch the link for an exact endpoint tuple.
    pub async fn get(mm: &ModelManager, endpoints: LinkEndpoints) -> Result<Option<AgentLink>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {LINK_COLUMNS} FROM agent_links \
                 WHERE a_project_id = ? AND a_agent_id = ? AND b_project_id = ? AND b_agent_id = ?"
            ))
            .await?;
        let mut rows = stmt
            .query((
                endpoints.a_project_id,
                endpoints.a_agent_id,
                endpoints.b_project_id,
                endpoints.b_agent_id,
            ))
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Whether an approved, unexpired link exists for the tuple.
    pub async fn approved_unexpired(mm: &ModelManager, endpoints: LinkEndpoints) -> Result<bool> {
        let now = Utc::now().naive_utc();
        Ok(Self::get(mm, endpoints)
            .await?
            .is_some_and(|link| link.is_approved(now)))
    }

    /// Find an approved outbound link from the sender to an agent named
    /// `target_name` (case-insensitive), optionally pinned to one target
    /// project. Returns (link, target_project_id, target_agent_id,
    /// canonical target name).
    pub async fn find_approved_target(
        _ctx: &Ctx,
        mm: &ModelManager,
        a_project_id: i64,
        a_agent_id: i64,
        target_name: &str,
        target_project_id: Option<i64>,
    ) -> Result<Option<(AgentLink, i64, i64, String)>> {
        let db = mm.db();
        let mut sql = format!(
            "SELECT {}, ag.name FROM agent_links AS al \
             JOIN agents AS ag ON ag.id = al.b_agent_id \
             WHERE al.a_project_id = ? AND al.a_agent_id = ? \
               AND al.status = 'approved' AND ag.name = ? COLLATE NOCASE",
            LINK_COLUMNS
                .split(", ")
                .map(|c| format!("al.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut params: Vec<libsql::Value> = vec![
            a_project_id.into(),
            a_agent_id.into(),
            target_name.to_string().into(),
        ];
        if let Some(pid) = target_project_id {
            sql.push_str(" AND al.b_project_id = ?");
            params.push(pid.into());
        }
        sql.push_str(" LIMIT 1");

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        if let Some(row) = rows.next().await? {
            let name: String = row.get(10)?;
            let link = Self::from_row(row)?;
            if !link.is_approved(Utc::now().naive_utc()) {
                return Ok(None);
            }
            let project_id = link.b_project_id;
            let agent_id = link.b_agent_id;
            Ok(Some((link, project_id, agent_id, name)))
        } else {
            Ok(None)
        }
    }

    /// Outgoing links for an agent, newest update first.
    pub async fn list_for_agent(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
    ) -> Result<Vec<ContactEntry>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT ag.name, p.human_key, al.status, al.reason, al.updated_ts, al.expires_ts
            FROM agent_links AS al
            JOIN agents AS ag ON ag.id = al.b_agent_id
            JOIN projects AS p ON p.id = al.b_project_id
            WHERE al.a_project_id = ? AND al.a_agent_id = ?
            ORDER BY al.updated_ts DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id, agent_id)).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let updated_ts: String = row.get(4)?;
            let expires_ts: Option<String> = row.get(5)?;
            entries.push(ContactEntry {
                to: row.get(0)?,
                to_project: row.get(1)?,
                status: row.get(2)?,
                reason: row.get(3)?,
                updated_ts: store::parse_ts(&updated_ts),
                expires_ts: store::parse_ts_opt(expires_ts),
            });
        }
        Ok(entries)
    }

    fn from_row(row: libsql::Row) -> Result<AgentLink> {
        let created_ts: String = row.get(7)?;
        let updated_ts: String = row.get(8)?;
        let expires_ts: Option<String> = row.get(9)?;
        Ok(AgentLink {
            id: row.get(0)?,
            a_project_id: row.get(1)?,
            a_agent_id: row.get(2)?,
            b_project_id: row.get(3)?,
            b_agent_id: row.get(4)?,
            status: row.get(5)?,
            reason: row.get(6)?,
            created_ts: store::parse_ts(&created_ts),
            updated_ts: store::parse_ts(&updated_ts),
            expires_ts: store::parse_ts_opt(expires_ts),
        })
    }
}
