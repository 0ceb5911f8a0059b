//! Message storage and queries.
//!
//! Messages are immutable once written: the pipeline inserts the message,
//! its recipient rows, and the sender's activity bump in one transaction,
//! then mirrors the markdown to the archive. Everything else here is
//! read-side: inboxes, outboxes, threads, search, and the ack views.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::store;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub project_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub body_md: String,
    pub importance: String,
    pub ack_required: bool,
    pub created_ts: NaiveDateTime,
    pub attachments: Vec<Value>,
}

/// Inbox row: a message joined with the recipient's kind.
#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    #[serde(flatten)]
    pub message: Message,
    pub kind: String,
}

/// A recipient row for message creation.
#[derive(Debug, Clone)]
pub struct RecipientForCreate {
    pub agent_id: i64,
    /// to | cc | bcc
    pub kind: &'static str,
}

#[derive(Debug)]
pub struct MessageForCreate {
    pub project_id: i64,
    pub sender_id: i64,
    pub recipients: Vec<RecipientForCreate>,
    pub subject: String,
    pub body_md: String,
    pub thread_id: Option<String>,
    pub importance: String,
    pub ack_required: bool,
    pub attachments: Vec<Value>,
}

/// Recipient state for one delivered message.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientState {
    pub agent_id: i64,
    pub agent_name: String,
    pub kind: String,
    pub read_ts: Option<NaiveDateTime>,
    pub ack_ts: Option<NaiveDateTime>,
}

/// Aggregate row for thread listings.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadOverview {
    pub thread_id: String,
    pub subject: String,
    pub message_count: i64,
    pub last_message_ts: NaiveDateTime,
}

/// Filters for inbox listing.
#[derive(Debug, Clone, Default)]
pub struct InboxFilter {
    pub urgent_only: bool,
    /// Strictly-greater-than cutoff.
    pub since_ts: Option<NaiveDateTime>,
    pub limit: i64,
}

const MESSAGE_COLUMNS: &str = "m.id, m.project_id, m.sender_id, ag.name, m.thread_id, m.subject, m.body_md, m.importance, m.ack_required, m.created_ts, m.attachments";

// Queries FTS5 cannot do anything useful with; short-circuit to empty.
const FTS_UNSEARCHABLE: [&str; 9] = ["", "*", "**", "***", ".", "..", "...", "?", "??"];

pub struct MessageBmc;

impl MessageBmc {
    /// Insert a message, its recipient rows, and the sender activity bump
    /// as one transaction. At least one recipient is required.
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, msg_c: MessageForCreate) -> Result<i64> {
        if msg_c.recipients.is_empty() {
            return Err(crate::Error::InvalidInput(
                "at least one recipient must be specified".into(),
            ));
        }

        let db = mm.db();
        let attachments_json = serde_json::to_string(&msg_c.attachments)?;

        db.execute("BEGIN IMMEDIATE", ()).await?;
        let result = Self::create_in_tx(mm, &msg_c, &attachments_json).await;
        match result {
            Ok(id) => {
                db.execute("COMMIT", ()).await?;
                Ok(id)
            }
            Err(e) => {
                let _ = db.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn create_in_tx(
        mm: &ModelManager,
        msg_c: &MessageForCreate,
        attachments_json: &str,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO messages (project_id, sender_id, thread_id, subject, body_md, importance, ack_required, attachments)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
            )
            .await?;
        let mut rows = stmt
            .query((
                msg_c.project_id,
                msg_c.sender_id,
                msg_c.thread_id.clone(),
                msg_c.subject.as_str(),
                msg_c.body_md.as_str(),
                msg_c.importance.as_str(),
                msg_c.ack_required,
                attachments_json,
            ))
            .await?;
        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput("Failed to create message".into()));
        };

        // Batched recipient insert. The UNIQUE(message_id, agent_id)
        // constraint collapses duplicates upstream normalization missed.
        let mut query = String::from(
            "INSERT OR IGNORE INTO message_recipients (message_id, agent_id, kind) VALUES ",
        );
        let mut params: Vec<libsql::Value> = Vec::with_capacity(msg_c.recipients.len() * 3);
        for (i, recipient) in msg_c.recipients.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push_str("(?, ?, ?)");
            params.push(id.into());
            params.push(recipient.agent_id.into());
            params.push(recipient.kind.to_string().into());
        }
        let stmt = db.prepare(&query).await?;
        stmt.execute(libsql::params::Params::Positional(params))
            .await?;

        let stmt = db
            .prepare("UPDATE agents SET last_active_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((store::now_ts(), msg_c.sender_id)).await?;

        Ok(id)
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, message_id: i64) -> Result<Message> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages AS m JOIN agents AS ag ON m.sender_id = ag.id WHERE m.id = ?"
            ))
            .await?;
        let mut rows = stmt.query([message_id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::MessageNotFound(message_id))
        }
    }

    /// Like [`Self::get`] but scoped to a project.
    pub async fn get_in_project(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        message_id: i64,
    ) -> Result<Message> {
        let message = Self::get(ctx, mm, message_id).await?;
        if message.project_id != project_id {
            return Err(crate::Error::MessageNotFound(message_id));
        }
        Ok(message)
    }

    /// Most recent messages where the agent is a recipient, newest first.
    pub async fn list_inbox(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        filter: &InboxFilter,
    ) -> Result<Vec<InboxItem>> {
        let db = mm.db();
        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS}, mr.kind FROM messages AS m \
             JOIN message_recipients AS mr ON m.id = mr.message_id \
             JOIN agents AS ag ON m.sender_id = ag.id \
             WHERE m.project_id = ? AND mr.agent_id = ?"
        );
        let mut params: Vec<libsql::Value> = vec![project_id.into(), agent_id.into()];
        if filter.urgent_only {
            sql.push_str(" AND m.importance IN ('high', 'urgent')");
        }
        if let Some(since) = filter.since_ts {
            sql.push_str(" AND m.created_ts > ?");
            params.push(store::format_ts(since.and_utc()).into());
        }
        sql.push_str(" ORDER BY m.created_ts DESC, m.id DESC LIMIT ?");
        params.push(filter.limit.max(0).into());

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(11)?;
            items.push(InboxItem {
                message: Self::from_row(row)?,
                kind,
            });
        }
        Ok(items)
    }

    /// Messages sent by the agent, newest first.
    pub async fn list_outbox(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        since_ts: Option<NaiveDateTime>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let db = mm.db();
        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages AS m \
             JOIN agents AS ag ON m.sender_id = ag.id \
             WHERE m.project_id = ? AND m.sender_id = ?"
        );
        let mut params: Vec<libsql::Value> = vec![project_id.into(), agent_id.into()];
        if let Some(since) = since_ts {
            sql.push_str(" AND m.created_ts > ?");
            params.push(store::format_ts(since.and_utc()).into());
        }
        sql.push_str(" ORDER BY m.created_ts DESC, m.id DESC LIMIT ?");
        params.push(limit.max(0).into());

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::from_row(row)?);
        }
        Ok(messages)
    }

    /// Recipient rows (with names and state) for one message.
    pub async fn recipients(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
    ) -> Result<Vec<RecipientState>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT mr.agent_id, ag.name, mr.kind, mr.read_ts, mr.ack_ts
            FROM message_recipients AS mr
            JOIN agents AS ag ON mr.agent_id = ag.id
            WHERE mr.message_id = ?
            ORDER BY mr.id ASC
            "#,
            )
            .await?;
        let mut rows = stmt.query([message_id]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let read_ts: Option<String> = row.get(3)?;
            let ack_ts: Option<String> = row.get(4)?;
            out.push(RecipientState {
                agent_id: row.get(0)?,
                agent_name: row.get(1)?,
                kind: row.get(2)?,
                read_ts: store::parse_ts_opt(read_ts),
                ack_ts: store::parse_ts_opt(ack_ts),
            });
        }
        Ok(out)
    }

    /// Collect a thread in ascending order.
    ///
    /// Matches `thread_id == key`, and when the key parses as a number the
    /// message with that id is included as the thread seed.
    pub async fn list_thread(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        thread_key: &str,
    ) -> Result<Vec<Message>> {
        let db = mm.db();
        let seed_id: Option<i64> = thread_key.parse().ok();
        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages AS m \
             JOIN agents AS ag ON m.sender_id = ag.id \
             WHERE m.project_id = ? AND (m.thread_id = ?"
        );
        let mut params: Vec<libsql::Value> =
            vec![project_id.into(), thread_key.to_string().into()];
        if let Some(id) = seed_id {
            sql.push_str(" OR m.id = ?");
            params.push(id.into());
        }
        sql.push_str(") ORDER BY m.created_ts ASC, m.id ASC");

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::from_row(row)?);
        }
        Ok(messages)
    }

    /// Distinct sender and recipient names appearing on a thread.
    pub async fn thread_participants(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        thread_key: &str,
    ) -> Result<Vec<String>> {
        let messages = Self::list_thread(ctx, mm, project_id, thread_key).await?;
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for message in &messages {
            names.insert(message.sender_name.clone());
            for recipient in Self::recipients(ctx, mm, message.id).await? {
                names.insert(recipient.agent_name);
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Thread overviews for a project, most recently active first.
    pub async fn list_threads(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        limit: i64,
    ) -> Result<Vec<ThreadOverview>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT m.thread_id, MIN(m.subject), COUNT(*), MAX(m.created_ts)
            FROM messages AS m
            WHERE m.project_id = ? AND m.thread_id IS NOT NULL
            GROUP BY m.thread_id
            ORDER BY MAX(m.created_ts) DESC
            LIMIT ?
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id, limit)).await?;
        let mut threads = Vec::new();
        while let Some(row) = rows.next().await? {
            let last_ts: String = row.get(3)?;
            threads.push(ThreadOverview {
                thread_id: row.get(0)?,
                subject: row.get(1)?,
                message_count: row.get(2)?,
                last_message_ts: store::parse_ts(&last_ts),
            });
        }
        Ok(threads)
    }

    /// Full-text search over subject and body, best bm25 score first.
    ///
    /// Junk queries and FTS syntax errors return empty results instead of
    /// failing the tool call.
    pub async fn search(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let trimmed = query.trim();
        if FTS_UNSEARCHABLE.contains(&trimmed) {
            info!(query = %query, "unsearchable query, returning empty");
            return Ok(Vec::new());
        }

        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages_fts \
                 JOIN messages AS m ON messages_fts.rowid = m.id \
                 JOIN agents AS ag ON m.sender_id = ag.id \
                 WHERE m.project_id = ? AND messages_fts MATCH ? \
                 ORDER BY bm25(messages_fts) ASC \
                 LIMIT ?"
            ))
            .await?;

        let mut rows = match stmt.query((project_id, trimmed, limit)).await {
            Ok(rows) => rows,
            Err(e) => {
                info!(query = %query, error = %e, "FTS search failed, returning empty");
                return Ok(Vec::new());
            }
        };

        let mut messages = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => messages.push(Self::from_row(row)?),
                Ok(None) => break,
                Err(e) => {
                    info!(query = %query, error = %e, "FTS row iteration failed, returning partial");
                    break;
                }
            }
        }
        Ok(messages)
    }

    /// Set-once read timestamp. The first call sets it; later calls return
    /// the original value untouched. `None` means the agent is not a
    /// recipient of the message.
    pub async fn mark_read(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
        agent_id: i64,
    ) -> Result<Option<NaiveDateTime>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE message_recipients SET read_ts = ? WHERE message_id = ? AND agent_id = ? AND read_ts IS NULL",
            )
            .await?;
        stmt.execute((store::now_ts(), message_id, agent_id)).await?;
        Self::recipient_field(mm, message_id, agent_id, "read_ts").await
    }

    /// Set-once acknowledgement; also sets the read timestamp as a side
    /// effect. Returns `(read_ts, ack_ts)` as they prevail after the call.
    pub async fn acknowledge(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
        agent_id: i64,
    ) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let db = mm.db();
        let now = store::now_ts();
        let stmt = db
            .prepare(
                r#"
            UPDATE message_recipients
            SET ack_ts = COALESCE(ack_ts, ?), read_ts = COALESCE(read_ts, ?)
            WHERE message_id = ? AND agent_id = ?
            "#,
            )
            .await?;
        stmt.execute((now.as_str(), now.as_str(), message_id, agent_id))
            .await?;
        let read_ts = Self::recipient_field(mm, message_id, agent_id, "read_ts").await?;
        let ack_ts = Self::recipient_field(mm, message_id, agent_id, "ack_ts").await?;
        Ok((read_ts, ack_ts))
    }

    async fn recipient_field(
        mm: &ModelManager,
        message_id: i64,
        agent_id: i64,
        field: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {field} FROM message_recipients WHERE message_id = ? AND agent_id = ?"
            ))
            .await?;
        let mut rows = stmt.query((message_id, agent_id)).await?;
        if let Some(row) = rows.next().await? {
            let raw: Option<String> = row.get(0)?;
            Ok(store::parse_ts_opt(raw))
        } else {
            Ok(None)
        }
    }

    /// Ack-required messages for an agent where the ack is still pending,
    /// optionally only those older than `min_age_seconds`.
    pub async fn list_ack_pending(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        min_age_seconds: Option<u64>,
        limit: i64,
    ) -> Result<Vec<InboxItem>> {
        let db = mm.db();
        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS}, mr.kind FROM messages AS m \
             JOIN message_recipients AS mr ON m.id = mr.message_id \
             JOIN agents AS ag ON m.sender_id = ag.id \
             WHERE m.project_id = ? AND mr.agent_id = ? \
               AND m.ack_required = 1 AND mr.ack_ts IS NULL"
        );
        let mut params: Vec<libsql::Value> = vec![project_id.into(), agent_id.into()];
        if let Some(age) = min_age_seconds {
            sql.push_str(" AND m.created_ts < ?");
            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(age as i64);
            params.push(store::format_ts(cutoff).into());
        }
        sql.push_str(" ORDER BY m.created_ts DESC LIMIT ?");
        params.push(limit.max(0).into());

        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(11)?;
            items.push(InboxItem {
                message: Self::from_row(row)?,
                kind,
            });
        }
        Ok(items)
    }

    /// Urgent/high messages still unread for an agent.
    pub async fn list_urgent_unread(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        limit: i64,
    ) -> Result<Vec<InboxItem>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}, mr.kind FROM messages AS m \
                 JOIN message_recipients AS mr ON m.id = mr.message_id \
                 JOIN agents AS ag ON m.sender_id = ag.id \
                 WHERE m.project_id = ? AND mr.agent_id = ? \
                   AND m.importance IN ('high', 'urgent') AND mr.read_ts IS NULL \
                 ORDER BY m.created_ts DESC LIMIT ?"
            ))
            .await?;
        let mut rows = stmt.query((project_id, agent_id, limit)).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(11)?;
            items.push(InboxItem {
                message: Self::from_row(row)?,
                kind,
            });
        }
        Ok(items)
    }

    /// Whether any message passed between two agents after `since`.
    ///
    /// Direction-agnostic: sender→recipient in either orientation counts as
    /// prior contact for the auto-allow heuristic.
    pub async fn recent_contact_between(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_a: i64,
        agent_b: i64,
        since: NaiveDateTime,
    ) -> Result<bool> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT 1 FROM messages AS m
            JOIN message_recipients AS mr ON mr.message_id = m.id
            WHERE m.project_id = ?
              AND m.created_ts > ?
              AND ((m.sender_id = ? AND mr.agent_id = ?) OR (m.sender_id = ? AND mr.agent_id = ?))
            LIMIT 1
            "#,
            )
            .await?;
        let mut rows = stmt
            .query((
                project_id,
                store::format_ts(since.and_utc()),
                agent_a,
                agent_b,
                agent_b,
                agent_a,
            ))
            .await?;
        Ok(rows.next().await?.is_some())
    }

    fn from_row(row: libsql::Row) -> Result<Message> {
        let ack_required: i64 = row.get(8)?;
        let created_ts_str: String = row.get(9)?;
        let attachments_str: String = row.get(10)?;
        let attachments: Vec<Value> =
            serde_json::from_str(&attachments_str).unwrap_or_default();
        Ok(Message {
            id: row.get(0)?,
            project_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            thread_id: row.get(4)?,
            subject: row.get(5)?,
            body_md: row.get(6)?,
            importance: row.get(7)?,
            ack_required: ack_required != 0,
            created_ts: store::parse_ts(&created_ts_str),
            attachments,
        })
    }
}
