//! Agent registration and profiles.
//!
//! An agent is a named persona inside a project. Names are unique per
//! project, case-insensitively, and follow the memorable adjective+noun
//! format ("BlueLake") subject to the configured enforcement mode.
//! Registration is an upsert: reusing a name refreshes program/model/task
//! metadata and bumps `last_active_ts`.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::store::{self, archive};
use crate::utils::names::{generate_agent_name, sanitize_agent_name, validate_agent_name_format};
use crate::utils::suggest_similar;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use waggle_common::config::NameEnforcement;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub inception_ts: NaiveDateTime,
    pub last_active_ts: NaiveDateTime,
    /// auto | inline | file
    pub attachments_policy: String,
    /// open | auto | contacts_only | block_all
    pub contact_policy: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AgentForCreate {
    pub project_id: i64,
    /// Caller-provided name hint; resolution depends on the enforcement mode.
    pub name: Option<String>,
    pub program: String,
    pub model: String,
    pub task_description: String,
}

const AGENT_COLUMNS: &str = "id, project_id, name, program, model, task_description, inception_ts, last_active_ts, attachments_policy, contact_policy";

pub struct AgentBmc;

impl AgentBmc {
    /// Register or refresh an agent and persist its profile to the archive.
    ///
    /// Name resolution honors the configured enforcement mode:
    /// - `strict`: an invalid or taken name is an error
    /// - `coerce`: an unusable name silently falls back to auto-generation
    /// - `always_auto`: caller names are ignored entirely
    pub async fn register(_ctx: &Ctx, mm: &ModelManager, agent_c: AgentForCreate) -> Result<Agent> {
        let name = Self::resolve_name(mm, agent_c.project_id, agent_c.name.as_deref(), false).await?;
        let db = mm.db();

        let existing = Self::find_by_name(mm, agent_c.project_id, &name).await?;
        let agent = if let Some(agent) = existing {
            let stmt = db
                .prepare(
                    "UPDATE agents SET program = ?, model = ?, task_description = ?, last_active_ts = ? WHERE id = ?",
                )
                .await?;
            stmt.execute((
                agent_c.program.as_str(),
                agent_c.model.as_str(),
                agent_c.task_description.as_str(),
                store::now_ts(),
                agent.id,
            ))
            .await?;
            Self::get(_ctx, mm, agent.id).await?
        } else {
            let stmt = db
                .prepare(
                    r#"
                INSERT INTO agents (project_id, name, program, model, task_description)
                VALUES (?, ?, ?, ?, ?)
                RETURNING id
                "#,
                )
                .await?;
            let mut rows = stmt
                .query((
                    agent_c.project_id,
                    name.as_str(),
                    agent_c.program.as_str(),
                    agent_c.model.as_str(),
                    agent_c.task_description.as_str(),
                ))
                .await?;
            let id = if let Some(row) = rows.next().await? {
                row.get::<i64>(0)?
            } else {
                return Err(crate::Error::InvalidInput("Failed to create agent".into()));
            };
            Self::get(_ctx, mm, id).await?
        };

        Self::write_profile(mm, &agent).await?;
        Ok(agent)
    }

    /// Registration variant that always mints a fresh generated identity,
    /// ignoring any caller-provided hint.
    pub async fn create_identity(
        ctx: &Ctx,
        mm: &ModelManager,
        mut agent_c: AgentForCreate,
    ) -> Result<Agent> {
        let name = Self::resolve_name(mm, agent_c.project_id, None, true).await?;
        agent_c.name = Some(name);
        Self::register(ctx, mm, agent_c).await
    }

    /// Resolve a usable unique name from an optional hint.
    async fn resolve_name(
        mm: &ModelManager,
        project_id: i64,
        hint: Option<&str>,
        force_auto: bool,
    ) -> Result<String> {
        let mode = mm.config.identity.name_enforcement;
        let effective_hint = if force_auto || mode == NameEnforcement::AlwaysAuto {
            None
        } else {
            hint
        };

        if let Some(raw) = effective_hint {
            match sanitize_agent_name(raw) {
                Some(sanitized) if validate_agent_name_format(&sanitized) => {
                    return Ok(sanitized);
                }
                Some(sanitized) => {
                    if mode == NameEnforcement::Strict {
                        return Err(crate::Error::InvalidInput(format!(
                            "invalid agent name format: '{sanitized}'. Agent names must be \
                             adjective+noun identifiers like 'GreenLake' or 'BlueDog'; omit the \
                             name to auto-generate one"
                        )));
                    }
                    // coerce: fall through to generation
                }
                None => {
                    if mode == NameEnforcement::Strict {
                        return Err(crate::Error::InvalidInput(
                            "agent name must contain alphanumeric characters".into(),
                        ));
                    }
                }
            }
        }

        for _ in 0..1024 {
            let candidate = generate_agent_name();
            if Self::find_by_name(mm, project_id, &candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(crate::Error::InvalidInput(
            "unable to generate a unique agent name".into(),
        ))
    }

    async fn write_profile(mm: &ModelManager, agent: &Agent) -> Result<()> {
        let ctx = Ctx::root_ctx();
        let project = crate::model::project::ProjectBmc::get(&ctx, mm, agent.project_id).await?;

        let profile = serde_json::json!({
            "id": agent.id,
            "name": agent.name,
            "program": agent.program,
            "model": agent.model,
            "task_description": agent.task_description,
            "inception_ts": agent.inception_ts.and_utc().to_rfc3339(),
            "last_active_ts": agent.last_active_ts.and_utc().to_rfc3339(),
            "attachments_policy": agent.attachments_policy,
            "contact_policy": agent.contact_policy,
        });

        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        archive::write_agent_profile(&repo, &project.slug, &agent.name, &profile, &mm.author())
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Agent> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .await?;
        let mut rows = stmt.query([id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::agent_not_found(format!("ID: {id}")))
        }
    }

    /// Case-insensitive, whitespace-insensitive lookup by name.
    ///
    /// On a miss, near-miss suggestions from the project roster ride along
    /// in the error.
    pub async fn get_by_name(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        name: &str,
    ) -> Result<Agent> {
        let trimmed = name.trim();
        if let Some(agent) = Self::find_by_name(mm, project_id, trimmed).await? {
            return Ok(agent);
        }
        // Second chance: the caller may have included punctuation.
        if let Some(sanitized) = sanitize_agent_name(trimmed)
            && sanitized != trimmed
            && let Some(agent) = Self::find_by_name(mm, project_id, &sanitized).await?
        {
            return Ok(agent);
        }

        let all_names = Self::list_names(mm, project_id).await?;
        let name_refs: Vec<&str> = all_names.iter().map(String::as_str).collect();
        let suggestions: Vec<String> = suggest_similar(trimmed, &name_refs, 3)
            .into_iter()
            .map(String::from)
            .collect();
        Err(crate::Error::agent_not_found_with_suggestions(
            format!("Name: {trimmed} in Project ID: {project_id}"),
            suggestions,
        ))
    }

    async fn find_by_name(
        mm: &ModelManager,
        project_id: i64,
        name: &str,
    ) -> Result<Option<Agent>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE project_id = ? AND name = ? COLLATE NOCASE"
            ))
            .await?;
        let mut rows = stmt.query((project_id, name)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    async fn list_names(mm: &ModelManager, project_id: i64) -> Result<Vec<String>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT name FROM agents WHERE project_id = ?")
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    pub async fn list_all_for_project(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<Agent>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE project_id = ? ORDER BY name ASC"
            ))
            .await?;
        let mut rows = stmt.query([project_id]).await?;

        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            agents.push(Self::from_row(row)?);
        }
        Ok(agents)
    }

    /// Per-agent unread message counts for a project, one aggregate query.
    pub async fn unread_counts(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<std::collections::HashMap<i64, i64>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT mr.agent_id, COUNT(*)
            FROM message_recipients AS mr
            JOIN messages AS m ON m.id = mr.message_id
            WHERE m.project_id = ? AND mr.read_ts IS NULL
            GROUP BY mr.agent_id
            "#,
            )
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        let mut counts = std::collections::HashMap::new();
        while let Some(row) = rows.next().await? {
            counts.insert(row.get(0)?, row.get(1)?);
        }
        Ok(counts)
    }

    /// Set the inbound contact policy. Unknown values collapse to `auto`.
    pub async fn set_contact_policy(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
        policy: &str,
    ) -> Result<String> {
        let pol = match policy.to_lowercase().as_str() {
            p @ ("open" | "auto" | "contacts_only" | "block_all") => p.to_string(),
            _ => "auto".to_string(),
        };
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE agents SET contact_policy = ? WHERE id = ?")
            .await?;
        stmt.execute((pol.as_str(), agent_id)).await?;
        Ok(pol)
    }

    /// Set the attachments policy. Unknown values collapse to `auto`.
    pub async fn set_attachments_policy(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
        policy: &str,
    ) -> Result<String> {
        let pol = match policy.to_lowercase().as_str() {
            p @ ("auto" | "inline" | "file") => p.to_string(),
            _ => "auto".to_string(),
        };
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE agents SET attachments_policy = ? WHERE id = ?")
            .await?;
        stmt.execute((pol.as_str(), agent_id)).await?;
        Ok(pol)
    }

    /// Bump `last_active_ts` to now.
    pub async fn touch_last_active(_ctx: &Ctx, mm: &ModelManager, agent_id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE agents SET last_active_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((store::now_ts(), agent_id)).await?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<Agent> {
        let inception_ts_str: String = row.get(6)?;
        let last_active_ts_str: String = row.get(7)?;
        Ok(Agent {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            program: row.get(3)?,
            model: row.get(4)?,
            task_description: row.get(5)?,
            inception_ts: store::parse_ts(&inception_ts_str),
            last_active_ts: store::parse_ts(&last_active_ts_str),
            attachments_policy: row.get(8)?,
            contact_policy: row.get(9)?,
        })
    }
}
