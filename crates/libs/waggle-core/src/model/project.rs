//! Project registry.
//!
//! A project is keyed externally by its `human_key` (an absolute directory
//! path) and canonically by the slug derived from it. Projects are created
//! on first mention and never deleted by the core.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::store::{self, archive, git_store};
use crate::utils::slugs;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub human_key: String,
    pub created_at: NaiveDateTime,
}

pub struct ProjectBmc;

impl ProjectBmc {
    /// Get the project for `human_key`, creating it (and its archive
    /// subtree) on first mention.
    ///
    /// A distinct human key colliding with an existing slug is rejected:
    /// the slug is the canonical key and must stay one-to-one.
    pub async fn ensure(_ctx: &Ctx, mm: &ModelManager, human_key: &str) -> Result<Project> {
        let slug = slugs::slugify(human_key);
        let db = mm.db();

        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE slug = ?")
            .await?;
        let mut rows = stmt.query([slug.as_str()]).await?;
        if let Some(row) = rows.next().await? {
            let project = Self::from_row(row)?;
            if project.human_key != human_key {
                return Err(crate::Error::InvalidInput(format!(
                    "slug '{}' already taken by '{}' (requested for '{}')",
                    slug, project.human_key, human_key
                )));
            }
            return Ok(project);
        }

        let stmt = db
            .prepare("INSERT INTO projects (slug, human_key) VALUES (?, ?) RETURNING id, slug, human_key, created_at")
            .await?;
        let mut rows = stmt.query([slug.as_str(), human_key]).await?;
        let project = if let Some(row) = rows.next().await? {
            Self::from_row(row)?
        } else {
            return Err(crate::Error::InvalidInput("Failed to create project".into()));
        };

        Self::ensure_archive(mm, &project.slug).await?;
        Ok(project)
    }

    /// Resolve a project by slug or human key.
    ///
    /// The identifier is slugified first, so `/data/projects/backend` and
    /// `data-projects-backend` address the same project.
    pub async fn get_by_identifier(
        _ctx: &Ctx,
        mm: &ModelManager,
        identifier: &str,
    ) -> Result<Project> {
        let slug = slugs::slugify(identifier);
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE slug = ?")
            .await?;
        let mut rows = stmt.query([slug.as_str()]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProjectNotFound(identifier.to_string()))
        }
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Project> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProjectNotFound(format!("ID: {id}")))
        }
    }

    /// All projects in creation order.
    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Project>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects ORDER BY created_at ASC, id ASC")
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(Self::from_row(row)?);
        }
        Ok(projects)
    }

    /// Projects in creation order, minus slugs matching any ignore pattern.
    pub async fn list_visible(ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Project>> {
        let all = Self::list_all(ctx, mm).await?;
        let patterns: Vec<glob::Pattern> = mm
            .config
            .storage
            .project_ignore_patterns
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        if patterns.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|project| {
                !patterns
                    .iter()
                    .any(|p| p.matches(&project.slug) || p.matches(&project.human_key))
            })
            .collect())
    }

    pub async fn count_messages(_ctx: &Ctx, mm: &ModelManager, project_id: i64) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT COUNT(*) FROM messages WHERE project_id = ?")
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    /// Make sure the project's subtree exists in the single global archive
    /// repository, bootstrapping the repository itself on first use.
    pub async fn ensure_archive(mm: &ModelManager, slug: &str) -> Result<()> {
        let _git_guard = mm.git_lock.lock().await;
        let repo = git_store::init_or_open_repo(&mm.repo_root)?;
        archive::ensure_project_tree(&repo, slug, &mm.author())
    }

    fn from_row(row: libsql::Row) -> Result<Project> {
        let created_at_str: String = row.get(3)?;
        Ok(Project {
            id: row.get(0)?,
            slug: row.get(1)?,
            human_key: row.get(2)?,
            created_at: store::parse_ts(&created_at_str),
        })
    }
}
