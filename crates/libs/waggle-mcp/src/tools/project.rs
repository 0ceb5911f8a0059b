//! Setup tools: health check and project management.

use crate::errors::{ErrorKind, ToolError};
use crate::params::EnsureProjectParams;
use std::sync::Arc;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::AgentBmc;
use waggle_core::model::project::{Project, ProjectBmc};

pub fn project_payload(project: &Project) -> serde_json::Value {
    serde_json::json!({
        "id": project.id,
        "slug": project.slug,
        "human_key": project.human_key,
        "created_at": project.created_at.and_utc().to_rfc3339(),
    })
}

pub async fn health_check_impl(
    _ctx: &Ctx,
    mm: &Arc<ModelManager>,
) -> Result<serde_json::Value, ToolError> {
    let db_ok = mm.health_check().await.map_err(ToolError::from)?;
    Ok(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage_root": mm.repo_root.display().to_string(),
    }))
}

pub async fn ensure_project_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: EnsureProjectParams,
) -> Result<serde_json::Value, ToolError> {
    let key = params.human_key.trim();
    if !std::path::Path::new(key).is_absolute() {
        return Err(ToolError::new(
            ErrorKind::InvalidArgument,
            "human_key must be an absolute directory path",
        )
        .with_data(serde_json::json!({ "human_key": params.human_key })));
    }
    let project = ProjectBmc::ensure(ctx, mm, key).await.map_err(ToolError::from)?;
    Ok(project_payload(&project))
}

pub async fn list_projects_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
) -> Result<serde_json::Value, ToolError> {
    let projects = ProjectBmc::list_visible(ctx, mm).await.map_err(ToolError::from)?;
    let mut payloads = Vec::new();
    for project in &projects {
        let mut payload = project_payload(project);
        let agents = AgentBmc::list_all_for_project(ctx, mm, project.id)
            .await
            .map_err(ToolError::from)?;
        payload["agent_count"] = serde_json::json!(agents.len());
        payloads.push(payload);
    }
    Ok(serde_json::json!(payloads))
}
