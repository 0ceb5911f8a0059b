//! Identity tools: registration, whois, contact policy.

use crate::errors::ToolError;
use crate::helpers;
use crate::params::{
    CreateAgentIdentityParams, RegisterAgentParams, SetContactPolicyParams, WhoisParams,
};
use std::sync::Arc;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::{Agent, AgentBmc, AgentForCreate};
use waggle_core::store::{archive, git_store};

pub fn agent_payload(agent: &Agent) -> serde_json::Value {
    serde_json::json!({
        "id": agent.id,
        "project_id": agent.project_id,
        "name": agent.name,
        "program": agent.program,
        "model": agent.model,
        "task_description": agent.task_description,
        "inception_ts": agent.inception_ts.and_utc().to_rfc3339(),
        "last_active_ts": agent.last_active_ts.and_utc().to_rfc3339(),
        "attachments_policy": agent.attachments_policy,
        "contact_policy": agent.contact_policy,
    })
}

pub async fn register_agent_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RegisterAgentParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let agent = AgentBmc::register(
        ctx,
        mm,
        AgentForCreate {
            project_id: project.id,
            name: params.name.clone(),
            program: params.program.clone(),
            model: params.model.clone(),
            task_description: params.task_description.clone(),
        },
    )
    .await
    .map_err(ToolError::from)?;

    let agent = if let Some(policy) = params.attachments_policy.as_deref() {
        AgentBmc::set_attachments_policy(ctx, mm, agent.id, policy)
            .await
            .map_err(ToolError::from)?;
        AgentBmc::get(ctx, mm, agent.id).await.map_err(ToolError::from)?
    } else {
        agent
    };

    Ok(agent_payload(&agent))
}

pub async fn create_agent_identity_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: CreateAgentIdentityParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let agent = AgentBmc::create_identity(
        ctx,
        mm,
        AgentForCreate {
            project_id: project.id,
            name: None,
            program: params.program.clone(),
            model: params.model.clone(),
            task_description: params.task_description.clone(),
        },
    )
    .await
    .map_err(ToolError::from)?;
    Ok(agent_payload(&agent))
}

pub async fn whois_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: WhoisParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let mut payload = agent_payload(&agent);
    payload["project"] = serde_json::Value::String(project.human_key.clone());

    if params.include_recent_commits.unwrap_or(true) {
        let profile_rel = archive::project_root(&project.slug)
            .join("agents")
            .join(&agent.name)
            .join("profile.json");
        let commit = {
            let _git_guard = mm.git_lock.lock().await;
            let repo_arc = mm.get_repo().await.map_err(ToolError::from)?;
            let repo = repo_arc.lock().await;
            git_store::last_commit_for_path(&repo, &profile_rel).map_err(ToolError::from)?
        };
        payload["profile_commit"] = match commit {
            Some(info) => serde_json::json!({
                "sha": info.short_sha,
                "summary": info.summary,
                "authored_ts": info.authored_ts,
            }),
            None => serde_json::Value::Null,
        };
    }
    Ok(payload)
}

pub async fn set_contact_policy_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SetContactPolicyParams,
) -> Result<serde_json::Value, ToolError> {
    let (_project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let policy = AgentBmc::set_contact_policy(ctx, mm, agent.id, &params.policy)
        .await
        .map_err(ToolError::from)?;
    Ok(serde_json::json!({ "agent": agent.name, "policy": policy }))
}
