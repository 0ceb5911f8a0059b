//! Contact tools: request, respond, list.
//!
//! A contact request creates (or refreshes) a pending link and sends a
//! small ack-required introduction message to the target; the introduction
//! itself bypasses gating, being the contact request.

use crate::errors::ToolError;
use crate::helpers;
use crate::params::{ListContactsParams, RequestContactParams, RespondContactParams};
use crate::tools::messaging;
use std::sync::Arc;
use tracing::info;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::{Agent, AgentBmc, AgentForCreate};
use waggle_core::model::agent_link::{AgentLinkBmc, LinkEndpoints};
use waggle_core::model::project::Project;
use waggle_core::utils::names::validate_agent_name_format;

const DEFAULT_REQUEST_TTL: u64 = 7 * 24 * 3600;
const DEFAULT_APPROVAL_TTL: u64 = 30 * 24 * 3600;

/// Resolve the target of a contact request, honoring explicit addressing
/// and optionally auto-registering a well-formed missing identity.
async fn resolve_target(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project: &Project,
    to_agent: &str,
    to_project: Option<&str>,
    register_if_missing: bool,
    template: &Agent,
) -> Result<(Project, Agent), ToolError> {
    let (target_project, target_name) = if let Some(identifier) = to_project {
        let target = helpers::resolve_project(ctx, mm, identifier).await?;
        (target, to_agent.to_string())
    } else if let Some(address) = helpers::parse_external_address(to_agent) {
        let target = helpers::resolve_project(ctx, mm, &address.project_identifier).await?;
        (target, address.agent_fragment)
    } else {
        (project.clone(), to_agent.to_string())
    };

    match AgentBmc::get_by_name(ctx, mm, target_project.id, &target_name).await {
        Ok(agent) => Ok((target_project, agent)),
        Err(err) => {
            if register_if_missing && validate_agent_name_format(target_name.trim()) {
                let agent = AgentBmc::register(
                    ctx,
                    mm,
                    AgentForCreate {
                        project_id: target_project.id,
                        name: Some(target_name),
                        program: template.program.clone(),
                        model: template.model.clone(),
                        task_description: String::new(),
                    },
                )
                .await
                .map_err(ToolError::from)?;
                Ok((target_project, agent))
            } else {
                Err(ToolError::from(err))
            }
        }
    }
}

pub async fn request_contact_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RequestContactParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, requester) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.from_agent)
            .await?;
    let (target_project, target) = resolve_target(
        ctx,
        mm,
        &project,
        &params.to_agent,
        params.to_project.as_deref(),
        params.register_if_missing.unwrap_or(true),
        &requester,
    )
    .await?;

    let reason = params.reason.clone().unwrap_or_default();
    let ttl = params.ttl_seconds.unwrap_or(DEFAULT_REQUEST_TTL);
    let link = AgentLinkBmc::upsert_pending(
        ctx,
        mm,
        LinkEndpoints {
            a_project_id: project.id,
            a_agent_id: requester.id,
            b_project_id: target_project.id,
            b_agent_id: target.id,
        },
        &reason,
        ttl,
    )
    .await
    .map_err(ToolError::from)?;

    // Ack-required introduction; bypasses gating by construction.
    let subject = format!("Contact request from {}", requester.name);
    let body = if reason.is_empty() {
        format!(
            "{} requests permission to contact {}.",
            requester.name, target.name
        )
    } else {
        reason.clone()
    };
    messaging::deliver_message(
        ctx,
        mm,
        "request_contact",
        &target_project,
        &requester,
        std::slice::from_ref(&target),
        &[],
        &[],
        &subject,
        &body,
        &[],
        None,
        "normal",
        true,
        None,
    )
    .await?;

    info!(from = %requester.name, to = %target.name, "contact requested");
    Ok(serde_json::json!({
        "from": requester.name,
        "from_project": project.human_key,
        "to": target.name,
        "to_project": target_project.human_key,
        "status": link.status,
        "expires_ts": link.expires_ts.map(|ts| ts.and_utc().to_rfc3339()),
    }))
}

pub async fn respond_contact_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RespondContactParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let requester_project = match params.from_project.as_deref() {
        Some(identifier) => helpers::resolve_project(ctx, mm, identifier).await?,
        None => project.clone(),
    };
    let requester =
        helpers::resolve_agent(ctx, mm, requester_project.id, &params.from_agent).await?;
    let approver = helpers::resolve_agent(ctx, mm, project.id, &params.to_agent).await?;

    let ttl = if params.accept {
        Some(params.ttl_seconds.unwrap_or(DEFAULT_APPROVAL_TTL))
    } else {
        None
    };
    let link = AgentLinkBmc::respond(
        ctx,
        mm,
        LinkEndpoints {
            a_project_id: requester_project.id,
            a_agent_id: requester.id,
            b_project_id: project.id,
            b_agent_id: approver.id,
        },
        params.accept,
        ttl,
    )
    .await
    .map_err(ToolError::from)?;

    info!(
        from = %requester.name,
        to = %approver.name,
        approved = params.accept,
        "contact request resolved"
    );
    Ok(serde_json::json!({
        "from": requester.name,
        "to": approver.name,
        "approved": params.accept,
        "status": link.status,
        "expires_ts": link.expires_ts.map(|ts| ts.and_utc().to_rfc3339()),
    }))
}

pub async fn list_contacts_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ListContactsParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let entries = AgentLinkBmc::list_for_agent(ctx, mm, project.id, agent.id)
        .await
        .map_err(ToolError::from)?;
    let payload: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            serde_json::json!({
                "to": entry.to,
                "to_project": entry.to_project,
                "status": entry.status,
                "reason": entry.reason,
                "updated_ts": entry.updated_ts.and_utc().to_rfc3339(),
                "expires_ts": entry.expires_ts.map(|ts| ts.and_utc().to_rfc3339()),
            })
        })
        .collect();
    Ok(serde_json::json!(payload))
}

/// Synthesize an approval so a denied send can retry once: pending link,
/// immediate approval on behalf of the target, scoped by the auto TTL.
pub async fn auto_handshake(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project: &Project,
    sender: &Agent,
    target_name: &str,
) -> Result<(), ToolError> {
    let target = helpers::resolve_agent(ctx, mm, project.id, target_name).await?;
    let endpoints = LinkEndpoints {
        a_project_id: project.id,
        a_agent_id: sender.id,
        b_project_id: project.id,
        b_agent_id: target.id,
    };
    let ttl = mm.config.contact.auto_ttl_seconds;
    AgentLinkBmc::upsert_pending(ctx, mm, endpoints, "auto-handshake by send_message", ttl)
        .await
        .map_err(ToolError::from)?;
    AgentLinkBmc::respond(ctx, mm, endpoints, true, Some(ttl))
        .await
        .map_err(ToolError::from)?;
    Ok(())
}
