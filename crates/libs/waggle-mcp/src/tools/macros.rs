//! Workflow macros: composed operations that bundle several primitives
//! into one round-trip for small clients.

use crate::errors::ToolError;
use crate::helpers;
use crate::params::{
    FetchInboxParams, MacroContactHandshakeParams, MacroPrepareThreadParams,
    MacroReservationCycleParams, MacroStartSessionParams, ReleaseReservationsParams,
    RequestContactParams, ReserveFilePathsParams, RespondContactParams, SendMessageParams,
};
use crate::tools::{agent as agent_tools, contacts, files, messaging, project as project_tools, search};
use std::sync::Arc;
use tracing::debug;
use waggle_core::Ctx;
use waggle_core::llm::LlmClient;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::{AgentBmc, AgentForCreate};
use waggle_core::model::project::ProjectBmc;

/// ensure-project + register-agent + optional reservation + fetch-inbox.
pub async fn start_session_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MacroStartSessionParams,
) -> Result<serde_json::Value, ToolError> {
    let key = params.human_key.trim();
    if !std::path::Path::new(key).is_absolute() {
        return Err(ToolError::new(
            crate::errors::ErrorKind::InvalidArgument,
            "human_key must be an absolute directory path",
        ));
    }
    let project = ProjectBmc::ensure(ctx, mm, key).await.map_err(ToolError::from)?;
    let agent = AgentBmc::register(
        ctx,
        mm,
        AgentForCreate {
            project_id: project.id,
            name: params.agent_name.clone(),
            program: params.program.clone(),
            model: params.model.clone(),
            task_description: params.task_description.clone(),
        },
    )
    .await
    .map_err(ToolError::from)?;

    let reservations = if let Some(paths) = params.reservation_paths.clone().filter(|p| !p.is_empty())
    {
        files::reserve_file_paths_impl(
            ctx,
            mm,
            ReserveFilePathsParams {
                project_key: project.human_key.clone(),
                agent_name: agent.name.clone(),
                paths,
                ttl_seconds: params.reservation_ttl_seconds,
                exclusive: Some(true),
                reason: params.reservation_reason.clone(),
            },
        )
        .await?
    } else {
        serde_json::json!({ "granted": [], "conflicts": [] })
    };

    let inbox = messaging::fetch_inbox_impl(
        ctx,
        mm,
        FetchInboxParams {
            project_key: project.human_key.clone(),
            agent_name: agent.name.clone(),
            limit: params.inbox_limit.or(Some(10)),
            urgent_only: None,
            include_bodies: None,
            since_ts: None,
        },
    )
    .await?;

    debug!(agent = %agent.name, project = %project.human_key, "session started");
    Ok(serde_json::json!({
        "project": project_tools::project_payload(&project),
        "agent": agent_tools::agent_payload(&agent),
        "reservations": reservations,
        "inbox": inbox,
    }))
}

/// ensure/register agent + thread-summary + fetch-inbox.
pub async fn prepare_thread_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    llm: &LlmClient,
    params: MacroPrepareThreadParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let agent = if params.register_if_missing.unwrap_or(true) {
        AgentBmc::register(
            ctx,
            mm,
            AgentForCreate {
                project_id: project.id,
                name: params.agent_name.clone(),
                program: params.program.clone(),
                model: params.model.clone(),
                task_description: params.task_description.clone(),
            },
        )
        .await
        .map_err(ToolError::from)?
    } else {
        let Some(name) = params.agent_name.as_deref() else {
            return Err(ToolError::new(
                crate::errors::ErrorKind::InvalidArgument,
                "agent_name is required when register_if_missing is false",
            ));
        };
        helpers::resolve_agent(ctx, mm, project.id, name).await?
    };

    let (summary, total) = search::compute_thread_summary(
        ctx,
        mm,
        llm,
        &project,
        &params.thread_id,
        params.llm_mode.unwrap_or(true),
        None,
    )
    .await?;

    let inbox = messaging::fetch_inbox_impl(
        ctx,
        mm,
        FetchInboxParams {
            project_key: project.human_key.clone(),
            agent_name: agent.name.clone(),
            limit: params.inbox_limit.or(Some(10)),
            urgent_only: None,
            include_bodies: None,
            since_ts: None,
        },
    )
    .await?;

    Ok(serde_json::json!({
        "project": project_tools::project_payload(&project),
        "agent": agent_tools::agent_payload(&agent),
        "thread": {
            "thread_id": params.thread_id,
            "summary": summary,
            "total_messages": total,
        },
        "inbox": inbox,
    }))
}

/// reserve + optional immediate release.
pub async fn reservation_cycle_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MacroReservationCycleParams,
) -> Result<serde_json::Value, ToolError> {
    let reservations = files::reserve_file_paths_impl(
        ctx,
        mm,
        ReserveFilePathsParams {
            project_key: params.project_key.clone(),
            agent_name: params.agent_name.clone(),
            paths: params.paths.clone(),
            ttl_seconds: params.ttl_seconds,
            exclusive: params.exclusive,
            reason: params.reason.clone(),
        },
    )
    .await?;

    let released = if params.auto_release.unwrap_or(false) {
        Some(
            files::release_reservations_impl(
                ctx,
                mm,
                ReleaseReservationsParams {
                    project_key: params.project_key.clone(),
                    agent_name: params.agent_name.clone(),
                    paths: Some(params.paths.clone()),
                    reservation_ids: None,
                },
            )
            .await?,
        )
    } else {
        None
    };

    Ok(serde_json::json!({
        "reservations": reservations,
        "released": released,
    }))
}

/// request-contact + optional auto-accept + optional welcome message.
///
/// A welcome-send failure is surfaced in the payload but never fails the
/// handshake itself.
pub async fn contact_handshake_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MacroContactHandshakeParams,
) -> Result<serde_json::Value, ToolError> {
    let request = contacts::request_contact_impl(
        ctx,
        mm,
        RequestContactParams {
            project_key: params.project_key.clone(),
            from_agent: params.requester.clone(),
            to_agent: params.target.clone(),
            to_project: params.to_project.clone(),
            reason: params.reason.clone(),
            ttl_seconds: params.ttl_seconds,
            register_if_missing: params.register_if_missing,
        },
    )
    .await?;

    let response = if params.auto_accept.unwrap_or(false) {
        let respond_project = params
            .to_project
            .clone()
            .unwrap_or_else(|| params.project_key.clone());
        Some(
            contacts::respond_contact_impl(
                ctx,
                mm,
                RespondContactParams {
                    project_key: respond_project,
                    to_agent: params.target.clone(),
                    from_agent: params.requester.clone(),
                    accept: true,
                    ttl_seconds: params.ttl_seconds,
                    from_project: params
                        .to_project
                        .as_ref()
                        .map(|_| params.project_key.clone()),
                },
            )
            .await?,
        )
    } else {
        None
    };

    let welcome = match (&params.welcome_subject, &params.welcome_body) {
        (Some(subject), Some(body)) if params.to_project.is_none() => {
            match messaging::send_message_impl(
                ctx,
                mm,
                SendMessageParams {
                    project_key: params.project_key.clone(),
                    sender_name: params.requester.clone(),
                    to: vec![params.target.clone()],
                    subject: subject.clone(),
                    body_md: body.clone(),
                    cc: None,
                    bcc: None,
                    importance: None,
                    ack_required: None,
                    thread_id: None,
                    attachment_paths: None,
                    convert_images: None,
                    auto_contact_if_blocked: None,
                },
            )
            .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(error = %e, "handshake welcome message failed");
                    e.payload()
                }
            }
        }
        _ => serde_json::Value::Null,
    };

    Ok(serde_json::json!({
        "request": request,
        "response": response,
        "welcome_message": welcome,
    }))
}
