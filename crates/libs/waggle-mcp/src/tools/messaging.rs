//! The message pipeline: send, reply, inbox, read/ack.
//!
//! The canonical send procedure is the same for new sends and replies:
//! resolve project and sender, normalize and route recipients, apply
//! contact gating, apply reservation gating, process attachments, persist
//! atomically, then write the archive bundle under the archive lock with
//! one commit per delivery. Nothing is persisted before every gate has
//! passed.

use crate::errors::{ErrorKind, ToolError};
use crate::helpers::{self, RoutedRecipients};
use crate::tools::contacts;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{info, warn};
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::{Agent, AgentBmc, AgentForCreate};
use waggle_core::model::contact_policy::{self, ContactDecision, GateContext};
use waggle_core::model::file_reservation::FileReservationBmc;
use waggle_core::model::message::{
    InboxFilter, Message, MessageBmc, MessageForCreate, RecipientForCreate,
};
use waggle_core::model::project::Project;
use waggle_core::store::archive::{self, Frontmatter};
use waggle_core::utils::attachments::{AttachmentPolicy, EmbedPolicy, process_attachments};

use crate::params::{
    FetchInboxParams, MessageStateParams, ReplyMessageParams, SendMessageParams,
};

/// Serialize one message to its tool-facing payload.
pub fn message_payload(message: &Message, include_body: bool) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "id": message.id,
        "thread_id": message.thread_id,
        "subject": message.subject,
        "importance": message.importance,
        "ack_required": message.ack_required,
        "created_ts": message.created_ts.and_utc().to_rfc3339(),
        "from": message.sender_name,
        "attachments": message.attachments,
    });
    if include_body {
        payload["body_md"] = serde_json::Value::String(message.body_md.clone());
    }
    payload
}

fn parse_since(raw: Option<&str>) -> Result<Option<NaiveDateTime>, ToolError> {
    let Some(raw) = raw else { return Ok(None) };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(ts.naive_utc()));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, waggle_core::store::TS_FORMAT) {
        return Ok(Some(ts));
    }
    Err(
        ToolError::new(ErrorKind::InvalidArgument, "since_ts is not a valid timestamp")
            .with_data(serde_json::json!({ "since_ts": raw })),
    )
}

fn importance_or_default(importance: Option<&str>) -> String {
    match importance.map(str::to_lowercase).as_deref() {
        Some(level @ ("low" | "normal" | "high" | "urgent")) => level.to_string(),
        _ => "normal".to_string(),
    }
}

/// Mailbox surfaces the archive write will touch for this delivery.
fn write_surfaces(sender: &Agent, recipients: &[&Agent], now: chrono::DateTime<chrono::Utc>) -> Vec<String> {
    let year = now.format("%Y");
    let month = now.format("%m");
    let mut surfaces = vec![format!("agents/{}/outbox/{year}/{month}/*.md", sender.name)];
    for recipient in recipients {
        surfaces.push(format!(
            "agents/{}/inbox/{year}/{month}/*.md",
            recipient.name
        ));
    }
    surfaces
}

/// Execute one delivery into a single project: gates that depend on write
/// surfaces, attachment processing, the atomic insert, and the archive
/// bundle with its commit.
#[allow(clippy::too_many_arguments)]
pub async fn deliver_message(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    operation: &str,
    project: &Project,
    sender: &Agent,
    to: &[Agent],
    cc: &[Agent],
    bcc: &[Agent],
    subject: &str,
    body_md: &str,
    attachment_paths: &[String],
    convert_images_override: Option<bool>,
    importance: &str,
    ack_required: bool,
    thread_id: Option<String>,
) -> Result<serde_json::Value, ToolError> {
    let call_start = std::time::Instant::now();
    if to.is_empty() && cc.is_empty() && bcc.is_empty() {
        return Err(ToolError::new(
            ErrorKind::InvalidArgument,
            "at least one recipient must be specified",
        ));
    }

    let all_recipients: Vec<&Agent> = to.iter().chain(cc.iter()).chain(bcc.iter()).collect();
    let now = chrono::Utc::now();

    // Reservation gating: the mailbox files this write will touch must not
    // overlap another agent's active exclusive reservation. The write itself
    // is a shared candidate: only existing exclusive holders block it.
    if mm.config.reservations.enforcement_enabled {
        FileReservationBmc::sweep_expired(ctx, mm, project.id)
            .await
            .map_err(ToolError::from)?;
        let active = FileReservationBmc::list_active(ctx, mm, project.id)
            .await
            .map_err(ToolError::from)?;
        let mut conflicts = Vec::new();
        for surface in write_surfaces(sender, &all_recipients, now) {
            for conflict in FileReservationBmc::conflicts_for(
                &active,
                sender.id,
                &surface,
                false,
                now.naive_utc(),
            ) {
                conflicts.push(serde_json::json!({
                    "surface": surface,
                    "holder": conflict.holder,
                    "path_pattern": conflict.path_pattern,
                    "exclusive": conflict.exclusive,
                    "expires_ts": conflict.expires_ts.and_utc().to_rfc3339(),
                }));
            }
        }
        if !conflicts.is_empty() {
            return Err(ToolError::new(
                ErrorKind::FileReservationConflict,
                "Conflicting active file reservations prevent message write.",
            )
            .with_data(serde_json::json!({ "conflicts": conflicts })));
        }
    }

    // Effective attachment policy: server default, then the sender's agent
    // policy, then the per-call override.
    let mut convert_images = convert_images_override.unwrap_or(mm.config.storage.convert_images);
    let mut embed = EmbedPolicy::Auto;
    if matches!(sender.attachments_policy.as_str(), "inline" | "file") {
        convert_images = true;
        embed = EmbedPolicy::from_str_policy(&sender.attachments_policy);
    }
    let policy = AttachmentPolicy {
        convert_images,
        embed,
        inline_max_bytes: mm.config.storage.inline_image_max_bytes,
    };

    let _archive_guard = mm
        .acquire_archive_lock(Some(sender.name.clone()))
        .await
        .map_err(ToolError::from)?;

    let attachment_base = mm.repo_root.join(archive::project_root(&project.slug));
    let processed = process_attachments(body_md, attachment_paths, &attachment_base, now, &policy)
        .map_err(ToolError::from)?;

    // Persist atomically; the transaction commits before any archive write.
    let mut recipients = Vec::new();
    for agent in to {
        recipients.push(RecipientForCreate { agent_id: agent.id, kind: "to" });
    }
    for agent in cc {
        recipients.push(RecipientForCreate { agent_id: agent.id, kind: "cc" });
    }
    for agent in bcc {
        recipients.push(RecipientForCreate { agent_id: agent.id, kind: "bcc" });
    }
    let attachments_meta: Vec<serde_json::Value> = processed
        .descriptors
        .iter()
        .filter_map(|d| serde_json::to_value(d).ok())
        .collect();

    let message_id = MessageBmc::create(
        ctx,
        mm,
        MessageForCreate {
            project_id: project.id,
            sender_id: sender.id,
            recipients,
            subject: subject.to_string(),
            body_md: processed.body_md.clone(),
            thread_id,
            importance: importance.to_string(),
            ack_required,
            attachments: attachments_meta.clone(),
        },
    )
    .await
    .map_err(ToolError::from)?;

    let message = MessageBmc::get(ctx, mm, message_id)
        .await
        .map_err(ToolError::from)?;

    let to_names: Vec<String> = to.iter().map(|a| a.name.clone()).collect();
    let cc_names: Vec<String> = cc.iter().map(|a| a.name.clone()).collect();
    let bcc_names: Vec<String> = bcc.iter().map(|a| a.name.clone()).collect();
    let frontmatter = Frontmatter {
        id: message.id,
        thread_id: message.thread_id.clone(),
        project: project.human_key.clone(),
        project_slug: project.slug.clone(),
        from: sender.name.clone(),
        to: to_names.clone(),
        cc: cc_names.clone(),
        bcc: bcc_names.clone(),
        subject: message.subject.clone(),
        importance: message.importance.clone(),
        ack_required: message.ack_required,
        created: message.created_ts.and_utc().to_rfc3339(),
        attachments: processed.descriptors.clone(),
    };

    let recipient_names: Vec<String> = to_names
        .iter()
        .chain(cc_names.iter())
        .chain(bcc_names.iter())
        .cloned()
        .collect();
    let commit_message = archive::render_commit_panel(
        operation,
        &frontmatter,
        &recipient_names,
        call_start.elapsed().as_millis(),
    )
    .map_err(ToolError::from)?;

    {
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await.map_err(ToolError::from)?;
        let repo = repo_arc.lock().await;
        archive::write_message_bundle(
            &repo,
            &frontmatter,
            &processed.body_md,
            &recipient_names,
            &processed.files,
            now,
            &commit_message,
            &mm.author(),
        )
        .map_err(ToolError::from)?;
    }

    info!(
        message_id = message.id,
        sender = %sender.name,
        recipients = %recipient_names.join(", "),
        "message delivered"
    );

    let mut payload = message_payload(&message, true);
    payload["to"] = serde_json::json!(to_names);
    payload["cc"] = serde_json::json!(cc_names);
    payload["bcc"] = serde_json::json!(bcc_names);
    payload["attachments"] = serde_json::json!(attachments_meta);
    Ok(payload)
}

/// Apply contact gating over routed local recipients. Returns the names
/// still requiring approval (recoverable); a hard block errors immediately.
async fn gate_local_recipients(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project: &Project,
    sender: &Agent,
    routed: &RoutedRecipients,
    gate: &GateContext,
) -> Result<Vec<String>, ToolError> {
    let mut require: Vec<String> = Vec::new();
    for recipient in routed.local_agents() {
        match contact_policy::evaluate(ctx, mm, project, sender, recipient, gate)
            .await
            .map_err(ToolError::from)?
        {
            ContactDecision::Allow => {}
            ContactDecision::Require => require.push(recipient.name.clone()),
            ContactDecision::Blocked => {
                return Err(ToolError::new(
                    ErrorKind::ContactBlocked,
                    "Recipient is not accepting messages.",
                )
                .with_data(serde_json::json!({ "recipient": recipient.name })));
            }
        }
    }
    Ok(require)
}

/// Deliver to every external bucket, registering a sender alias in each
/// target project. External failures skip that target rather than aborting
/// the whole send.
async fn deliver_external(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    operation: &str,
    sender: &Agent,
    routed: &RoutedRecipients,
    subject: &str,
    body_md: &str,
    importance: &str,
    ack_required: bool,
    thread_id: Option<&String>,
    deliveries: &mut Vec<serde_json::Value>,
) {
    for bucket in routed.external.values() {
        let result: Result<serde_json::Value, ToolError> = async {
            let alias = AgentBmc::register(
                ctx,
                mm,
                AgentForCreate {
                    project_id: bucket.project.id,
                    name: Some(sender.name.clone()),
                    program: sender.program.clone(),
                    model: sender.model.clone(),
                    task_description: sender.task_description.clone(),
                },
            )
            .await
            .map_err(ToolError::from)?;

            let mut to_agents = Vec::new();
            for name in &bucket.to {
                to_agents
                    .push(helpers::resolve_agent(ctx, mm, bucket.project.id, name).await?);
            }
            let mut cc_agents = Vec::new();
            for name in &bucket.cc {
                cc_agents
                    .push(helpers::resolve_agent(ctx, mm, bucket.project.id, name).await?);
            }
            let mut bcc_agents = Vec::new();
            for name in &bucket.bcc {
                bcc_agents
                    .push(helpers::resolve_agent(ctx, mm, bucket.project.id, name).await?);
            }

            deliver_message(
                ctx,
                mm,
                operation,
                &bucket.project,
                &alias,
                &to_agents,
                &cc_agents,
                &bcc_agents,
                subject,
                body_md,
                &[],
                None,
                importance,
                ack_required,
                thread_id.cloned(),
            )
            .await
        }
        .await;

        match result {
            Ok(payload) => deliveries.push(serde_json::json!({
                "project": bucket.project.human_key,
                "payload": payload,
            })),
            Err(e) => {
                warn!(project = %bucket.project.human_key, error = %e, "external delivery skipped");
            }
        }
    }
}

/// Assemble the tool response from collected deliveries.
fn deliveries_result(deliveries: Vec<serde_json::Value>) -> serde_json::Value {
    // A lone structured error bubbles to the top level.
    if deliveries.len() == 1
        && let Some(error) = deliveries[0]
            .get("payload")
            .and_then(|p| p.get("error"))
            .cloned()
    {
        return serde_json::json!({ "error": error });
    }
    let mut result = serde_json::json!({
        "deliveries": deliveries,
        "count": deliveries.len(),
    });
    // Back-compat: a single local delivery exposes attachments top-level.
    if result["count"] == 1
        && let Some(attachments) = result["deliveries"][0]["payload"].get("attachments").cloned()
    {
        result["attachments"] = attachments;
    }
    result
}

pub async fn send_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SendMessageParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, sender) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.sender_name)
            .await?;

    let cc = params.cc.clone().unwrap_or_default();
    let bcc = params.bcc.clone().unwrap_or_default();
    if params.to.is_empty() && cc.is_empty() && bcc.is_empty() {
        return Err(ToolError::new(
            ErrorKind::InvalidArgument,
            "at least one recipient must be specified",
        ));
    }
    let routed =
        helpers::route_recipients(ctx, mm, &project, &sender, &params.to, &cc, &bcc).await?;

    let ack_required = params.ack_required.unwrap_or(false);
    let gate = GateContext {
        thread_key: params.thread_id.clone(),
        ack_required,
    };

    if mm.config.contact.enforcement_enabled {
        let mut require = gate_local_recipients(ctx, mm, &project, &sender, &routed, &gate).await?;

        if !require.is_empty() && params.auto_contact_if_blocked.unwrap_or(false) {
            // One automatic handshake per denied recipient, then a single
            // re-evaluation.
            let mut attempted = Vec::new();
            for name in &require {
                if contacts::auto_handshake(ctx, mm, &project, &sender, name)
                    .await
                    .is_ok()
                {
                    attempted.push(name.clone());
                }
            }
            if !attempted.is_empty() {
                require = gate_local_recipients(ctx, mm, &project, &sender, &routed, &gate).await?;
            }
        }

        if !require.is_empty() {
            require.sort();
            require.dedup();
            return Err(ToolError::new(
                ErrorKind::ContactRequired,
                "Recipient requires contact approval or recent context.",
            )
            .with_data(serde_json::json!({
                "recipients_blocked": require,
                "remedies": [
                    "Call request_contact(project_key, from_agent, to_agent) to request approval",
                    "Call macro_contact_handshake(project_key, requester, target, auto_accept=true) to automate",
                ],
            })));
        }
    }

    let importance = importance_or_default(params.importance.as_deref());
    let attachment_paths = params.attachment_paths.clone().unwrap_or_default();

    let mut deliveries = Vec::new();
    if !routed.local_is_empty() {
        let payload = deliver_message(
            ctx,
            mm,
            "send_message",
            &project,
            &sender,
            &routed.local_to,
            &routed.local_cc,
            &routed.local_bcc,
            &params.subject,
            &params.body_md,
            &attachment_paths,
            params.convert_images,
            &importance,
            ack_required,
            params.thread_id.clone(),
        )
        .await?;
        deliveries.push(serde_json::json!({
            "project": project.human_key,
            "payload": payload,
        }));
    }

    deliver_external(
        ctx,
        mm,
        "send_message",
        &sender,
        &routed,
        &params.subject,
        &params.body_md,
        &importance,
        ack_required,
        params.thread_id.as_ref(),
        &mut deliveries,
    )
    .await;

    Ok(deliveries_result(deliveries))
}

pub async fn reply_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ReplyMessageParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, sender) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.sender_name)
            .await?;
    let original = MessageBmc::get_in_project(ctx, mm, project.id, params.message_id)
        .await
        .map_err(ToolError::from)?;

    // Thread key: inherit, or seed from the original id.
    let thread_key = original
        .thread_id
        .clone()
        .unwrap_or_else(|| original.id.to_string());

    // Subject prefix applied once, case-insensitively.
    let prefix = params
        .subject_prefix
        .as_deref()
        .unwrap_or("Re:")
        .trim()
        .to_string();
    let subject = if prefix.is_empty()
        || original.subject.to_lowercase().starts_with(&prefix.to_lowercase())
    {
        original.subject.clone()
    } else {
        format!("{prefix} {}", original.subject)
    };

    let to = params
        .to
        .clone()
        .unwrap_or_else(|| vec![original.sender_name.clone()]);
    let cc = params.cc.clone().unwrap_or_default();
    let bcc = params.bcc.clone().unwrap_or_default();
    let routed = helpers::route_recipients(ctx, mm, &project, &sender, &to, &cc, &bcc).await?;

    // Same gate as a fresh send; the thread-participant heuristic covers
    // the usual reply-to-sender case.
    if mm.config.contact.enforcement_enabled {
        let gate = GateContext {
            thread_key: Some(thread_key.clone()),
            ack_required: original.ack_required,
        };
        let require = gate_local_recipients(ctx, mm, &project, &sender, &routed, &gate).await?;
        if !require.is_empty() {
            return Err(ToolError::new(
                ErrorKind::ContactRequired,
                "Recipient requires contact approval or recent context.",
            )
            .with_data(serde_json::json!({ "recipients_blocked": require })));
        }
    }

    let mut deliveries = Vec::new();
    if !routed.local_is_empty() {
        let payload = deliver_message(
            ctx,
            mm,
            "reply_message",
            &project,
            &sender,
            &routed.local_to,
            &routed.local_cc,
            &routed.local_bcc,
            &subject,
            &params.body_md,
            &[],
            None,
            &original.importance,
            original.ack_required,
            Some(thread_key.clone()),
        )
        .await?;
        deliveries.push(serde_json::json!({
            "project": project.human_key,
            "payload": payload,
        }));
    }

    deliver_external(
        ctx,
        mm,
        "reply_message",
        &sender,
        &routed,
        &subject,
        &params.body_md,
        &original.importance,
        original.ack_required,
        Some(&thread_key),
        &mut deliveries,
    )
    .await;

    let mut result = deliveries_result(deliveries);
    if result.get("error").is_none() {
        result["thread_id"] = serde_json::Value::String(thread_key);
        result["reply_to"] = serde_json::json!(params.message_id);
    }
    Ok(result)
}

pub async fn fetch_inbox_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: FetchInboxParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let include_bodies = params.include_bodies.unwrap_or(false);
    let filter = InboxFilter {
        urgent_only: params.urgent_only.unwrap_or(false),
        since_ts: parse_since(params.since_ts.as_deref())?,
        limit: params.limit.unwrap_or(20),
    };
    let items = MessageBmc::list_inbox(ctx, mm, project.id, agent.id, &filter)
        .await
        .map_err(ToolError::from)?;

    let payloads: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            let mut payload = message_payload(&item.message, include_bodies);
            payload["kind"] = serde_json::Value::String(item.kind.clone());
            payload
        })
        .collect();
    Ok(serde_json::json!(payloads))
}

pub async fn mark_message_read_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MessageStateParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    MessageBmc::get_in_project(ctx, mm, project.id, params.message_id)
        .await
        .map_err(ToolError::from)?;
    let read_ts = MessageBmc::mark_read(ctx, mm, params.message_id, agent.id)
        .await
        .map_err(ToolError::from)?;
    Ok(serde_json::json!({
        "message_id": params.message_id,
        "read": read_ts.is_some(),
        "read_at": read_ts.map(|ts| ts.and_utc().to_rfc3339()),
    }))
}

pub async fn acknowledge_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MessageStateParams,
) -> Result<serde_json::Value, ToolError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    MessageBmc::get_in_project(ctx, mm, project.id, params.message_id)
        .await
        .map_err(ToolError::from)?;
    let (read_ts, ack_ts) = MessageBmc::acknowledge(ctx, mm, params.message_id, agent.id)
        .await
        .map_err(ToolError::from)?;
    Ok(serde_json::json!({
        "message_id": params.message_id,
        "acknowledged": ack_ts.is_some(),
        "acknowledged_at": ack_ts.map(|ts| ts.and_utc().to_rfc3339()),
        "read_at": read_ts.map(|ts| ts.and_utc().to_rfc3339()),
    }))
}
