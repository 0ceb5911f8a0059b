//! Read-only resource surface.
//!
//! URIs follow `resource://<kind>/...` with optional query strings. Some
//! clients embed the query inside the last path segment
//! (`resource://inbox/BlueLake?project=x`), so the query split happens on
//! the whole URI before path segmentation.

use crate::errors::ToolError;
use crate::helpers;
use crate::tools::{WaggleService, messaging};
use rmcp::ErrorData as McpError;
use rmcp::model::{
    ListResourcesResult, RawResource, ReadResourceResult, Resource, ResourceContents,
};
use std::collections::HashMap;
use waggle_core::Ctx;
use waggle_core::model::agent::{Agent, AgentBmc};
use waggle_core::model::capabilities::CapabilityMap;
use waggle_core::model::file_reservation::FileReservationBmc;
use waggle_core::model::message::{InboxFilter, MessageBmc};
use waggle_core::model::project::{Project, ProjectBmc};
use waggle_core::model::project_sibling::ProjectSiblingBmc;
use waggle_core::model::tool_metric::ToolMetricBmc;
use waggle_core::store::{archive, git_store};

/// A parsed resource URI: path segments plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub segments: Vec<String>,
    pub query: HashMap<String, String>,
}

/// Parse `resource://a/b/c?k=v`, tolerating queries embedded in the last
/// path segment.
pub fn parse_resource_uri(uri: &str) -> Option<ParsedUri> {
    let rest = uri.strip_prefix("resource://")?;
    let (path, query_str) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let mut query = HashMap::new();
    if let Some(q) = query_str {
        for (key, value) in url::form_urlencoded::parse(q.as_bytes()) {
            query.insert(key.into_owned(), value.into_owned());
        }
    }
    Some(ParsedUri { segments, query })
}

fn query_bool(parsed: &ParsedUri, key: &str) -> bool {
    parsed
        .query
        .get(key)
        .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn query_i64(parsed: &ParsedUri, key: &str) -> Option<i64> {
    parsed.query.get(key).and_then(|v| v.parse().ok())
}

fn not_found(uri: &str) -> McpError {
    McpError::resource_not_found(
        format!("unknown resource: {uri}"),
        Some(serde_json::json!({ "uri": uri })),
    )
}

fn tool_error(err: ToolError) -> McpError {
    McpError::resource_not_found(err.to_string(), Some(err.payload()))
}

fn json_contents(uri: &str, value: &serde_json::Value) -> ReadResourceResult {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    ReadResourceResult {
        contents: vec![ResourceContents::TextResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text,
            meta: None,
        }],
    }
}

/// Resolve an agent either within an explicit `project` query parameter or,
/// when the name is unambiguous, across all projects.
async fn resolve_agent_flexibly(
    service: &WaggleService,
    ctx: &Ctx,
    parsed: &ParsedUri,
    agent_name: &str,
) -> Result<(Project, Agent), McpError> {
    let mm = service.mm();
    if let Some(project_key) = parsed.query.get("project") {
        return helpers::resolve_project_and_agent(ctx, mm, project_key, agent_name)
            .await
            .map_err(tool_error);
    }
    let mut matches = Vec::new();
    for project in ProjectBmc::list_all(ctx, mm).await.map_err(|e| tool_error(e.into()))? {
        if let Ok(agent) = AgentBmc::get_by_name(ctx, mm, project.id, agent_name).await {
            matches.push((project, agent));
        }
        if matches.len() > 1 {
            break;
        }
    }
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(McpError::resource_not_found(
            format!("agent '{agent_name}' not found in any project"),
            None,
        )),
        _ => Err(McpError::invalid_params(
            format!("agent '{agent_name}' exists in multiple projects; pass ?project="),
            None,
        )),
    }
}

pub async fn list_resources_impl(
    service: &WaggleService,
) -> Result<ListResourcesResult, McpError> {
    let ctx = Ctx::root_ctx();
    let mm = service.mm();
    let mut resources = vec![make_resource(
        "resource://projects",
        "Projects",
        "All projects in creation order",
    )];

    let projects = ProjectBmc::list_visible(&ctx, mm)
        .await
        .map_err(|e| tool_error(e.into()))?;
    for project in &projects {
        resources.push(make_resource(
            &format!("resource://project/{}", project.slug),
            &format!("Project: {}", project.slug),
            &format!("Detail for project '{}'", project.human_key),
        ));
        resources.push(make_resource(
            &format!("resource://agents/{}", project.slug),
            &format!("Agents ({})", project.slug),
            &format!("Agent directory with unread counts for '{}'", project.slug),
        ));
        resources.push(make_resource(
            &format!("resource://file_reservations/{}", project.slug),
            &format!("File reservations ({})", project.slug),
            &format!("Reservation list for '{}'", project.slug),
        ));

        let agents = AgentBmc::list_all_for_project(&ctx, mm, project.id)
            .await
            .map_err(|e| tool_error(e.into()))?;
        for agent in agents {
            resources.push(make_resource(
                &format!("resource://inbox/{}?project={}", agent.name, project.slug),
                &format!("Inbox: {} ({})", agent.name, project.slug),
                &format!("Inbox for agent '{}'", agent.name),
            ));
            resources.push(make_resource(
                &format!("resource://outbox/{}?project={}", agent.name, project.slug),
                &format!("Outbox: {} ({})", agent.name, project.slug),
                &format!("Outbox for agent '{}'", agent.name),
            ));
        }
    }

    resources.push(make_resource(
        "resource://tooling/directory",
        "Tooling directory",
        "Tool and resource inventory",
    ));

    Ok(ListResourcesResult {
        resources,
        next_cursor: None,
        meta: None,
    })
}

fn make_resource(uri: &str, name: &str, description: &str) -> Resource {
    Resource {
        raw: RawResource {
            uri: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: Some("application/json".to_string()),
            size: None,
            icons: None,
            meta: None,
            title: None,
        },
        annotations: None,
    }
}

pub async fn read_resource_impl(
    service: &WaggleService,
    uri: &str,
) -> Result<ReadResourceResult, McpError> {
    let parsed = parse_resource_uri(uri).ok_or_else(|| not_found(uri))?;
    let ctx = Ctx::root_ctx();
    let mm = service.mm();
    let segments: Vec<&str> = parsed.segments.iter().map(String::as_str).collect();

    match segments.as_slice() {
        ["projects"] => {
            // Best-effort sibling re-scoring; listing never fails on it.
            if let Err(e) = ProjectSiblingBmc::refresh_suggestions(
                &ctx,
                mm,
                waggle_core::model::project_sibling::MIN_SUGGESTION_SCORE,
            )
            .await
            {
                tracing::debug!(error = %e, "sibling refresh skipped");
            }
            let projects = ProjectBmc::list_visible(&ctx, mm)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let payload: Vec<serde_json::Value> = projects
                .iter()
                .map(crate::tools::project::project_payload)
                .collect();
            Ok(json_contents(uri, &serde_json::json!(payload)))
        }

        ["project", slug] => {
            let project = ProjectBmc::get_by_identifier(&ctx, mm, slug)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let agents = AgentBmc::list_all_for_project(&ctx, mm, project.id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let siblings = ProjectSiblingBmc::list_for_project(&ctx, mm, project.id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let mut payload = crate::tools::project::project_payload(&project);
            payload["agents"] = serde_json::json!(
                agents
                    .iter()
                    .map(crate::tools::agent::agent_payload)
                    .collect::<Vec<_>>()
            );
            payload["siblings"] = serde_json::to_value(&siblings).unwrap_or_default();
            Ok(json_contents(uri, &payload))
        }

        ["agents", project_key] => {
            let project = ProjectBmc::get_by_identifier(&ctx, mm, project_key)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let agents = AgentBmc::list_all_for_project(&ctx, mm, project.id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let unread = AgentBmc::unread_counts(&ctx, mm, project.id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let payload: Vec<serde_json::Value> = agents
                .iter()
                .map(|agent| {
                    let mut p = crate::tools::agent::agent_payload(agent);
                    p["unread_count"] = serde_json::json!(unread.get(&agent.id).copied().unwrap_or(0));
                    p
                })
                .collect();
            Ok(json_contents(
                uri,
                &serde_json::json!({
                    "project": project.human_key,
                    "agents": payload,
                }),
            ))
        }

        ["inbox", agent_name] => {
            let (project, agent) =
                resolve_agent_flexibly(service, &ctx, &parsed, agent_name).await?;
            let filter = InboxFilter {
                urgent_only: query_bool(&parsed, "urgent_only"),
                since_ts: parsed.query.get("since_ts").and_then(|raw| {
                    chrono::DateTime::parse_from_rfc3339(raw)
                        .map(|ts| ts.naive_utc())
                        .ok()
                }),
                limit: query_i64(&parsed, "limit").unwrap_or(20),
            };
            let include_bodies = query_bool(&parsed, "include_bodies");
            let items = MessageBmc::list_inbox(&ctx, mm, project.id, agent.id, &filter)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let payload: Vec<serde_json::Value> = items
                .iter()
                .map(|item| {
                    let mut p = messaging::message_payload(&item.message, include_bodies);
                    p["kind"] = serde_json::Value::String(item.kind.clone());
                    p
                })
                .collect();
            Ok(json_contents(uri, &serde_json::json!(payload)))
        }

        ["outbox", agent_name] => {
            let (project, agent) =
                resolve_agent_flexibly(service, &ctx, &parsed, agent_name).await?;
            let since = parsed.query.get("since_ts").and_then(|raw| {
                chrono::DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.naive_utc())
                    .ok()
            });
            let include_bodies = query_bool(&parsed, "include_bodies");
            let messages = MessageBmc::list_outbox(
                &ctx,
                mm,
                project.id,
                agent.id,
                since,
                query_i64(&parsed, "limit").unwrap_or(20),
            )
            .await
            .map_err(|e| tool_error(e.into()))?;
            let mut payloads = Vec::new();
            for message in &messages {
                let mut p = messaging::message_payload(message, include_bodies);
                let recipients = MessageBmc::recipients(&ctx, mm, message.id)
                    .await
                    .map_err(|e| tool_error(e.into()))?;
                let pick = |kind: &str| {
                    recipients
                        .iter()
                        .filter(|r| r.kind == kind)
                        .map(|r| r.agent_name.clone())
                        .collect::<Vec<_>>()
                };
                p["to"] = serde_json::json!(pick("to"));
                p["cc"] = serde_json::json!(pick("cc"));
                p["bcc"] = serde_json::json!(pick("bcc"));
                payloads.push(p);
            }
            Ok(json_contents(uri, &serde_json::json!(payloads)))
        }

        ["mailbox", agent_name] => {
            mailbox_payload(service, &ctx, &parsed, uri, agent_name, false).await
        }

        ["mailbox-with-commits", agent_name] => {
            mailbox_payload(service, &ctx, &parsed, uri, agent_name, true).await
        }

        ["message", id] => {
            let message_id: i64 = id.parse().map_err(|_| not_found(uri))?;
            let message = match parsed.query.get("project") {
                Some(project_key) => {
                    let project = ProjectBmc::get_by_identifier(&ctx, mm, project_key)
                        .await
                        .map_err(|e| tool_error(e.into()))?;
                    MessageBmc::get_in_project(&ctx, mm, project.id, message_id)
                        .await
                        .map_err(|e| tool_error(e.into()))?
                }
                None => MessageBmc::get(&ctx, mm, message_id)
                    .await
                    .map_err(|e| tool_error(e.into()))?,
            };
            let mut payload = messaging::message_payload(&message, true);
            let recipients = MessageBmc::recipients(&ctx, mm, message.id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            payload["recipients"] = serde_json::to_value(&recipients).unwrap_or_default();
            Ok(json_contents(uri, &payload))
        }

        ["thread", thread_id] => {
            let project_key = parsed
                .query
                .get("project")
                .ok_or_else(|| McpError::invalid_params("thread resource requires ?project=", None))?;
            let project = ProjectBmc::get_by_identifier(&ctx, mm, project_key)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let include_bodies = query_bool(&parsed, "include_bodies");
            let messages = MessageBmc::list_thread(&ctx, mm, project.id, thread_id)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let payload: Vec<serde_json::Value> = messages
                .iter()
                .map(|m| messaging::message_payload(m, include_bodies))
                .collect();
            Ok(json_contents(
                uri,
                &serde_json::json!({ "thread_id": thread_id, "messages": payload }),
            ))
        }

        ["file_reservations", slug] => {
            let project = ProjectBmc::get_by_identifier(&ctx, mm, slug)
                .await
                .map_err(|e| tool_error(e.into()))?;
            let held = if query_bool(&parsed, "active_only") {
                FileReservationBmc::list_active(&ctx, mm, project.id).await
            } else {
                FileReservationBmc::list_all(&ctx, mm, project.id).await
            }
            .map_err(|e| tool_error(e.into()))?;
            let payload: Vec<serde_json::Value> = held
                .iter()
                .map(|h| {
                    serde_json::json!({
                        "id": h.reservation.id,
                        "agent": h.holder_name,
                        "path_pattern": h.reservation.path_pattern,
                        "exclusive": h.reservation.exclusive,
                        "reason": h.reservation.reason,
                        "created_ts": h.reservation.created_ts.and_utc().to_rfc3339(),
                        "expires_ts": h.reservation.expires_ts.and_utc().to_rfc3339(),
                        "released_ts": h.reservation.released_ts.map(|ts| ts.and_utc().to_rfc3339()),
                    })
                })
                .collect();
            Ok(json_contents(uri, &serde_json::json!(payload)))
        }

        ["views", view, agent_name] => {
            let (project, agent) =
                resolve_agent_flexibly(service, &ctx, &parsed, agent_name).await?;
            let limit = query_i64(&parsed, "limit").unwrap_or(20);
            let items = match *view {
                "urgent-unread" => {
                    MessageBmc::list_urgent_unread(&ctx, mm, project.id, agent.id, limit).await
                }
                "ack-required" => {
                    MessageBmc::list_ack_pending(&ctx, mm, project.id, agent.id, None, limit).await
                }
                "acks-stale" => {
                    let ttl = query_i64(&parsed, "ttl_seconds")
                        .map(|v| v as u64)
                        .unwrap_or(mm.config.identity.ack_ttl_seconds);
                    MessageBmc::list_ack_pending(&ctx, mm, project.id, agent.id, Some(ttl), limit)
                        .await
                }
                "ack-overdue" => {
                    let minutes = query_i64(&parsed, "minutes").unwrap_or(60).max(0) as u64;
                    MessageBmc::list_ack_pending(
                        &ctx,
                        mm,
                        project.id,
                        agent.id,
                        Some(minutes * 60),
                        limit,
                    )
                    .await
                }
                _ => return Err(not_found(uri)),
            }
            .map_err(|e| tool_error(e.into()))?;

            let payload: Vec<serde_json::Value> = items
                .iter()
                .map(|item| {
                    let mut p = messaging::message_payload(&item.message, false);
                    p["kind"] = serde_json::Value::String(item.kind.clone());
                    p
                })
                .collect();
            Ok(json_contents(
                uri,
                &serde_json::json!({
                    "project": project.human_key,
                    "agent": agent.name,
                    "count": payload.len(),
                    "messages": payload,
                }),
            ))
        }

        ["tooling", rest @ ..] => tooling_resource(service, &ctx, &parsed, uri, rest).await,

        _ => Err(not_found(uri)),
    }
}

async fn mailbox_payload(
    service: &WaggleService,
    ctx: &Ctx,
    parsed: &ParsedUri,
    uri: &str,
    agent_name: &str,
    with_commits: bool,
) -> Result<ReadResourceResult, McpError> {
    let mm = service.mm();
    let (project, agent) = resolve_agent_flexibly(service, ctx, parsed, agent_name).await?;
    let filter = InboxFilter {
        urgent_only: false,
        since_ts: None,
        limit: query_i64(parsed, "limit").unwrap_or(20),
    };
    let items = MessageBmc::list_inbox(ctx, mm, project.id, agent.id, &filter)
        .await
        .map_err(|e| tool_error(e.into()))?;

    let mut payloads = Vec::new();
    for item in &items {
        let mut p = messaging::message_payload(&item.message, false);
        p["kind"] = serde_json::Value::String(item.kind.clone());
        if with_commits {
            let created = item.message.created_ts.and_utc();
            let commit = {
                let _git_guard = mm.git_lock.lock().await;
                let repo_arc = mm.get_repo().await.map_err(|e| tool_error(e.into()))?;
                let repo = repo_arc.lock().await;
                let workdir = repo.workdir().map(std::path::Path::to_path_buf);
                workdir
                    .and_then(|wd| {
                        archive::find_canonical_relpath(&wd, &project.slug, created, item.message.id)
                    })
                    .and_then(|rel| git_store::last_commit_for_path(&repo, &rel).ok().flatten())
            };
            p["commit"] = match commit {
                Some(info) => serde_json::json!({
                    "sha": info.short_sha,
                    "summary": info.summary,
                    "authored_ts": info.authored_ts,
                }),
                None => serde_json::Value::Null,
            };
        }
        payloads.push(p);
    }

    Ok(json_contents(
        uri,
        &serde_json::json!({
            "project": project.human_key,
            "agent": agent.name,
            "messages": payloads,
        }),
    ))
}

async fn tooling_resource(
    service: &WaggleService,
    ctx: &Ctx,
    _parsed: &ParsedUri,
    uri: &str,
    rest: &[&str],
) -> Result<ReadResourceResult, McpError> {
    let mm = service.mm();
    match rest {
        ["directory"] => {
            let resources = list_resources_impl(service).await?;
            let payload: Vec<serde_json::Value> = resources
                .resources
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "uri": r.raw.uri,
                        "name": r.raw.name,
                        "description": r.raw.description,
                    })
                })
                .collect();
            Ok(json_contents(uri, &serde_json::json!(payload)))
        }
        ["schemas"] => {
            let tools = service.tool_schemas();
            Ok(json_contents(uri, &tools))
        }
        ["metrics"] => {
            let snapshot = ToolMetricBmc::snapshot(ctx, mm)
                .await
                .map_err(|e| tool_error(e.into()))?;
            Ok(json_contents(
                uri,
                &serde_json::to_value(&snapshot).unwrap_or_default(),
            ))
        }
        ["locks"] => {
            let owner = mm.archive_lock_status().await;
            Ok(json_contents(
                uri,
                &serde_json::json!({
                    "archive_lock": owner.map(|o| serde_json::json!({
                        "pid": o.pid,
                        "agent": o.agent,
                        "hostname": o.hostname,
                        "since": o.timestamp.to_rfc3339(),
                    })),
                }),
            ))
        }
        ["capabilities", agent_name] => {
            let map = CapabilityMap::global(mm.config.identity.capabilities_file.as_deref());
            let capabilities: Vec<String> = map
                .capabilities_for(Some(agent_name), None)
                .into_iter()
                .collect();
            Ok(json_contents(
                uri,
                &serde_json::json!({ "agent": agent_name, "capabilities": capabilities }),
            ))
        }
        ["recent", window] => {
            let window_seconds: i64 = window.parse().map_err(|_| not_found(uri))?;
            let entries = service.recent_usage(Some(window_seconds));
            Ok(json_contents(
                uri,
                &serde_json::to_value(&entries).unwrap_or_default(),
            ))
        }
        _ => Err(not_found(uri)),
    }
}
