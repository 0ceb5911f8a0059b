//! Shared resolution helpers for tools.
//!
//! Project/agent lookups with structured errors, and recipient routing:
//! normalization (trim, case-insensitive dedupe preserving order), the two
//! external addressing forms (`project:<id>#<AgentName>` and
//! `<AgentName>@<project-id>`), and the local/external split backed by
//! approved contact links.

use crate::errors::{ErrorKind, ToolError};
use std::collections::BTreeMap;
use waggle_core::Ctx;
use waggle_core::model::ModelManager;
use waggle_core::model::agent::{Agent, AgentBmc};
use waggle_core::model::agent_link::AgentLinkBmc;
use waggle_core::model::project::{Project, ProjectBmc};
use waggle_core::utils::validation::{validate_agent_name, validate_project_key};

/// Resolve a project by identifier, validating the key format first.
pub async fn resolve_project(
    ctx: &Ctx,
    mm: &ModelManager,
    project_key: &str,
) -> Result<Project, ToolError> {
    if let Err(e) = validate_project_key(project_key) {
        return Err(ToolError::new(ErrorKind::InvalidArgument, e.to_string())
            .with_data(e.context()));
    }
    ProjectBmc::get_by_identifier(ctx, mm, project_key)
        .await
        .map_err(ToolError::from)
}

/// Resolve an agent by name within a project.
///
/// The token is charset-validated before the lookup so malformed input
/// fails as INVALID_ARGUMENT with a sanitized suggestion rather than a
/// misleading not-found.
pub async fn resolve_agent(
    ctx: &Ctx,
    mm: &ModelManager,
    project_id: i64,
    agent_name: &str,
) -> Result<Agent, ToolError> {
    if let Err(e) = validate_agent_name(agent_name.trim()) {
        return Err(ToolError::new(ErrorKind::InvalidArgument, e.to_string())
            .with_data(e.context()));
    }
    AgentBmc::get_by_name(ctx, mm, project_id, agent_name)
        .await
        .map_err(ToolError::from)
}

/// Resolve project and agent in one call.
pub async fn resolve_project_and_agent(
    ctx: &Ctx,
    mm: &ModelManager,
    project_key: &str,
    agent_name: &str,
) -> Result<(Project, Agent), ToolError> {
    let project = resolve_project(ctx, mm, project_key).await?;
    let agent = resolve_agent(ctx, mm, project.id, agent_name).await?;
    Ok((project, agent))
}

/// Deduplicate recipient tokens, preserving order, case-insensitively.
pub fn normalize_recipients(raw: &[String]) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = trimmed.to_lowercase();
        if seen.insert(key) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// An external addressing override parsed from a recipient token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAddress {
    pub agent_fragment: String,
    pub project_identifier: String,
}

/// Parse `project:<id>#<Name>` or `<Name>@<project-id>`; `None` for plain
/// local names.
pub fn parse_external_address(token: &str) -> Option<ExternalAddress> {
    if let Some(rest) = token.strip_prefix("project:")
        && let Some((project_part, agent_part)) = rest.split_once('#')
    {
        return Some(ExternalAddress {
            agent_fragment: agent_part.trim().to_string(),
            project_identifier: project_part.trim().to_string(),
        });
    }
    if let Some((name_part, project_part)) = token.split_once('@')
        && !name_part.trim().is_empty()
        && !project_part.trim().is_empty()
    {
        return Some(ExternalAddress {
            agent_fragment: name_part.trim().to_string(),
            project_identifier: project_part.trim().to_string(),
        });
    }
    None
}

/// Recipients grouped per external target project.
#[derive(Debug, Clone)]
pub struct ExternalBucket {
    pub project: Project,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// Outcome of routing all recipient lists.
#[derive(Debug, Default)]
pub struct RoutedRecipients {
    pub local_to: Vec<Agent>,
    pub local_cc: Vec<Agent>,
    pub local_bcc: Vec<Agent>,
    pub external: BTreeMap<i64, ExternalBucket>,
}

impl RoutedRecipients {
    pub fn local_is_empty(&self) -> bool {
        self.local_to.is_empty() && self.local_cc.is_empty() && self.local_bcc.is_empty()
    }

    pub fn local_agents(&self) -> impl Iterator<Item = &Agent> {
        self.local_to
            .iter()
            .chain(self.local_cc.iter())
            .chain(self.local_bcc.iter())
    }
}

/// Route recipient lists into local vs external buckets.
///
/// A recipient is local iff it resolves to an agent in the sender's
/// project; otherwise it must resolve via an approved outbound link
/// (optionally pinned by explicit addressing). Anything unresolvable fails
/// fast with RECIPIENT_NOT_FOUND naming every missing identifier.
pub async fn route_recipients(
    ctx: &Ctx,
    mm: &ModelManager,
    project: &Project,
    sender: &Agent,
    to: &[String],
    cc: &[String],
    bcc: &[String],
) -> Result<RoutedRecipients, ToolError> {
    let mut routed = RoutedRecipients::default();
    let mut unknown_local: Vec<String> = Vec::new();
    let mut unknown_external: Vec<(String, String)> = Vec::new();

    for (kind, list) in [("to", to), ("cc", cc), ("bcc", bcc)] {
        for token in normalize_recipients(list) {
            let external = parse_external_address(&token);

            if let Some(address) = external {
                // Explicit addressing may still point at the local project.
                match ProjectBmc::get_by_identifier(ctx, mm, &address.project_identifier).await {
                    Ok(target_project) if target_project.id == project.id => {
                        match AgentBmc::get_by_name(ctx, mm, project.id, &address.agent_fragment)
                            .await
                        {
                            Ok(agent) => routed_push_local(&mut routed, kind, agent),
                            Err(_) => unknown_local.push(token.clone()),
                        }
                    }
                    Ok(target_project) => {
                        match AgentLinkBmc::find_approved_target(
                            ctx,
                            mm,
                            project.id,
                            sender.id,
                            &address.agent_fragment,
                            Some(target_project.id),
                        )
                        .await
                        .map_err(ToolError::from)?
                        {
                            Some((_link, target_project_id, _agent_id, canonical_name)) => {
                                push_external(
                                    ctx,
                                    mm,
                                    &mut routed,
                                    kind,
                                    target_project_id,
                                    canonical_name,
                                )
                                .await?;
                            }
                            None => unknown_external
                                .push((target_project.human_key.clone(), token.clone())),
                        }
                    }
                    Err(_) => {
                        unknown_external.push((address.project_identifier.clone(), token.clone()))
                    }
                }
                continue;
            }

            // Self-sends are always local.
            if token.eq_ignore_ascii_case(&sender.name) {
                routed_push_local(&mut routed, kind, sender.clone());
                continue;
            }

            match AgentBmc::get_by_name(ctx, mm, project.id, &token).await {
                Ok(agent) => routed_push_local(&mut routed, kind, agent),
                Err(_) => {
                    // Not local: try an approved outbound link anywhere.
                    match AgentLinkBmc::find_approved_target(
                        ctx, mm, project.id, sender.id, &token, None,
                    )
                    .await
                    .map_err(ToolError::from)?
                    {
                        Some((_link, target_project_id, _agent_id, canonical_name)) => {
                            push_external(ctx, mm, &mut routed, kind, target_project_id, canonical_name)
                                .await?;
                        }
                        None => unknown_local.push(token.clone()),
                    }
                }
            }
        }
    }

    if !unknown_local.is_empty() || !unknown_external.is_empty() {
        let mut parts: Vec<String> = Vec::new();
        if !unknown_local.is_empty() {
            parts.push(format!(
                "local recipients {} are not registered in project '{}'",
                unknown_local.join(", "),
                project.human_key
            ));
        }
        if !unknown_external.is_empty() {
            let formatted: Vec<String> = unknown_external
                .iter()
                .map(|(label, name)| format!("{name} @ {label}"))
                .collect();
            parts.push(format!(
                "external recipients missing approved contact links: {}",
                formatted.join("; ")
            ));
        }
        let hint = format!(
            "Use resource://agents/{} to list registered agents or register new identities.",
            project.slug
        );
        let unknown_external_json: Vec<serde_json::Value> = unknown_external
            .iter()
            .map(|(label, name)| serde_json::json!({ "project": label, "recipient": name }))
            .collect();
        return Err(ToolError::new(
            ErrorKind::RecipientNotFound,
            format!("Unable to send message — {}; {hint}", parts.join("; ")),
        )
        .with_data(serde_json::json!({
            "unknown_local": unknown_local,
            "unknown_external": unknown_external_json,
            "hint": hint,
        })));
    }

    Ok(routed)
}

fn routed_push_local(routed: &mut RoutedRecipients, kind: &str, agent: Agent) {
    // A recipient appears at most once per message; first kind wins.
    if routed.local_agents().any(|a| a.id == agent.id) {
        return;
    }
    match kind {
        "cc" => routed.local_cc.push(agent),
        "bcc" => routed.local_bcc.push(agent),
        _ => routed.local_to.push(agent),
    }
}

async fn push_external(
    ctx: &Ctx,
    mm: &ModelManager,
    routed: &mut RoutedRecipients,
    kind: &str,
    target_project_id: i64,
    canonical_name: String,
) -> Result<(), ToolError> {
    if let std::collections::btree_map::Entry::Vacant(entry) =
        routed.external.entry(target_project_id)
    {
        let target_project = ProjectBmc::get(ctx, mm, target_project_id)
            .await
            .map_err(ToolError::from)?;
        entry.insert(ExternalBucket {
            project: target_project,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
        });
    }
    if let Some(bucket) = routed.external.get_mut(&target_project_id) {
        match kind {
            "cc" => bucket.cc.push(canonical_name),
            "bcc" => bucket.bcc.push(canonical_name),
            _ => bucket.to.push(canonical_name),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_dedupes_case_insensitively_preserving_order() {
        let input = vec![
            "BlueLake".to_string(),
            " bluelake ".to_string(),
            "GreenCastle".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_recipients(&input), vec!["BlueLake", "GreenCastle"]);
    }

    #[test]
    fn parses_project_hash_form() {
        let addr = parse_external_address("project:/data/projects/api#BlueLake");
        assert_eq!(
            addr,
            Some(ExternalAddress {
                agent_fragment: "BlueLake".to_string(),
                project_identifier: "/data/projects/api".to_string(),
            })
        );
    }

    #[test]
    fn parses_at_form() {
        let addr = parse_external_address("BlueLake@data-projects-api");
        assert_eq!(
            addr,
            Some(ExternalAddress {
                agent_fragment: "BlueLake".to_string(),
                project_identifier: "data-projects-api".to_string(),
            })
        );
    }

    #[test]
    fn plain_names_are_not_external() {
        assert_eq!(parse_external_address("BlueLake"), None);
        assert_eq!(parse_external_address("@"), None);
        assert_eq!(parse_external_address("name@"), None);
    }
}
