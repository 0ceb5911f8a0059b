//! Contact-policy gating.
//!
//! Decides, for one candidate send from S to recipient R, whether the
//! message may pass. Policies: `open` always allows, `block_all` always
//! denies hard, `contacts_only` needs an approved unexpired link, and
//! `auto` adds heuristics on top of `contacts_only`:
//!
//! 1. self-sends always pass
//! 2. R already participates in the referenced thread
//! 3. S and R hold overlapping active reservations
//! 4. prior S↔R traffic within the configured TTL window
//! 5. ack-required messages pass (they are themselves the contact request)
//!
//! A blocked link overrides every heuristic.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::agent::Agent;
use crate::model::agent_link::{AgentLinkBmc, LinkEndpoints};
use crate::model::file_reservation::FileReservationBmc;
use crate::model::message::MessageBmc;
use crate::model::project::Project;
use crate::utils::pathspec;
use chrono::{Duration, Utc};

/// Outcome of gating one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactDecision {
    Allow,
    /// Recoverable denial: a link or prior context is required.
    Require,
    /// Hard denial: recipient blocks all inbound traffic, or the link is
    /// explicitly blocked.
    Blocked,
}

/// Send-scoped inputs to the gate.
#[derive(Debug, Clone, Default)]
pub struct GateContext {
    pub thread_key: Option<String>,
    pub ack_required: bool,
}

/// Evaluate the contact gate for one (sender, recipient) pair within a
/// project. Enforcement being disabled short-circuits at the caller.
pub async fn evaluate(
    ctx: &Ctx,
    mm: &ModelManager,
    project: &Project,
    sender: &Agent,
    recipient: &Agent,
    gate: &GateContext,
) -> Result<ContactDecision> {
    // Rule 1: self.
    if sender.id == recipient.id {
        return Ok(ContactDecision::Allow);
    }

    let endpoints = LinkEndpoints {
        a_project_id: sender.project_id,
        a_agent_id: sender.id,
        b_project_id: recipient.project_id,
        b_agent_id: recipient.id,
    };
    let link = AgentLinkBmc::get(mm, endpoints).await?;

    // A blocked link overrides heuristics regardless of policy.
    if link.as_ref().is_some_and(|l| l.is_blocked()) {
        return Ok(ContactDecision::Blocked);
    }

    let policy = recipient.contact_policy.to_lowercase();
    match policy.as_str() {
        "open" => return Ok(ContactDecision::Allow),
        "block_all" => return Ok(ContactDecision::Blocked),
        _ => {}
    }

    let now = Utc::now().naive_utc();
    if link.is_some_and(|l| l.is_approved(now)) {
        return Ok(ContactDecision::Allow);
    }

    // Rule 5: an ack-required message is itself the contact request.
    if gate.ack_required {
        return Ok(ContactDecision::Allow);
    }

    if policy != "auto" {
        // contacts_only without a link.
        return Ok(ContactDecision::Require);
    }

    // Rule 2: thread participant.
    if let Some(thread_key) = &gate.thread_key {
        let participants =
            MessageBmc::thread_participants(ctx, mm, project.id, thread_key).await?;
        if participants
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&recipient.name))
        {
            return Ok(ContactDecision::Allow);
        }
    }

    // Rule 3: overlapping active reservations.
    let sender_patterns =
        FileReservationBmc::active_patterns_for_agent(ctx, mm, project.id, sender.id).await?;
    if !sender_patterns.is_empty() {
        let recipient_patterns =
            FileReservationBmc::active_patterns_for_agent(ctx, mm, project.id, recipient.id)
                .await?;
        if pathspec::pattern_sets_overlap(&sender_patterns, &recipient_patterns) {
            return Ok(ContactDecision::Allow);
        }
    }

    // Rule 4: recent prior contact within the TTL window.
    let ttl = Duration::seconds(mm.config.contact.auto_ttl_seconds as i64);
    let since = now - ttl;
    if MessageBmc::recent_contact_between(ctx, mm, project.id, sender.id, recipient.id, since)
        .await?
    {
        return Ok(ContactDecision::Allow);
    }

    Ok(ContactDecision::Require)
}
