//! Tool parameter types.
//!
//! Typed parameter structs keep argument binding at the schema layer:
//! recipient lists are real lists (non-string items fail deserialization
//! before the pipeline runs), and aliases cover the argument spellings
//! clients already use.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnsureProjectParams {
    /// Absolute path of the project directory (the human key)
    pub human_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterAgentParams {
    /// Project identifier (human key or slug)
    pub project_key: String,
    /// Agent runtime program (e.g., "claude-code", "codex-cli")
    pub program: String,
    /// Model identifier (e.g., "opus-4.1", "gpt5-codex")
    pub model: String,
    /// Adjective+noun agent name; omit to auto-generate (recommended)
    #[serde(default, alias = "agent_name")]
    pub name: Option<String>,
    /// Short description of the agent's current focus
    #[serde(default)]
    pub task_description: String,
    /// Attachment handling: auto | inline | file
    #[serde(default)]
    pub attachments_policy: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateAgentIdentityParams {
    /// Project identifier (human key or slug)
    pub project_key: String,
    pub program: String,
    pub model: String,
    #[serde(default)]
    pub task_description: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WhoisParams {
    pub project_key: String,
    pub agent_name: String,
    /// Include recent archive commits touching the agent's mailboxes
    #[serde(default)]
    pub include_recent_commits: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetContactPolicyParams {
    pub project_key: String,
    pub agent_name: String,
    /// open | auto | contacts_only | block_all
    pub policy: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendMessageParams {
    pub project_key: String,
    pub sender_name: String,
    /// Primary recipients (agent names; `project:<id>#<Name>` and
    /// `<Name>@<project-id>` address other projects)
    pub to: Vec<String>,
    pub subject: String,
    /// GitHub-Flavored Markdown body
    pub body_md: String,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub bcc: Option<Vec<String>>,
    /// low | normal | high | urgent
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: Option<bool>,
    /// Thread key to continue an existing conversation
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Extra file paths to attach
    #[serde(default)]
    pub attachment_paths: Option<Vec<String>>,
    /// Overrides the server default for image conversion/inlining
    #[serde(default)]
    pub convert_images: Option<bool>,
    /// Attempt an automatic contact handshake if gating denies
    #[serde(default)]
    pub auto_contact_if_blocked: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReplyMessageParams {
    pub project_key: String,
    pub message_id: i64,
    pub sender_name: String,
    pub body_md: String,
    /// Defaults to the original sender
    #[serde(default)]
    pub to: Option<Vec<String>>,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub bcc: Option<Vec<String>>,
    /// Prefix applied to the subject once, case-insensitively
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchInboxParams {
    pub project_key: String,
    pub agent_name: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub urgent_only: Option<bool>,
    #[serde(default)]
    pub include_bodies: Option<bool>,
    /// ISO-8601 cutoff; only strictly newer messages are returned
    #[serde(default)]
    pub since_ts: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MessageStateParams {
    pub project_key: String,
    pub agent_name: String,
    pub message_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RequestContactParams {
    pub project_key: String,
    pub from_agent: String,
    pub to_agent: String,
    /// Target project when different from the caller's
    #[serde(default)]
    pub to_project: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Auto-register the target identity when it has a valid name format
    #[serde(default)]
    pub register_if_missing: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondContactParams {
    pub project_key: String,
    /// The recipient of the original request (the approver)
    pub to_agent: String,
    /// The requester
    pub from_agent: String,
    pub accept: bool,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub from_project: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListContactsParams {
    pub project_key: String,
    pub agent_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReserveFilePathsParams {
    pub project_key: String,
    pub agent_name: String,
    /// Project-relative paths or globs (e.g., "app/api/*.py")
    pub paths: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Exclusive intent (default) vs shared observation
    #[serde(default)]
    pub exclusive: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReleaseReservationsParams {
    pub project_key: String,
    pub agent_name: String,
    /// Restrict release to these path patterns
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Restrict release to these reservation ids
    #[serde(default, alias = "file_reservation_ids")]
    pub reservation_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenewReservationsParams {
    pub project_key: String,
    pub agent_name: String,
    /// Seconds to extend from the later of now or current expiry
    #[serde(default)]
    pub extend_seconds: Option<u64>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(default, alias = "file_reservation_ids")]
    pub reservation_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMessagesParams {
    pub project_key: String,
    /// FTS5 query: phrases ("build plan"), prefix (mig*), boolean (a AND b)
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SummarizeThreadParams {
    pub project_key: String,
    pub thread_id: String,
    /// Include up to 3 sample messages
    #[serde(default)]
    pub include_examples: Option<bool>,
    /// Allow LLM refinement when the capability is enabled
    #[serde(default)]
    pub llm_mode: Option<bool>,
    #[serde(default)]
    pub llm_model: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SummarizeThreadsParams {
    pub project_key: String,
    pub thread_ids: Vec<String>,
    #[serde(default)]
    pub llm_mode: Option<bool>,
    #[serde(default)]
    pub llm_model: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroStartSessionParams {
    /// Absolute project path; created on first use
    pub human_key: String,
    pub program: String,
    pub model: String,
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub reservation_paths: Option<Vec<String>>,
    #[serde(default)]
    pub reservation_reason: Option<String>,
    #[serde(default)]
    pub reservation_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub inbox_limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroPrepareThreadParams {
    pub project_key: String,
    pub thread_id: String,
    pub program: String,
    pub model: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub task_description: String,
    #[serde(default)]
    pub register_if_missing: Option<bool>,
    #[serde(default)]
    pub include_examples: Option<bool>,
    #[serde(default)]
    pub inbox_limit: Option<i64>,
    #[serde(default)]
    pub llm_mode: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroReservationCycleParams {
    pub project_key: String,
    pub agent_name: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub exclusive: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Release the reservations again at the end of the call
    #[serde(default)]
    pub auto_release: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroContactHandshakeParams {
    pub project_key: String,
    #[serde(alias = "agent_name")]
    pub requester: String,
    #[serde(alias = "to_agent")]
    pub target: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Approve on behalf of the target
    #[serde(default)]
    pub auto_accept: Option<bool>,
    #[serde(default)]
    pub welcome_subject: Option<String>,
    #[serde(default)]
    pub welcome_body: Option<String>,
    #[serde(default)]
    pub to_project: Option<String>,
    #[serde(default)]
    pub register_if_missing: Option<bool>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InstallGuardParams {
    /// Workspace directory containing the .git to hook
    pub workspace_path: String,
    pub project_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UninstallGuardParams {
    pub workspace_path: String,
}
