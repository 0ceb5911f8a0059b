//! MCP tool surface for Waggle.
//!
//! [`WaggleService`] wires every tool into an rmcp `ToolRouter`. The
//! `call_tool` override resolves legacy aliases, enforces capability
//! requirements, and records per-call metrics plus a bounded ring of recent
//! invocations for the tooling resources.

use rmcp::{
    ErrorData as McpError,
    handler::server::{ServerHandler, tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, ListResourcesResult, ListToolsResult,
        PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use waggle_common::WaggleConfig;
use waggle_core::llm::LlmClient;
use waggle_core::model::capabilities::CapabilityMap;
use waggle_core::model::tool_metric::{ToolMetricBmc, ToolMetricForCreate};
use waggle_core::model::{ModelManager, agent::AgentBmc, project::ProjectBmc};
use waggle_core::{Ctx, Result as CoreResult};

pub mod agent;
pub mod contacts;
pub mod files;
pub mod guard;
pub mod macros;
pub mod messaging;
pub mod project;
pub mod search;

use crate::errors::into_call_result;
use crate::params::*;

/// Capacity of the recent-usage ring.
const RECENT_RING_CAPACITY: usize = 256;

/// One entry in the recent-usage ring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecentToolUse {
    pub tool: String,
    pub project: Option<String>,
    pub agent: Option<String>,
    pub at_epoch_seconds: i64,
    pub status: String,
}

/// Capability sets required per tool, checked against the memoized
/// capability map before dispatch.
fn required_capabilities(tool: &str) -> &'static [&'static str] {
    match tool {
        "send_message" | "reply_message" => &["messaging", "write"],
        "fetch_inbox" | "mark_message_read" | "acknowledge_message" => &["messaging", "read"],
        "request_contact" | "respond_contact" | "list_contacts" | "set_contact_policy" => {
            &["contact"]
        }
        "reserve_file_paths" | "release_reservations" | "renew_reservations" => {
            &["file_reservations"]
        }
        "search_messages" | "summarize_thread" | "summarize_threads" => &["search"],
        "macro_start_session" | "macro_prepare_thread" | "macro_reservation_cycle"
        | "macro_contact_handshake" => &["workflow"],
        "install_precommit_guard" | "uninstall_precommit_guard" => &["repository"],
        _ => &[],
    }
}

pub struct WaggleService {
    mm: Arc<ModelManager>,
    llm: LlmClient,
    tool_router: ToolRouter<Self>,
    recent: Arc<Mutex<VecDeque<RecentToolUse>>>,
}

impl WaggleService {
    pub async fn new() -> CoreResult<Self> {
        let config = WaggleConfig::load().unwrap_or_default();
        Self::new_with_config(config).await
    }

    pub async fn new_with_config(config: WaggleConfig) -> CoreResult<Self> {
        let config = Arc::new(config);
        let mm = Arc::new(ModelManager::new(config.clone()).await?);
        Ok(Self::new_with_mm(mm))
    }

    /// Create a service over an existing ModelManager (tests use this).
    pub fn new_with_mm(mm: Arc<ModelManager>) -> Self {
        let llm = LlmClient::new(mm.config.llm.clone());
        Self {
            mm,
            llm,
            tool_router: Self::tool_router(),
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_RING_CAPACITY))),
        }
    }

    pub fn mm(&self) -> &Arc<ModelManager> {
        &self.mm
    }

    fn ctx(&self) -> Ctx {
        Ctx::root_ctx()
    }

    pub(crate) fn llm(&self) -> &LlmClient {
        &self.llm
    }

    /// LLM client accessor for integration tests.
    pub fn llm_for_test(&self) -> &LlmClient {
        &self.llm
    }

    /// Serialized tool inventory (name, description, input schema) for the
    /// tooling/schemas resource.
    pub fn tool_schemas(&self) -> serde_json::Value {
        let tools: Vec<serde_json::Value> = self
            .tool_router
            .list_all()
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        serde_json::json!(tools)
    }

    /// Snapshot of the recent-usage ring, newest first, optionally bounded
    /// to a trailing window.
    pub fn recent_usage(&self, window_seconds: Option<i64>) -> Vec<RecentToolUse> {
        let ring = match self.recent.lock() {
            Ok(ring) => ring,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cutoff = window_seconds.map(|w| chrono::Utc::now().timestamp() - w);
        ring.iter()
            .rev()
            .filter(|entry| cutoff.is_none_or(|c| entry.at_epoch_seconds >= c))
            .cloned()
            .collect()
    }

    fn push_recent(&self, entry: RecentToolUse) {
        let mut ring = match self.recent.lock() {
            Ok(ring) => ring,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.len() >= RECENT_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Pull the (project, agent) identifiers out of raw tool arguments for
    /// metric attribution. Best effort only.
    fn extract_context(
        args: &Option<serde_json::Map<String, serde_json::Value>>,
    ) -> (Option<String>, Option<String>) {
        let Some(obj) = args else { return (None, None) };
        let project = obj
            .get("project_key")
            .or_else(|| obj.get("human_key"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let agent = obj
            .get("agent_name")
            .or_else(|| obj.get("sender_name"))
            .or_else(|| obj.get("from_agent"))
            .or_else(|| obj.get("requester"))
            .or_else(|| obj.get("name"))
            .and_then(|v| v.as_str())
            .map(String::from);
        (project, agent)
    }

    async fn record_tool_metric(
        &self,
        tool_name: &str,
        project_key: Option<&str>,
        agent_name: Option<&str>,
        duration: std::time::Duration,
        result: &Result<CallToolResult, McpError>,
    ) {
        let ctx = self.ctx();
        let (status, error_code) = match result {
            Ok(call_result) => {
                // Recoverable errors travel inside a result flagged is_error.
                if call_result.is_error == Some(true) {
                    let code = call_result
                        .content
                        .first()
                        .and_then(|c| c.as_text())
                        .and_then(|t| serde_json::from_str::<serde_json::Value>(&t.text).ok())
                        .and_then(|v| {
                            v.get("error")
                                .and_then(|e| e["type"].as_str().map(String::from))
                        });
                    ("error".to_string(), code)
                } else {
                    ("ok".to_string(), None)
                }
            }
            Err(e) => ("error".to_string(), Some(e.message.to_string())),
        };

        metrics::counter!("waggle_tool_calls_total", "tool" => tool_name.to_string()).increment(1);
        if status != "ok" {
            metrics::counter!("waggle_tool_errors_total", "tool" => tool_name.to_string())
                .increment(1);
        }

        let mut project_id = None;
        let mut agent_id = None;
        if let Some(key) = project_key
            && let Ok(p) = ProjectBmc::get_by_identifier(&ctx, &self.mm, key).await
        {
            project_id = Some(p.id);
            if let Some(name) = agent_name
                && let Ok(a) = AgentBmc::get_by_name(&ctx, &self.mm, p.id, name).await
            {
                agent_id = Some(a.id);
            }
        }

        self.push_recent(RecentToolUse {
            tool: tool_name.to_string(),
            project: project_key.map(String::from),
            agent: agent_name.map(String::from),
            at_epoch_seconds: chrono::Utc::now().timestamp(),
            status: status.clone(),
        });

        let metric = ToolMetricForCreate {
            project_id,
            agent_id,
            tool_name: tool_name.to_string(),
            status,
            error_code,
            duration_ms: duration.as_millis() as i64,
        };
        if let Err(e) = ToolMetricBmc::create(&ctx, &self.mm, metric).await {
            tracing::error!(error = %e, "failed to record tool metric");
        }
    }

    fn check_capabilities(
        &self,
        tool_name: &str,
        project_key: Option<&str>,
        agent_name: Option<&str>,
    ) -> Result<(), McpError> {
        let required = required_capabilities(tool_name);
        if required.is_empty() {
            return Ok(());
        }
        let map = CapabilityMap::global(self.mm.config.identity.capabilities_file.as_deref());
        if map.check(agent_name, project_key, required) {
            Ok(())
        } else {
            Err(McpError::invalid_request(
                format!("caller lacks required capabilities for '{tool_name}'"),
                Some(serde_json::json!({
                    "error_code": "CAPABILITY_DENIED",
                    "required": required,
                    "agent": agent_name,
                    "project": project_key,
                })),
            ))
        }
    }
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for WaggleService {
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: self.tool_router.list_all(),
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let start = std::time::Instant::now();
            let original_name = request.name.clone();
            let args = request.arguments.clone();

            // Legacy aliases kept for older clients.
            let resolved_name: Option<&str> = match &*original_name {
                "check_inbox" | "list_inbox" => Some("fetch_inbox"),
                "file_reservation_paths" => Some("reserve_file_paths"),
                "release_file_reservations" => Some("release_reservations"),
                "renew_file_reservations" => Some("renew_reservations"),
                _ => None,
            };
            let request = if let Some(new_name) = resolved_name {
                tracing::debug!(original = %original_name, resolved = %new_name, "resolved tool alias");
                CallToolRequestParam {
                    name: new_name.into(),
                    arguments: args.clone(),
                }
            } else {
                request
            };
            let tool_name = request.name.clone();

            let (project_key, agent_name) = Self::extract_context(&args);
            self.check_capabilities(&tool_name, project_key.as_deref(), agent_name.as_deref())?;

            let tool_context =
                rmcp::handler::server::tool::ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(tool_context).await;

            self.record_tool_metric(
                &tool_name,
                project_key.as_deref(),
                agent_name.as_deref(),
                start.elapsed(),
                &result,
            )
            .await;

            result
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move { crate::resources::list_resources_impl(self).await }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move { crate::resources::read_resource_impl(self, &request.uri).await }
    }
}

// ============================================================================
// Tool definitions
// ============================================================================

#[tool_router]
impl WaggleService {
    #[tool(description = "Return basic readiness information for the coordination server.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        into_call_result(project::health_check_impl(&self.ctx(), &self.mm).await)
    }

    #[tool(
        description = "Create or get a project. The human key is the absolute path of the project directory."
    )]
    async fn ensure_project(
        &self,
        params: Parameters<EnsureProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(project::ensure_project_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(description = "List all projects visible to agents.")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        into_call_result(project::list_projects_impl(&self.ctx(), &self.mm).await)
    }

    #[tool(
        description = "Register or refresh an agent identity in a project and persist its profile. Omit the name to auto-generate a memorable one."
    )]
    async fn register_agent(
        &self,
        params: Parameters<RegisterAgentParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(agent::register_agent_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(description = "Mint a fresh auto-generated agent identity in a project.")]
    async fn create_agent_identity(
        &self,
        params: Parameters<CreateAgentIdentityParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(agent::create_agent_identity_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Return enriched profile details for an agent, optionally with its latest profile commit."
    )]
    async fn whois(&self, params: Parameters<WhoisParams>) -> Result<CallToolResult, McpError> {
        into_call_result(agent::whois_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Set an agent's inbound contact policy: open | auto | contacts_only | block_all."
    )]
    async fn set_contact_policy(
        &self,
        params: Parameters<SetContactPolicyParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(agent::set_contact_policy_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Send a Markdown message to one or more agents; persists canonical and mailbox copies to the git archive."
    )]
    async fn send_message(
        &self,
        params: Parameters<SendMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(messaging::send_message_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Reply to an existing message, preserving the thread and inheriting importance and ack flags."
    )]
    async fn reply_message(
        &self,
        params: Parameters<ReplyMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(messaging::reply_message_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Retrieve recent messages for an agent without mutating read/ack state."
    )]
    async fn fetch_inbox(
        &self,
        params: Parameters<FetchInboxParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(messaging::fetch_inbox_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Mark a message read for an agent. Set-once: later calls return the original timestamp."
    )]
    async fn mark_message_read(
        &self,
        params: Parameters<MessageStateParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(messaging::mark_message_read_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Acknowledge a message (and mark it read). Set-once and safe to repeat."
    )]
    async fn acknowledge_message(
        &self,
        params: Parameters<MessageStateParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(messaging::acknowledge_message_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Request contact approval to message another agent; sends an ack-required introduction."
    )]
    async fn request_contact(
        &self,
        params: Parameters<RequestContactParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(contacts::request_contact_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(description = "Approve or block a pending contact request.")]
    async fn respond_contact(
        &self,
        params: Parameters<RespondContactParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(contacts::respond_contact_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(description = "List contact links for an agent.")]
    async fn list_contacts(
        &self,
        params: Parameters<ListContactsParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(contacts::list_contacts_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Request advisory reservations on project-relative paths/globs. Conflicts are reported alongside the grant."
    )]
    async fn reserve_file_paths(
        &self,
        params: Parameters<ReserveFilePathsParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(files::reserve_file_paths_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Release active reservations held by an agent. Idempotent; artifacts stay for audit."
    )]
    async fn release_reservations(
        &self,
        params: Parameters<ReleaseReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(files::release_reservations_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Extend expiry for active reservations without reissuing them; refreshes the on-disk records."
    )]
    async fn renew_reservations(
        &self,
        params: Parameters<RenewReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(files::renew_reservations_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Full-text search over subject and body. Supports phrases, prefix, and boolean operators; best matches first."
    )]
    async fn search_messages(
        &self,
        params: Parameters<SearchMessagesParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(search::search_messages_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Extract participants, key points, and action items for a thread."
    )]
    async fn summarize_thread(
        &self,
        params: Parameters<SummarizeThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(
            search::summarize_thread_impl(&self.ctx(), &self.mm, self.llm(), params.0).await,
        )
    }

    #[tool(description = "Aggregate summaries across multiple threads into one digest.")]
    async fn summarize_threads(
        &self,
        params: Parameters<SummarizeThreadsParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(
            search::summarize_threads_impl(&self.ctx(), &self.mm, self.llm(), params.0).await,
        )
    }

    #[tool(
        description = "Boot a session: ensure project, register agent, optionally reserve paths, and fetch the inbox."
    )]
    async fn macro_start_session(
        &self,
        params: Parameters<MacroStartSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(macros::start_session_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Align an agent with an existing thread: ensure registration, summarize, and fetch inbox context."
    )]
    async fn macro_prepare_thread(
        &self,
        params: Parameters<MacroPrepareThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(
            macros::prepare_thread_impl(&self.ctx(), &self.mm, self.llm(), params.0).await,
        )
    }

    #[tool(description = "Reserve a set of paths and optionally release them at the end of the call.")]
    async fn macro_reservation_cycle(
        &self,
        params: Parameters<MacroReservationCycleParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(macros::reservation_cycle_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Request contact permissions and optionally auto-approve plus send a welcome message."
    )]
    async fn macro_contact_handshake(
        &self,
        params: Parameters<MacroContactHandshakeParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(macros::contact_handshake_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(
        description = "Install the reservation-checking pre-commit hook into a workspace."
    )]
    async fn install_precommit_guard(
        &self,
        params: Parameters<InstallGuardParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(guard::install_precommit_guard_impl(&self.ctx(), &self.mm, params.0).await)
    }

    #[tool(description = "Remove the waggle pre-commit hook from a workspace.")]
    async fn uninstall_precommit_guard(
        &self,
        params: Parameters<UninstallGuardParams>,
    ) -> Result<CallToolResult, McpError> {
        into_call_result(
            guard::uninstall_precommit_guard_impl(&self.ctx(), &self.mm, params.0).await,
        )
    }
}
