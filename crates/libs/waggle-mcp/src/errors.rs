//! Structured error payloads for tool responses.
//!
//! Recoverable errors are returned inside a successful tool result as
//! `{"error": {"type", "message", "recoverable", "data"}}` so clients can
//! react programmatically; unrecoverable kinds surface as transport-level
//! errors. The `data` object always names the offending identifiers or a
//! remedy.

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    RecipientNotFound,
    ContactRequired,
    ContactBlocked,
    FileReservationConflict,
    InvalidArgument,
    CapabilityDenied,
    UnhandledException,
}

impl ErrorKind {
    pub fn recoverable(self) -> bool {
        !matches!(
            self,
            Self::ContactBlocked | Self::CapabilityDenied | Self::UnhandledException
        )
    }
}

/// One tool failure, carrying the machine-readable kind and context data.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub data: serde_json::Value,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: kind.recoverable(),
            data: serde_json::json!({}),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }

    pub fn kind_name(&self) -> String {
        serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "UNHANDLED_EXCEPTION".to_string())
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind_name(), self.message)
    }
}

impl From<waggle_core::Error> for ToolError {
    fn from(err: waggle_core::Error) -> Self {
        use waggle_core::Error as E;
        match err {
            E::ProjectNotFound(identifier) => Self::new(
                ErrorKind::NotFound,
                format!("Project '{identifier}' not found"),
            )
            .with_data(serde_json::json!({
                "project": identifier,
                "hint": "check resource://projects or create with ensure_project",
            })),
            E::AgentNotFound {
                identifier,
                suggestions,
            } => Self::new(ErrorKind::NotFound, format!("Agent not found: {identifier}"))
                .with_data(serde_json::json!({
                    "agent": identifier,
                    "suggestions": suggestions,
                    "hint": "check resource://agents/{project_key} or register with register_agent",
                })),
            E::MessageNotFound(id) => {
                Self::new(ErrorKind::NotFound, format!("Message {id} not found"))
                    .with_data(serde_json::json!({ "message_id": id }))
            }
            E::FileReservationNotFound(identifier) => Self::new(
                ErrorKind::NotFound,
                format!("File reservation not found: {identifier}"),
            )
            .with_data(serde_json::json!({ "reservation": identifier })),
            E::InvalidInput(message) => Self::new(ErrorKind::InvalidArgument, message),
            E::Validation(ve) => {
                let data = ve.context();
                Self::new(ErrorKind::InvalidArgument, ve.to_string()).with_data(data)
            }
            other => Self::new(ErrorKind::UnhandledException, other.to_string()),
        }
    }
}

/// Convert a tool outcome into the MCP result shape: recoverable errors
/// become a normal response carrying the error payload; unrecoverable ones
/// surface through the transport.
pub fn into_call_result(
    outcome: Result<serde_json::Value, ToolError>,
) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(value) => Ok(json_result(&value)),
        Err(err) if err.recoverable => {
            let text = serde_json::to_string_pretty(&err.payload())
                .unwrap_or_else(|_| err.to_string());
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
        Err(err) => Err(McpError::internal_error(
            err.to_string(),
            Some(err.payload()),
        )),
    }
}

/// Serialize a JSON payload into a tool result.
pub fn json_result(value: &serde_json::Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "{\"error\":{\"type\":\"UNHANDLED_EXCEPTION\"}}".to_string());
    CallToolResult::success(vec![Content::text(text)])
}
