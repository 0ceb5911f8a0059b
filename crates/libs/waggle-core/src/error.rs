//! Error types for waggle-core operations.
//!
//! Errors are categorized into:
//!
//! - **External errors**: wrapped errors from dependencies (libsql, git2,
//!   serde_json, io, image)
//! - **Internal errors**: generic failure modes (invalid input, lock timeout)
//! - **Model-specific errors**: entity-specific not-found variants that carry
//!   the identifier that missed

use strum_macros::AsRefStr;
use thiserror::Error;

/// The error type for waggle-core operations.
#[derive(Debug, Error, AsRefStr)]
pub enum Error {
    // -- External errors from dependencies
    /// Database error from libsql.
    #[error("Libsql Error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Git repository error.
    #[error("Git Error: {0}")]
    Git2(#[from] git2::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error from attachment processing.
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    /// Template rendering error from commit panel generation.
    #[error("Template Error: {0}")]
    Template(#[from] minijinja::Error),

    // -- Internal errors for common failure modes
    /// Input validation error with a human-readable reason.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lock acquisition timeout on the archive lock.
    #[error("Lock timeout on {path}, held by PID {owner_pid}")]
    LockTimeout { path: String, owner_pid: u32 },

    /// Structured validation error with actionable suggestion.
    #[error("Validation error: {0}")]
    Validation(#[from] crate::utils::validation::ValidationError),

    // -- Model-specific not-found errors
    /// Project not found by slug, human key, or id.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Agent not found by name or id. Carries near-miss suggestions when
    /// the lookup was by name.
    #[error("Agent not found: {identifier}")]
    AgentNotFound {
        identifier: String,
        suggestions: Vec<String>,
    },

    /// Message not found by ID.
    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    /// File reservation not found by id or path.
    #[error("FileReservation not found: {0}")]
    FileReservationNotFound(String),
}

impl Error {
    pub fn project_not_found(identifier: impl Into<String>) -> Self {
        Self::ProjectNotFound(identifier.into())
    }

    pub fn agent_not_found(identifier: impl Into<String>) -> Self {
        Self::AgentNotFound {
            identifier: identifier.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn agent_not_found_with_suggestions(
        identifier: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self::AgentNotFound {
            identifier: identifier.into(),
            suggestions,
        }
    }
}

/// A specialized [`Result`] type for waggle-core operations.
pub type Result<T> = core::result::Result<T, Error>;
