// Allow expect in this module: regex patterns are compile-time verified
#![allow(clippy::expect_used)]

//! Input validation with actionable recovery hints.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref AGENT_NAME_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9_]{1,64}$").expect("valid regex pattern");
    static ref SLUG_RE: Regex = Regex::new(r"^[a-z0-9][a-z0-9-]{0,127}$").expect("valid regex pattern");
}

/// Input validation errors with recovery hints
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ValidationError {
    #[error("Project key must be an absolute path or an existing slug, got: {provided}")]
    InvalidProjectKey { provided: String, suggestion: String },

    #[error("Agent name must match ^[a-zA-Z0-9_]{{1,64}}$, got: {provided}")]
    InvalidAgentName { provided: String, suggestion: String },
}

impl ValidationError {
    pub fn context(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Validate a raw agent name token.
///
/// This is the charset gate at the tool boundary; the adjective+noun shape
/// rule only applies when minting names at registration.
pub fn validate_agent_name(name: &str) -> Result<(), ValidationError> {
    if AGENT_NAME_RE.is_match(name) {
        return Ok(());
    }
    let suggestion = crate::utils::names::sanitize_agent_name(name)
        .unwrap_or_else(|| "omit the name to auto-generate one".to_string());
    Err(ValidationError::InvalidAgentName {
        provided: name.to_string(),
        suggestion,
    })
}

/// Validate a project identifier: an absolute path (human key) or a slug.
///
/// Relative paths are rejected per the pipeline contract; a plain slug is
/// accepted so already-created projects can be addressed cheaply.
pub fn validate_project_key(key: &str) -> Result<(), ValidationError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidProjectKey {
            provided: key.to_string(),
            suggestion: "pass the absolute project directory path".to_string(),
        });
    }
    if std::path::Path::new(trimmed).is_absolute() {
        return Ok(());
    }
    if crate::utils::slugs::looks_like_path(trimmed) {
        return Err(ValidationError::InvalidProjectKey {
            provided: key.to_string(),
            suggestion: format!("use an absolute path, e.g. /{trimmed}"),
        });
    }
    if SLUG_RE.is_match(&trimmed.to_lowercase()) {
        return Ok(());
    }
    Err(ValidationError::InvalidProjectKey {
        provided: key.to_string(),
        suggestion: "pass the absolute project directory path".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_valid_keys() {
        assert!(validate_project_key("/data/projects/backend").is_ok());
    }

    #[test]
    fn relative_paths_are_rejected() {
        assert!(validate_project_key("data/projects/backend").is_err());
        assert!(validate_project_key("./backend").is_err());
    }

    #[test]
    fn slugs_are_accepted() {
        assert!(validate_project_key("data-projects-backend").is_ok());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(validate_project_key("  ").is_err());
    }

    #[test]
    fn agent_name_charset() {
        assert!(validate_agent_name("BlueLake").is_ok());
        assert!(validate_agent_name("agent_7").is_ok());
        assert!(validate_agent_name("no spaces").is_err());
        assert!(validate_agent_name("").is_err());
    }
}
