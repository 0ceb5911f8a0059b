//! Capability gating.
//!
//! Capabilities come from an optional JSON mapping file, loaded once and
//! memoized for the process lifetime (reload requires a restart). When no
//! file is configured, every agent holds every capability. Each rule names
//! an agent and/or project selector (`*` wildcards allowed) and grants a
//! capability list; the first matching rule wins.
//!
//! File shape:
//!
//! ```json
//! [
//!   {"agent": "BlueLake", "project": "*", "capabilities": ["messaging", "read"]},
//!   {"agent": "*", "capabilities": ["*"]}
//! ]
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct CapabilityRule {
    #[serde(default = "wildcard")]
    agent: String,
    #[serde(default = "wildcard")]
    project: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

fn wildcard() -> String {
    "*".to_string()
}

/// Memoized capability mapping.
#[derive(Debug, Default)]
pub struct CapabilityMap {
    rules: Option<Vec<CapabilityRule>>,
}

static CAPABILITY_MAP: OnceLock<CapabilityMap> = OnceLock::new();

impl CapabilityMap {
    /// Load the process-wide map once from the configured file path.
    ///
    /// A missing or malformed file degrades to allow-all with a warning;
    /// capability gating is a guard rail, not a security boundary.
    pub fn global(path: Option<&str>) -> &'static CapabilityMap {
        CAPABILITY_MAP.get_or_init(|| Self::load(path))
    }

    fn load(path: Option<&str>) -> CapabilityMap {
        let Some(path) = path else {
            return CapabilityMap { rules: None };
        };
        match std::fs::read_to_string(Path::new(path)) {
            Ok(content) => match serde_json::from_str::<Vec<CapabilityRule>>(&content) {
                Ok(rules) => CapabilityMap { rules: Some(rules) },
                Err(e) => {
                    warn!(path = %path, error = %e, "capability file unparseable, allowing all");
                    CapabilityMap { rules: None }
                }
            },
            Err(e) => {
                warn!(path = %path, error = %e, "capability file unreadable, allowing all");
                CapabilityMap { rules: None }
            }
        }
    }

    /// Construct directly from rules, for tests.
    pub fn from_json(json: &str) -> CapabilityMap {
        CapabilityMap {
            rules: serde_json::from_str(json).ok(),
        }
    }

    fn selector_matches(selector: &str, value: Option<&str>) -> bool {
        selector == "*" || value.is_some_and(|v| v.eq_ignore_ascii_case(selector))
    }

    /// Capabilities held by (agent, project) under this map.
    pub fn capabilities_for(
        &self,
        agent: Option<&str>,
        project: Option<&str>,
    ) -> HashSet<String> {
        let Some(rules) = &self.rules else {
            return HashSet::from(["*".to_string()]);
        };
        for rule in rules {
            if Self::selector_matches(&rule.agent, agent)
                && Self::selector_matches(&rule.project, project)
            {
                return rule.capabilities.iter().cloned().collect();
            }
        }
        HashSet::new()
    }

    /// Whether the holder satisfies every required capability.
    pub fn check(
        &self,
        agent: Option<&str>,
        project: Option<&str>,
        required: &[&str],
    ) -> bool {
        let held = self.capabilities_for(agent, project);
        if held.contains("*") {
            return true;
        }
        required.iter().all(|cap| held.contains(*cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_file_allows_everything() {
        let map = CapabilityMap { rules: None };
        assert!(map.check(Some("BlueLake"), Some("proj"), &["messaging", "write"]));
    }

    #[test]
    fn first_matching_rule_wins() {
        let map = CapabilityMap::from_json(
            r#"[
                {"agent": "BlueLake", "capabilities": ["read"]},
                {"agent": "*", "capabilities": ["*"]}
            ]"#,
        );
        assert!(map.check(Some("BlueLake"), None, &["read"]));
        assert!(!map.check(Some("BlueLake"), None, &["write"]));
        assert!(map.check(Some("GreenCastle"), None, &["write"]));
    }

    #[test]
    fn project_selector_scopes_rules() {
        let map = CapabilityMap::from_json(
            r#"[
                {"agent": "*", "project": "alpha", "capabilities": ["messaging"]},
                {"agent": "*", "capabilities": []}
            ]"#,
        );
        assert!(map.check(Some("X"), Some("alpha"), &["messaging"]));
        assert!(!map.check(Some("X"), Some("beta"), &["messaging"]));
    }

    #[test]
    fn malformed_json_degrades_to_allow_all() {
        let map = CapabilityMap::from_json("not json");
        assert!(map.check(None, None, &["anything"]));
    }
}
