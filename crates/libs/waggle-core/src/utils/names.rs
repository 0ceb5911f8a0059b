//! Agent name generation and validation.
//!
//! Agent names are memorable adjective+noun identifiers ("BlueLake",
//! "GreenCastle") rather than role descriptions. Depending on the configured
//! enforcement mode, caller-provided names are validated strictly, silently
//! coerced to a generated name, or ignored entirely.

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;

const ADJECTIVES: &[&str] = &[
    "Amber", "Azure", "Bold", "Brave", "Bright", "Bronze", "Calm", "Clever", "Coral", "Crimson",
    "Eager", "Emerald", "Gentle", "Golden", "Green", "Happy", "Indigo", "Ivory", "Jade", "Keen",
    "Lively", "Lunar", "Mellow", "Misty", "Noble", "Olive", "Opal", "Proud", "Quiet", "Rapid",
    "Scarlet", "Silent", "Silver", "Solar", "Stout", "Sunny", "Swift", "Teal", "Velvet", "Violet",
    "Vivid", "Warm", "Wild", "Witty", "Blue", "Red", "Purple", "Copper", "Crystal", "Shadow",
];

const NOUNS: &[&str] = &[
    "Aspen", "Badger", "Bear", "Birch", "Brook", "Canyon", "Castle", "Cedar", "Cliff", "Cloud",
    "Comet", "Coral", "Crane", "Creek", "Dale", "Dawn", "Delta", "Dog", "Eagle", "Falcon",
    "Fern", "Finch", "Fox", "Glade", "Grove", "Harbor", "Hawk", "Heron", "Hill", "Lake",
    "Lark", "Lynx", "Maple", "Meadow", "Mesa", "Otter", "Owl", "Peak", "Pine", "Raven",
    "Reef", "Ridge", "River", "Robin", "Sparrow", "Spruce", "Stone", "Summit", "Tiger", "Wolf",
];

lazy_static! {
    static ref NAME_FORMAT_RE: Regex = {
        #[allow(clippy::expect_used)] // compile-time verified pattern
        Regex::new(r"^[A-Z][a-z]+[A-Z][a-z]+$").expect("valid regex pattern")
    };
}

/// Generate a random adjective+noun agent name.
pub fn generate_agent_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    format!("{adjective}{noun}")
}

/// Strip everything but `[A-Za-z0-9_]` and truncate to 64 chars.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_agent_name(input: &str) -> Option<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(64)
        .collect();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Whether a name matches the CamelCase adjective+noun shape.
///
/// Only the shape is checked; the words do not have to come from the
/// built-in tables, so callers can mint their own memorable pairs.
pub fn validate_agent_name_format(name: &str) -> bool {
    NAME_FORMAT_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_pass_format_validation() {
        for _ in 0..64 {
            let name = generate_agent_name();
            assert!(
                validate_agent_name_format(&name),
                "generated name should validate: {name}"
            );
        }
    }

    #[test]
    fn sanitize_strips_punctuation() {
        assert_eq!(sanitize_agent_name(" Blue-Lake! "), Some("BlueLake".to_string()));
        assert_eq!(sanitize_agent_name("@@@"), None);
    }

    #[test]
    fn format_rejects_descriptive_names() {
        assert!(validate_agent_name_format("BlueLake"));
        assert!(validate_agent_name_format("GreenCastle"));
        assert!(!validate_agent_name_format("bluelake"));
        assert!(!validate_agent_name_format("Blue"));
        assert!(!validate_agent_name_format("BackendHarmonizerBot"));
        assert!(!validate_agent_name_format("blue_lake"));
    }
}
