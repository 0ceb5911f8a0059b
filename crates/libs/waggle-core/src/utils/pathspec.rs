//! Glob overlap detection for file reservation conflicts.
//!
//! Two patterns overlap when either matches the other under shell-glob
//! semantics. A trailing `/*` is treated as directory-inclusive ("src/*"
//! also covers "src/app/main.rs") so simple directory reservations behave
//! the way agents expect.

use glob::Pattern;

/// Normalize a pattern before matching: drop leading `./` segments and
/// widen a trailing `/*` into a directory-inclusive `/**`-style match.
fn normalize(pattern: &str) -> String {
    let mut p = pattern;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    if let Some(prefix) = p.strip_suffix("/*") {
        return format!("{prefix}/**");
    }
    p.to_string()
}

/// Check whether two path patterns could match overlapping files.
///
/// Matching is symmetric: `a` as a glob against `b` as a literal, and the
/// reverse. Exact equality always overlaps. Invalid glob syntax never
/// panics; it simply fails to match.
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);

    if a == b {
        return true;
    }
    if let Ok(pat) = Pattern::new(&a)
        && pat.matches(&b)
    {
        return true;
    }
    if let Ok(pat) = Pattern::new(&b)
        && pat.matches(&a)
    {
        return true;
    }
    false
}

/// True when any pattern in `paths_a` overlaps any pattern in `paths_b`.
pub fn pattern_sets_overlap(paths_a: &[String], paths_b: &[String]) -> bool {
    paths_a
        .iter()
        .any(|pa| paths_b.iter().any(|pb| patterns_overlap(pa, pb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_overlaps() {
        assert!(patterns_overlap("src/main.rs", "src/main.rs"));
        assert!(patterns_overlap("Cargo.toml", "Cargo.toml"));
    }

    #[test]
    fn glob_matches_literal_both_directions() {
        assert!(patterns_overlap("src/**/*.rs", "src/api/auth.rs"));
        assert!(patterns_overlap("src/api/auth.rs", "src/**/*.rs"));
        assert!(patterns_overlap("*.toml", "Cargo.toml"));
    }

    #[test]
    fn trailing_dir_star_is_directory_inclusive() {
        assert!(patterns_overlap("src/*", "src/app/main.py"));
        assert!(patterns_overlap("src/app.py", "src/*"));
    }

    #[test]
    fn leading_dot_slash_is_ignored() {
        assert!(patterns_overlap("./src/app.py", "src/app.py"));
    }

    #[test]
    fn disjoint_trees_do_not_overlap() {
        assert!(!patterns_overlap("src/**", "tests/**"));
        assert!(!patterns_overlap("docs/*.md", "src/lib.rs"));
    }

    #[test]
    fn distinct_files_do_not_overlap() {
        assert!(!patterns_overlap("src/main.rs", "src/lib.rs"));
    }

    #[test]
    fn invalid_glob_does_not_panic() {
        assert!(!patterns_overlap("[invalid", "src/main.rs"));
        assert!(!patterns_overlap("src/main.rs", "[invalid"));
    }

    #[test]
    fn set_overlap() {
        let a = vec!["src/*".to_string()];
        let b = vec!["docs/*.md".to_string(), "src/app.py".to_string()];
        assert!(pattern_sets_overlap(&a, &b));
        let c = vec!["docs/*.md".to_string()];
        assert!(!pattern_sets_overlap(&a, &c));
    }
}
