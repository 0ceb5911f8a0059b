//! Project slug derivation.
//!
//! A project is identified externally by its `human_key` (an absolute
//! directory path). The canonical storage key is a deterministic lowercase
//! slug derived from it. Derivation must be pure, stable, and idempotent:
//! `slugify(slugify(x)) == slugify(x)`.

/// Derive the canonical lowercase slug for a human key.
pub fn slugify(human_key: &str) -> String {
    let slugged = slug::slugify(human_key);
    if slugged.is_empty() {
        // Pathological inputs (all punctuation) still need a stable key.
        "project".to_string()
    } else {
        slugged
    }
}

/// True when the identifier looks like a filesystem path rather than a slug.
pub fn looks_like_path(identifier: &str) -> bool {
    identifier.contains('/') || identifier.contains('\\')
}
