//! Utility functions and helpers.

pub mod attachments;
pub mod names;
pub mod pathspec;
pub mod slugs;
pub mod summarize;
pub mod validation;

/// Suggest up to `limit` known names that are close to `input` by
/// Levenshtein distance. Feeds "did you mean" hints on failed lookups.
pub fn suggest_similar<'a>(input: &str, known: &[&'a str], limit: usize) -> Vec<&'a str> {
    let lowered = input.to_lowercase();
    let mut scored: Vec<(usize, &'a str)> = known
        .iter()
        .map(|candidate| (strsim::levenshtein(&lowered, &candidate.to_lowercase()), *candidate))
        .filter(|(distance, candidate)| *distance <= candidate.len().max(3) / 2 + 1)
        .collect();
    scored.sort_by_key(|(distance, _)| *distance);
    scored.into_iter().take(limit).map(|(_, name)| name).collect()
}
