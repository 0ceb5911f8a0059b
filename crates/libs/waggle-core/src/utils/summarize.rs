//! Deterministic thread summarization.
//!
//! Reduces a thread into participants, key points, action items, @mention
//! counts, and code/path references without any model call. The optional LLM
//! refinement layered on top (see [`crate::llm`]) merges over this output and
//! is discarded when it cannot be parsed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const ACTION_KEYWORDS: [&str; 5] = ["TODO", "ACTION", "FIXME", "NEXT", "BLOCKED"];
const MAX_POINTS: usize = 10;
const MAX_MENTIONS: usize = 10;

/// One message handed to the summarizer: markdown body plus sender name.
#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub sender_name: String,
    pub body_md: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MentionCount {
    pub name: String,
    pub count: u32,
}

/// Heuristic summary of a message thread.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThreadSummary {
    pub participants: Vec<String>,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub total_messages: usize,
    pub open_actions: u32,
    pub done_actions: u32,
    pub mentions: Vec<MentionCount>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub code_references: Vec<String>,
}

fn record_mentions(text: &str, mentions: &mut BTreeMap<String, u32>) {
    for token in text.split_whitespace() {
        if let Some(raw) = token.strip_prefix('@') {
            let name = raw.trim_matches(|c: char| ".,:;()[]{}".contains(c));
            if !name.is_empty() {
                *mentions.entry(name.to_string()).or_insert(0) += 1;
            }
        }
    }
}

fn record_code_refs(text: &str, refs: &mut BTreeSet<String>) {
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('`') else { break };
        let snippet = after[..end].trim();
        let path_like = snippet.contains('/')
            || snippet.ends_with(".py")
            || snippet.ends_with(".rs")
            || snippet.ends_with(".ts")
            || snippet.ends_with(".md");
        if path_like && !snippet.is_empty() && snippet.len() <= 120 {
            refs.insert(snippet.to_string());
        }
        rest = &after[end + 1..];
    }
}

fn is_open_checkbox(line: &str) -> bool {
    line.starts_with("- [ ]") || line.starts_with("* [ ]") || line.starts_with("+ [ ]")
}

fn is_done_checkbox(line: &str) -> bool {
    ["- [x]", "- [X]", "* [x]", "* [X]", "+ [x]", "+ [X]"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn is_bullet(line: &str) -> bool {
    line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('+')
        || matches!(line.get(..2), Some("1." | "2." | "3." | "4." | "5."))
}

/// Summarize an ordered sequence of thread messages.
pub fn summarize_messages(messages: &[SummaryInput]) -> ThreadSummary {
    let mut participants: BTreeSet<String> = BTreeSet::new();
    let mut key_points: Vec<String> = Vec::new();
    let mut action_items: Vec<String> = Vec::new();
    let mut open_actions = 0u32;
    let mut done_actions = 0u32;
    let mut mentions: BTreeMap<String, u32> = BTreeMap::new();
    let mut code_references: BTreeSet<String> = BTreeSet::new();

    for message in messages {
        participants.insert(message.sender_name.clone());
        for line in message.body_md.lines() {
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }
            record_mentions(stripped, &mut mentions);
            record_code_refs(stripped, &mut code_references);

            if is_bullet(stripped) {
                // normalize checkbox bullets to plain text for key points
                let normalized = if stripped.starts_with("- [") {
                    stripped.split_once(']').map_or(stripped, |(_, rest)| rest.trim())
                } else {
                    stripped
                };
                key_points.push(normalized.trim_start_matches(['-', '+', '*', ' ']).to_string());
            }

            if is_open_checkbox(stripped) {
                open_actions += 1;
                action_items.push(stripped.to_string());
                continue;
            }
            if is_done_checkbox(stripped) {
                done_actions += 1;
                action_items.push(stripped.to_string());
                continue;
            }
            let upper = stripped.to_uppercase();
            if ACTION_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
                action_items.push(stripped.to_string());
            }
        }
    }

    let mut sorted_mentions: Vec<MentionCount> = mentions
        .into_iter()
        .map(|(name, count)| MentionCount { name, count })
        .collect();
    sorted_mentions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    sorted_mentions.truncate(MAX_MENTIONS);

    key_points.truncate(MAX_POINTS);
    action_items.truncate(MAX_POINTS);

    ThreadSummary {
        participants: participants.into_iter().collect(),
        key_points,
        action_items,
        total_messages: messages.len(),
        open_actions,
        done_actions,
        mentions: sorted_mentions,
        code_references: code_references.into_iter().take(MAX_POINTS).collect(),
    }
}

/// Merge a parsed LLM refinement over a heuristic summary.
///
/// Only non-empty refinement fields win; anything missing or empty keeps the
/// deterministic value, so a partial or sloppy model response degrades
/// gracefully instead of erasing the heuristic output.
pub fn merge_refinement(base: &mut ThreadSummary, refined: serde_json::Value) {
    if let Some(v) = refined.get("participants").and_then(|v| v.as_array())
        && !v.is_empty()
    {
        base.participants = v
            .iter()
            .filter_map(|x| x.as_str().map(String::from))
            .collect();
    }
    if let Some(v) = refined.get("key_points").and_then(|v| v.as_array())
        && !v.is_empty()
    {
        base.key_points = v
            .iter()
            .filter_map(|x| x.as_str().map(String::from))
            .collect();
    }
    if let Some(v) = refined.get("action_items").and_then(|v| v.as_array())
        && !v.is_empty()
    {
        base.action_items = v
            .iter()
            .filter_map(|x| x.as_str().map(String::from))
            .collect();
    }
    if let Some(v) = refined.get("mentions").and_then(|v| v.as_array())
        && !v.is_empty()
    {
        let parsed: Vec<MentionCount> = v
            .iter()
            .filter_map(|x| serde_json::from_value(x.clone()).ok())
            .collect();
        if !parsed.is_empty() {
            base.mentions = parsed;
        }
    }
    if let Some(v) = refined.get("code_references").and_then(|v| v.as_array())
        && !v.is_empty()
    {
        base.code_references = v
            .iter()
            .filter_map(|x| x.as_str().map(String::from))
            .collect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn msg(sender: &str, body: &str) -> SummaryInput {
        SummaryInput {
            sender_name: sender.to_string(),
            body_md: body.to_string(),
        }
    }

    #[test]
    fn collects_participants_and_points() {
        let summary = summarize_messages(&[
            msg("BlueLake", "- plan the rollout\n- [ ] write migration"),
            msg("GreenCastle", "TODO double-check the index"),
        ]);
        assert_eq!(summary.participants, vec!["BlueLake", "GreenCastle"]);
        assert_eq!(summary.total_messages, 2);
        assert_eq!(summary.open_actions, 1);
        assert!(summary.key_points.iter().any(|p| p == "plan the rollout"));
        assert!(summary
            .action_items
            .iter()
            .any(|a| a.contains("double-check")));
    }

    #[test]
    fn normalizes_checkbox_key_points() {
        let summary = summarize_messages(&[msg("A", "- [x] ship the fix")]);
        assert_eq!(summary.done_actions, 1);
        assert_eq!(summary.key_points, vec!["ship the fix"]);
    }

    #[test]
    fn counts_mentions_sorted_by_frequency() {
        let summary = summarize_messages(&[
            msg("A", "@bob please review, cc @alice"),
            msg("B", "@bob done."),
        ]);
        assert_eq!(summary.mentions[0].name, "bob");
        assert_eq!(summary.mentions[0].count, 2);
    }

    #[test]
    fn extracts_path_like_code_refs_only() {
        let summary = summarize_messages(&[msg("A", "see `src/app.py` and `x`")]);
        assert_eq!(summary.code_references, vec!["src/app.py"]);
    }

    #[test]
    fn refinement_merges_over_base_and_keeps_missing_fields() {
        let mut base = summarize_messages(&[msg("A", "- one\n- two")]);
        merge_refinement(
            &mut base,
            serde_json::json!({"key_points": ["condensed"], "mentions": []}),
        );
        assert_eq!(base.key_points, vec!["condensed"]);
        assert_eq!(base.participants, vec!["A"]); // untouched
    }
}
