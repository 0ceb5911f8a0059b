//! Search and summarization tools.

use crate::errors::ToolError;
use crate::helpers;
use crate::params::{SearchMessagesParams, SummarizeThreadParams, SummarizeThreadsParams};
use std::sync::Arc;
use waggle_core::Ctx;
use waggle_core::llm::{LlmClient, parse_json_loosely};
use waggle_core::model::ModelManager;
use waggle_core::model::message::MessageBmc;
use waggle_core::model::project::Project;
use waggle_core::utils::summarize::{
    SummaryInput, ThreadSummary, merge_refinement, summarize_messages,
};

pub async fn search_messages_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SearchMessagesParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let hits = MessageBmc::search(
        ctx,
        mm,
        project.id,
        &params.query,
        params.limit.unwrap_or(20),
    )
    .await
    .map_err(ToolError::from)?;

    let payload: Vec<serde_json::Value> = hits
        .iter()
        .map(|message| {
            serde_json::json!({
                "id": message.id,
                "subject": message.subject,
                "importance": message.importance,
                "ack_required": message.ack_required,
                "created_ts": message.created_ts.and_utc().to_rfc3339(),
                "thread_id": message.thread_id,
                "from": message.sender_name,
            })
        })
        .collect();
    Ok(serde_json::json!(payload))
}

/// Build the heuristic summary for one thread, optionally refined by the
/// LLM. Malformed or missing model output leaves the heuristic untouched.
pub async fn compute_thread_summary(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    llm: &LlmClient,
    project: &Project,
    thread_key: &str,
    llm_mode: bool,
    llm_model: Option<&str>,
) -> Result<(ThreadSummary, usize), ToolError> {
    let messages = MessageBmc::list_thread(ctx, mm, project.id, thread_key)
        .await
        .map_err(ToolError::from)?;
    let inputs: Vec<SummaryInput> = messages
        .iter()
        .map(|m| SummaryInput {
            sender_name: m.sender_name.clone(),
            body_md: m.body_md.clone(),
        })
        .collect();
    let mut summary = summarize_messages(&inputs);

    if llm_mode && llm.enabled() && !messages.is_empty() {
        let excerpts: Vec<String> = messages
            .iter()
            .take(15)
            .map(|m| {
                let body: String = m.body_md.chars().take(800).collect();
                format!("- {}: {}\n{}", m.sender_name, m.subject, body)
            })
            .collect();
        let system = "You are a senior engineer. Produce a concise JSON summary with keys: \
                      participants[], key_points[], action_items[], mentions[{name,count}], \
                      code_references[]. Derive from the given thread excerpts.";
        if let Some(raw) = llm
            .complete_system_user(system, &excerpts.join("\n\n"), llm_model)
            .await
            && let Some(parsed) = parse_json_loosely(&raw)
        {
            merge_refinement(&mut summary, parsed);
        }
    }

    let total = messages.len();
    Ok((summary, total))
}

pub async fn summarize_thread_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    llm: &LlmClient,
    params: SummarizeThreadParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let (summary, total) = compute_thread_summary(
        ctx,
        mm,
        llm,
        &project,
        &params.thread_id,
        params.llm_mode.unwrap_or(true),
        params.llm_model.as_deref(),
    )
    .await?;

    let mut examples = Vec::new();
    if params.include_examples.unwrap_or(false) {
        let messages = MessageBmc::list_thread(ctx, mm, project.id, &params.thread_id)
            .await
            .map_err(ToolError::from)?;
        for message in messages.iter().take(3) {
            examples.push(serde_json::json!({
                "id": message.id,
                "subject": message.subject,
                "from": message.sender_name,
                "created_ts": message.created_ts.and_utc().to_rfc3339(),
            }));
        }
    }

    Ok(serde_json::json!({
        "thread_id": params.thread_id,
        "summary": summary,
        "examples": examples,
        "total_messages": total,
    }))
}

pub async fn summarize_threads_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    llm: &LlmClient,
    params: SummarizeThreadsParams,
) -> Result<serde_json::Value, ToolError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;
    let llm_mode = params.llm_mode.unwrap_or(true);

    let mut threads = Vec::new();
    let mut merged_mentions: std::collections::BTreeMap<String, u32> =
        std::collections::BTreeMap::new();
    let mut all_key_points: Vec<String> = Vec::new();

    for thread_id in &params.thread_ids {
        let (summary, total) = compute_thread_summary(
            ctx,
            mm,
            llm,
            &project,
            thread_id,
            llm_mode,
            params.llm_model.as_deref(),
        )
        .await?;
        for mention in &summary.mentions {
            *merged_mentions.entry(mention.name.clone()).or_insert(0) += mention.count;
        }
        all_key_points.extend(summary.key_points.iter().cloned());
        threads.push(serde_json::json!({
            "thread_id": thread_id,
            "summary": summary,
            "total_messages": total,
        }));
    }

    let mut mentions: Vec<serde_json::Value> = merged_mentions
        .iter()
        .map(|(name, count)| serde_json::json!({ "name": name, "count": count }))
        .collect();
    mentions.sort_by_key(|m| std::cmp::Reverse(m["count"].as_u64().unwrap_or(0)));

    // Optional consolidated digest over the union of per-thread key points.
    let mut digest = serde_json::Value::Null;
    if llm_mode && llm.enabled() && !all_key_points.is_empty() {
        let system = "Condense these key points from multiple discussion threads into a short \
                      top-level digest. Respond with JSON: {\"digest\": [\"...\"]}";
        if let Some(raw) = llm
            .complete_system_user(system, &all_key_points.join("\n"), params.llm_model.as_deref())
            .await
            && let Some(parsed) = parse_json_loosely(&raw)
            && parsed.get("digest").is_some()
        {
            digest = parsed["digest"].clone();
        }
    }

    Ok(serde_json::json!({
        "threads": threads,
        "mentions": mentions,
        "digest": digest,
    }))
}
