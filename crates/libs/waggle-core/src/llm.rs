//! Optional LLM completion client.
//!
//! A single request/response surface used to refine heuristic thread
//! summaries. Every call site must degrade to the deterministic path when
//! the capability is disabled, unreachable, or returns output that does not
//! parse; callers therefore treat `None` as "no refinement".

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use waggle_common::config::LlmConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// Thin client over an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled && self.config.base_url.is_some()
    }

    /// One system+user completion. Returns `None` on any failure.
    pub async fn complete_system_user(
        &self,
        system: &str,
        user: &str,
        model_override: Option<&str>,
    ) -> Option<String> {
        if !self.enabled() {
            return None;
        }
        let base_url = self.config.base_url.as_deref()?;
        let model = model_override
            .or(self.config.model.as_deref())
            .unwrap_or(DEFAULT_MODEL);

        let body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => match response.json::<CompletionResponse>().await {
                Ok(parsed) => parsed.choices.into_iter().next().map(|c| c.message.content),
                Err(e) => {
                    debug!(error = %e, "llm response unparseable, skipping refinement");
                    None
                }
            },
            Err(e) => {
                debug!(error = %e, "llm unreachable, skipping refinement");
                None
            }
        }
    }
}

/// Extract the first JSON object from model output, tolerating fenced code
/// blocks and prose around it.
pub fn parse_json_loosely(text: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn disabled_client_returns_none() {
        let client = LlmClient::new(LlmConfig::default());
        assert!(!client.enabled());
    }

    #[test]
    fn loose_json_parsing_handles_fences() {
        let raw = "Here you go:\n```json\n{\"key_points\": [\"a\"]}\n```";
        let value = parse_json_loosely(raw).unwrap();
        assert_eq!(value["key_points"][0], "a");
    }

    #[test]
    fn loose_json_parsing_rejects_garbage() {
        assert!(parse_json_loosely("no braces here").is_none());
        assert!(parse_json_loosely("} inverted {").is_none());
    }
}
