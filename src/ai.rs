use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::ChatTurn;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const MAX_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces the assistant reply for one turn. Errors are handled by the
/// caller with a canned fallback, never shown to the client verbatim.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn complete(&self, system_prompt: &str, turns: &[ChatTurn]) -> Result<String, String>;
}

pub struct AnthropicGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicGenerator {
    pub fn from_env() -> AnthropicGenerator {
        AnthropicGenerator {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            model: std::env::var("ANTHROPIC_MODEL")
                .ok()
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl ResponseGenerator for AnthropicGenerator {
    async fn complete(&self, system_prompt: &str, turns: &[ChatTurn]) -> Result<String, String> {
        if self.api_key.trim().is_empty() {
            return Err("ANTHROPIC_API_KEY is not configured".to_string());
        }

        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
            .collect();

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "system": system_prompt,
                "messages": messages,
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("anthropic request failed: {err}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("anthropic returned {status}: {body}"));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| format!("anthropic parse failed: {err}"))?;
        payload
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "anthropic response contained no text block".to_string())
    }
}
