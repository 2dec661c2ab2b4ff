use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::generator::{GenerationParams, Generator, Message, OracleError, Role};
use crate::providers::openai::timeout_or_http;

/// Anthropic messages-API backend.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicGenerator {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        Self { client, api_key, model }
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError> {
        let url = "https://api.anthropic.com/v1/messages";

        // The messages API takes the system prompt as a separate parameter.
        let system_msg = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User | Role::System => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if let Some(system) = system_msg {
            body["system"] = json!(system);
        }

        debug!(model = %self.model, "anthropic request to {}", url);

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(timeout_or_http)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api { status, body });
        }

        let resp: serde_json::Value = response.json().await?;
        let content = resp["content"][0]["text"]
            .as_str()
            .ok_or_else(|| OracleError::Malformed("missing content[0].text".into()))?
            .to_string();

        Ok(content)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
