//! Generation provider implementations.
//!
//! One HTTP backend covers every OpenAI-compatible chat-completions
//! endpoint, including Ollama's `/v1`. The structured call forces a single
//! tool invocation (`tool_choice` pinned to the tool) and hands back the
//! parsed arguments object; the router's classifiers are built on it.
//!
//! Retry policy matches the embedding providers: 429/5xx and network errors
//! back off exponentially, other 4xx fail immediately.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use pagechat_core::generation::{Generator, ToolSpec};
use pagechat_core::models::ChatMessage;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Instantiate the generator named by the configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// A no-op provider that always errors.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Generation provider is disabled")
    }

    async fn complete_structured(&self, _messages: &[ChatMessage], _tool: &ToolSpec) -> Result<Value> {
        bail!("Generation provider is disabled")
    }
}

/// OpenAI-compatible chat-completions endpoint.
pub struct OpenAiGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }

    async fn request(&self, body: &Value) -> Result<Value> {
        // The key is optional: local OpenAI-compatible endpoints (Ollama,
        // vLLM) accept unauthenticated requests.
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        let url = format!("{}/chat/completions", self.url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(key) = &api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, text));
                        continue;
                    }
                    bail!("{} returned {}: {}", url, status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("generation failed after retries")))
    }
}

fn messages_json(messages: &[ChatMessage]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        pagechat_core::models::Role::System => "system",
                        pagechat_core::models::Role::User => "user",
                        pagechat_core::models::Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect(),
    )
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(messages),
            "temperature": 0,
        });

        let json = self.request(&body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
    }

    async fn complete_structured(&self, messages: &[ChatMessage], tool: &ToolSpec) -> Result<Value> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages_json(messages),
            "temperature": 0,
            "tools": [{
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            }],
            "tool_choice": {"type": "function", "function": {"name": tool.name}},
        });

        let json = self.request(&body).await?;
        let arguments = json
            .pointer("/choices/0/message/tool_calls/0/function/arguments")
            .and_then(|a| a.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid structured response: missing tool call"))?;

        Ok(serde_json::from_str(arguments)?)
    }
}
