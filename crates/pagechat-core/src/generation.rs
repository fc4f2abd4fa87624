//! Generation provider trait.
//!
//! The language-generation service is an external collaborator. The router
//! uses two shapes of call: a plain completion for answer text, and a
//! structured completion that forces a single tool call and returns its
//! arguments, which backs query classification. Concrete HTTP providers live
//! in the application crate; tests script both calls with mocks.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::models::ChatMessage;

/// A function-call tool offered to the generation service.
///
/// `parameters` is a JSON Schema object describing the expected arguments.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A service that completes chat prompts.
#[async_trait]
pub trait Generator: Send + Sync {
    /// The model identifier, for diagnostics.
    fn model_name(&self) -> &str;

    /// Generate answer text for the given messages.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a forced call of `tool` and return its arguments object.
    async fn complete_structured(&self, messages: &[ChatMessage], tool: &ToolSpec)
        -> Result<Value>;
}
