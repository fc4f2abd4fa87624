//! Query classification via structured generation calls.
//!
//! Each chat turn starts with one function-call-style completion that labels
//! the message with five boolean signals; the router's precedence rules do
//! the rest. A second, narrower classifier judges whether a message answers
//! a pending clarifying question.
//!
//! Malformed structured output is a [`ClassifyError`]; the caller retries
//! once with a stricter instruction and then fails closed to NO_ANSWER.

use serde_json::{json, Value};
use thiserror::Error;

use pagechat_core::generation::{Generator, ToolSpec};
use pagechat_core::models::ChatMessage;

use crate::prompts::PromptBundle;

/// The boolean signals one classification call produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuerySignals {
    pub greeting: bool,
    pub farewell: bool,
    pub follow_up: bool,
    pub is_relevant: bool,
    pub requires_clarification: bool,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The generation service returned something that is not the expected
    /// arguments object.
    #[error("malformed classification output: {0}")]
    Malformed(String),
    #[error("classification call failed: {0}")]
    Call(#[from] anyhow::Error),
}

/// The function the classifier is forced to call.
pub fn classification_tool() -> ToolSpec {
    ToolSpec {
        name: "classify_message".to_string(),
        description: "Label the latest user message so the assistant can decide \
how to handle it. Every field is required."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "greeting": {
                    "type": "boolean",
                    "description": "The latest message is a greeting or pleasantry \
(hi, hello, how are you, thanks)."
                },
                "farewell": {
                    "type": "boolean",
                    "description": "The latest message signals the user is done and \
leaving the conversation (goodbye, that's all, thanks bye)."
                },
                "follow_up": {
                    "type": "boolean",
                    "description": "The latest message asks for more detail, \
clarification, or elaboration on the assistant's previous answer, judged \
against the previous exchange."
                },
                "is_relevant": {
                    "type": "boolean",
                    "description": "The latest message asks something the \
organization's public website could answer. Purely conversational messages are \
not relevant. Be aggressive about filtering out unrelated questions."
                },
                "requires_clarification": {
                    "type": "boolean",
                    "description": "The latest message is too ambiguous to search \
for without asking the user one clarifying question first."
                }
            },
            "required": ["greeting", "farewell", "follow_up", "is_relevant",
                          "requires_clarification"]
        }),
    }
}

/// The function the clarification judge is forced to call.
pub fn judgment_tool() -> ToolSpec {
    ToolSpec {
        name: "judge_clarification_response".to_string(),
        description: "Report whether the latest user message directly answers the \
assistant's clarifying question."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "is_response": {
                    "type": "boolean",
                    "description": "True when the message answers the clarifying \
question rather than changing topic."
                }
            },
            "required": ["is_response"]
        }),
    }
}

fn required_bool(args: &Value, key: &str) -> Result<bool, ClassifyError> {
    args.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| ClassifyError::Malformed(format!("missing boolean field '{}'", key)))
}

pub fn parse_signals(args: &Value) -> Result<QuerySignals, ClassifyError> {
    Ok(QuerySignals {
        greeting: required_bool(args, "greeting")?,
        farewell: required_bool(args, "farewell")?,
        follow_up: required_bool(args, "follow_up")?,
        is_relevant: required_bool(args, "is_relevant")?,
        requires_clarification: required_bool(args, "requires_clarification")?,
    })
}

pub fn parse_judgment(args: &Value) -> Result<bool, ClassifyError> {
    required_bool(args, "is_response")
}

/// Build the classification prompt: system instruction, at most one prior
/// exchange (longer context distracts the labeling), then the new message.
fn classification_messages(
    system: &str,
    history: &[ChatMessage],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];
    if let Some(last) = history.last() {
        messages.push(last.clone());
    }
    messages.push(ChatMessage::user(user_message));
    messages
}

/// Classify a message, retrying once with a stricter instruction when the
/// structured output cannot be parsed.
pub async fn classify_message(
    generator: &dyn Generator,
    prompts: &PromptBundle,
    history: &[ChatMessage],
    user_message: &str,
) -> Result<QuerySignals, ClassifyError> {
    let tool = classification_tool();

    let messages = classification_messages(&prompts.classify, history, user_message);
    let first = generator.complete_structured(&messages, &tool).await;
    match first {
        Ok(args) => match parse_signals(&args) {
            Ok(signals) => return Ok(signals),
            Err(e) => tracing::warn!(error = %e, "classification output malformed, retrying"),
        },
        Err(e) => tracing::warn!(error = %e, "classification call failed, retrying"),
    }

    let strict = format!("{}{}", prompts.classify, prompts.classify_strict_suffix);
    let messages = classification_messages(&strict, history, user_message);
    let args = generator.complete_structured(&messages, &tool).await?;
    parse_signals(&args)
}

/// Judge whether `user_message` answers the clarifying question the
/// assistant asked on the previous turn.
pub async fn judge_clarification(
    generator: &dyn Generator,
    prompts: &PromptBundle,
    history: &[ChatMessage],
    user_message: &str,
) -> Result<bool, ClassifyError> {
    let messages = classification_messages(&prompts.judge_clarification, history, user_message);
    let args = generator.complete_structured(&messages, &judgment_tool()).await?;
    parse_judgment(&args)
}
