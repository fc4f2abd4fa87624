//! Shared test doubles: a deterministic embedder, a failing embedder, and a
//! scriptable generator. Compiled for tests only.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use pagechat_core::embedding::Embedder;
use pagechat_core::generation::{Generator, ToolSpec};
use pagechat_core::models::{ChatMessage, DocType, DocumentInput};

/// Deterministic embedder: the vector depends only on the text bytes, so
/// identical texts always land at the same point.
pub struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dims];
                for (i, b) in text.bytes().enumerate() {
                    v[i % self.dims] += b as f32;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1.0);
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }
}

/// An embedder that always fails, for exercising the abort path.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embedder"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

/// Scriptable generator: structured responses and completions are queued in
/// call order, and every call is recorded for assertions.
#[derive(Default)]
pub struct MockGenerator {
    structured: Mutex<VecDeque<Result<Value, String>>>,
    completions: Mutex<VecDeque<String>>,
    /// Tool names of structured calls, in order.
    pub structured_calls: Mutex<Vec<String>>,
    /// Full prompts of plain completion calls, in order.
    pub completion_prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_structured(&self, value: Value) {
        self.structured.lock().unwrap().push_back(Ok(value));
    }

    pub fn queue_structured_error(&self, message: &str) {
        self.structured.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn queue_completion(&self, answer: &str) {
        self.completions.lock().unwrap().push_back(answer.to_string());
    }

    pub fn structured_tool_names(&self) -> Vec<String> {
        self.structured_calls.lock().unwrap().clone()
    }

    pub fn last_completion_prompt(&self) -> Option<Vec<ChatMessage>> {
        self.completion_prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn model_name(&self) -> &str {
        "mock-generator"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.completion_prompts.lock().unwrap().push(messages.to_vec());
        Ok(self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "mock answer".to_string()))
    }

    async fn complete_structured(&self, _messages: &[ChatMessage], tool: &ToolSpec) -> Result<Value> {
        self.structured_calls.lock().unwrap().push(tool.name.clone());
        match self.structured.lock().unwrap().pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => bail!("{}", message),
            None => bail!("no scripted structured response left"),
        }
    }
}

/// Classification output with the given flags set.
pub fn signals_json(
    greeting: bool,
    farewell: bool,
    follow_up: bool,
    is_relevant: bool,
    requires_clarification: bool,
) -> Value {
    json!({
        "greeting": greeting,
        "farewell": farewell,
        "follow_up": follow_up,
        "is_relevant": is_relevant,
        "requires_clarification": requires_clarification,
    })
}

/// A crawled webpage with fixed metadata.
pub fn document(url: &str, content: &str) -> DocumentInput {
    DocumentInput {
        url: url.to_string(),
        content: content.to_string(),
        title: "Test page".to_string(),
        doc_type: DocType::Webpage,
        scraped_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}
