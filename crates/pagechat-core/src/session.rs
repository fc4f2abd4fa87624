//! Per-conversation session state.
//!
//! Each conversation owns a [`Session`]: the pending-clarification flag with
//! the query text that triggered it, a bounded FIFO of recently retrieved
//! source blocks, and the user profile captured on first sighting. Sessions
//! live in a [`SessionStore`] keyed by conversation id and passed into the
//! router on every call. State is never process-global, so concurrent
//! conversations cannot read or corrupt each other's flags.
//!
//! Sessions are ephemeral: nothing here is persisted, and [`SessionStore::remove`]
//! discards a conversation outright.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// How many retrieved contexts a conversation keeps.
pub const CONTEXT_CACHE_CAPACITY: usize = 3;

/// Free-form facts about the person asking, captured once per conversation
/// and offered to the generation service as extra context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub level_of_study: Option<String>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.affiliation.is_none() && self.level_of_study.is_none()
    }

    /// Render the profile as a prompt context block, or `None` when empty.
    pub fn context_block(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut lines = Vec::new();
        if let Some(role) = &self.role {
            lines.push(format!("role: {}", role));
        }
        if let Some(affiliation) = &self.affiliation {
            lines.push(format!("affiliation: {}", affiliation));
        }
        if let Some(level) = &self.level_of_study {
            lines.push(format!("level of study: {}", level));
        }
        Some(lines.join("\n"))
    }
}

/// Mutable state of one conversation.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Set when the previous turn asked a clarifying question.
    pub pending_clarification: bool,
    /// The original query text that triggered the clarifying question;
    /// retrieval for a clarification answer uses this, not the new message.
    pub pending_query: Option<String>,
    /// Profile facts captured on the first turn that offered them.
    pub profile: Option<UserProfile>,
    retrieved: VecDeque<String>,
}

impl Session {
    /// Append a retrieved context, evicting the oldest past capacity.
    pub fn push_context(&mut self, context: String) {
        if self.retrieved.len() == CONTEXT_CACHE_CAPACITY {
            self.retrieved.pop_front();
        }
        self.retrieved.push_back(context);
    }

    /// The most recently retrieved context, if any.
    pub fn last_context(&self) -> Option<&String> {
        self.retrieved.back()
    }

    pub fn context_count(&self) -> usize {
        self.retrieved.len()
    }
}

/// Conversation-id-keyed session map.
///
/// Sessions are created lazily on first access and mutated under a write
/// lock; the closure passed to [`with_session`](SessionStore::with_session)
/// must not block, and async work happens outside it.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the session for `conversation_id`, creating it on
    /// first use.
    pub fn with_session<F, R>(&self, conversation_id: &str, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.inner.write().unwrap();
        f(sessions.entry(conversation_id.to_string()).or_default())
    }

    /// Discard a conversation's state entirely.
    pub fn remove(&self, conversation_id: &str) {
        self.inner.write().unwrap().remove(conversation_id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}
