//! Conversational router.
//!
//! A per-conversation state machine that decides, for each incoming
//! message, whether to retrieve, ask for clarification, or answer directly.
//! One classification call labels the message; the decision then follows a
//! fixed precedence, first match wins:
//!
//! 1. **GREET**
//! 2. **FAREWELL**
//! 3. **FOLLOW_UP** — answer from the most recently cached retrieval,
//!    no new search.
//! 4. **CLARIFICATION_RESPONSE** — the previous turn asked a clarifying
//!    question; a narrow judge decides whether this message answers it, and
//!    a yes retrieves with the original pre-clarification query.
//! 5. **REQUIRE_CLARIFICATION** — ask one clarifying question, remember the
//!    query, no retrieval.
//! 6. **SEARCH** — run the hybrid engine and answer from the sources.
//! 7. **NO_ANSWER** — the message is out of scope.
//!
//! Every branch selects its template from the [`PromptBundle`]; deployments
//! that want different personas swap the bundle, not the router. The router
//! only reads indexed data; all writes stay in the ingestion pipeline.
//!
//! Failure policy: a malformed classification fails closed to NO_ANSWER
//! (after one stricter retry inside [`classify_message`]); any other
//! internal error surfaces to the user as the bundle's generic fallback
//! message, with the cause recorded in the trace.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pagechat_core::embedding::{embed_query, Embedder};
use pagechat_core::generation::Generator;
use pagechat_core::models::{ChatMessage, Fragment, RetrievalMode, Role};
use pagechat_core::search::{search, SearchParams, SearchRequest};
use pagechat_core::session::{SessionStore, UserProfile};
use pagechat_core::store::Store;

use crate::classify::{classify_message, judge_clarification};
use crate::prompts::PromptBundle;

/// Router behavior knobs derived from application config.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub default_mode: RetrievalMode,
    pub default_top: usize,
    pub search_params: SearchParams,
    /// Offer captured profile facts to the generation service.
    pub with_user_profile: bool,
    /// Most recent turns included in answer prompts.
    pub history_limit: usize,
}

/// Per-call overrides from the chat API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatOverrides {
    #[serde(default)]
    pub retrieval_mode: Option<RetrievalMode>,
    #[serde(default)]
    pub top: Option<usize>,
}

/// One chat turn: the full message history with the new user message last.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub overrides: ChatOverrides,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
}

/// Which branch of the state machine handled the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Greet,
    Farewell,
    FollowUp,
    ClarificationResponse,
    RequireClarification,
    Search,
    NoAnswer,
}

/// A ranked result as recorded in the trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceResult {
    pub id: String,
    pub url: String,
    pub title: String,
}

impl From<&Fragment> for TraceResult {
    fn from(f: &Fragment) -> Self {
        TraceResult { id: f.id.clone(), url: f.url.clone(), title: f.title.clone() }
    }
}

/// Diagnostic record of one turn: what fired, what was searched, and the
/// exact prompt sent to generation. Never feeds back into control flow.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTrace {
    pub action: RouteAction,
    pub retrieval: bool,
    pub query_text: Option<String>,
    pub vector_dims: Option<usize>,
    pub results: Vec<TraceResult>,
    pub prompt: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub trace: ChatTrace,
}

pub struct ChatRouter {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    prompts: PromptBundle,
    sessions: Arc<SessionStore>,
    settings: RouterSettings,
}

/// Everything a branch needs to finish a turn.
struct Turn<'a> {
    req: &'a ChatRequest,
    user_message: &'a str,
    history: &'a [ChatMessage],
    profile: Option<UserProfile>,
}

impl ChatRouter {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        prompts: PromptBundle,
        sessions: Arc<SessionStore>,
        settings: RouterSettings,
    ) -> Self {
        Self { store, embedder, generator, prompts, sessions, settings }
    }

    /// Handle one turn. Internal failures never propagate: the user gets the
    /// bundle's fallback message and the trace records the cause.
    pub async fn chat(&self, req: &ChatRequest) -> ChatResponse {
        match self.handle_turn(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(conversation = %req.conversation_id, error = %e,
                    "chat turn failed; returning fallback");
                ChatResponse {
                    answer: self.prompts.fallback_message.clone(),
                    trace: ChatTrace {
                        action: RouteAction::NoAnswer,
                        retrieval: false,
                        query_text: None,
                        vector_dims: None,
                        results: Vec::new(),
                        prompt: Vec::new(),
                        error: Some(e.to_string()),
                    },
                }
            }
        }
    }

    async fn handle_turn(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let last = req
            .messages
            .last()
            .filter(|m| m.role == Role::User)
            .context("the last message of a chat turn must be from the user")?;
        let user_message = last.content.clone();
        let history = &req.messages[..req.messages.len() - 1];

        // Capture the profile on first sighting; later values are ignored.
        if self.settings.with_user_profile {
            if let Some(profile) = req.user_profile.as_ref().filter(|p| !p.is_empty()) {
                self.sessions.with_session(&req.conversation_id, |s| {
                    if s.profile.is_none() {
                        s.profile = Some(profile.clone());
                    }
                });
            }
        }

        let (pending, pending_query, cached_context, profile) =
            self.sessions.with_session(&req.conversation_id, |s| {
                (
                    s.pending_clarification,
                    s.pending_query.clone(),
                    s.last_context().cloned(),
                    s.profile.clone(),
                )
            });
        let profile = profile.filter(|_| self.settings.with_user_profile);

        let turn = Turn { req, user_message: &user_message, history, profile };

        let signals = match classify_message(
            self.generator.as_ref(),
            &self.prompts,
            history,
            &user_message,
        )
        .await
        {
            Ok(signals) => signals,
            Err(e) => {
                // Fail closed: an unclassifiable message is out of scope.
                tracing::warn!(conversation = %req.conversation_id, error = %e,
                    "classification failed; answering as out of scope");
                return self
                    .plain_turn(&turn, RouteAction::NoAnswer, Some(e.to_string()))
                    .await;
            }
        };

        if signals.greeting {
            return self.plain_turn(&turn, RouteAction::Greet, None).await;
        }
        if signals.farewell {
            return self.plain_turn(&turn, RouteAction::Farewell, None).await;
        }

        if signals.follow_up && !signals.requires_clarification && !history.is_empty() {
            if let Some(context) = &cached_context {
                return self.follow_up_turn(&turn, context).await;
            }
            // Nothing cached to expand on; fall through to the remaining
            // branches.
        }

        if pending {
            let verdict = judge_clarification(
                self.generator.as_ref(),
                &self.prompts,
                history,
                &user_message,
            )
            .await;
            // The flag clears whatever the judge said: one clarifying
            // question gets one shot at an answer.
            self.sessions.with_session(&req.conversation_id, |s| {
                s.pending_clarification = false;
                s.pending_query = None;
            });

            match verdict {
                Ok(true) => {
                    if let Some(original_query) = pending_query {
                        return self
                            .search_turn(&turn, RouteAction::ClarificationResponse, &original_query)
                            .await;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(conversation = %req.conversation_id, error = %e,
                        "clarification judgment failed; answering as out of scope");
                    return self
                        .plain_turn(&turn, RouteAction::NoAnswer, Some(e.to_string()))
                        .await;
                }
            }
        }

        if signals.requires_clarification {
            return self.clarification_turn(&turn).await;
        }

        if signals.is_relevant {
            return self.search_turn(&turn, RouteAction::Search, &user_message).await;
        }

        self.plain_turn(&turn, RouteAction::NoAnswer, None).await
    }

    /// GREET, FAREWELL, and NO_ANSWER: one templated reply, no history, no
    /// retrieval.
    async fn plain_turn(
        &self,
        turn: &Turn<'_>,
        action: RouteAction,
        error: Option<String>,
    ) -> Result<ChatResponse> {
        let template = match action {
            RouteAction::Greet => &self.prompts.greeting,
            RouteAction::Farewell => &self.prompts.farewell,
            _ => &self.prompts.no_answer,
        };
        // Farewells don't benefit from profile context.
        let profile = match action {
            RouteAction::Farewell => None,
            _ => turn.profile.as_ref(),
        };
        let prompt = self.build_prompt(
            template,
            &[],
            self.user_content(turn.user_message, profile, None),
        );
        let answer = self.generator.complete(&prompt).await?;

        Ok(ChatResponse {
            answer,
            trace: ChatTrace {
                action,
                retrieval: false,
                query_text: None,
                vector_dims: None,
                results: Vec::new(),
                prompt,
                error,
            },
        })
    }

    /// FOLLOW_UP: answer from the most recently cached sources.
    async fn follow_up_turn(&self, turn: &Turn<'_>, context: &str) -> Result<ChatResponse> {
        let recent = turn.history.last().map(std::slice::from_ref).unwrap_or(&[]);
        let prompt = self.build_prompt(
            &self.prompts.follow_up,
            recent,
            self.user_content(turn.user_message, turn.profile.as_ref(), Some(context)),
        );
        let answer = self.generator.complete(&prompt).await?;

        Ok(ChatResponse {
            answer,
            trace: ChatTrace {
                action: RouteAction::FollowUp,
                retrieval: false,
                query_text: None,
                vector_dims: None,
                results: Vec::new(),
                prompt,
                error: None,
            },
        })
    }

    /// REQUIRE_CLARIFICATION: ask the question and remember the query that
    /// needs it.
    async fn clarification_turn(&self, turn: &Turn<'_>) -> Result<ChatResponse> {
        let prompt = self.build_prompt(
            &self.prompts.clarification,
            turn.history,
            self.user_content(turn.user_message, turn.profile.as_ref(), None),
        );
        let answer = self.generator.complete(&prompt).await?;

        let original_query = turn.user_message.to_string();
        self.sessions.with_session(&turn.req.conversation_id, |s| {
            s.pending_clarification = true;
            s.pending_query = Some(original_query.clone());
        });

        Ok(ChatResponse {
            answer,
            trace: ChatTrace {
                action: RouteAction::RequireClarification,
                retrieval: false,
                query_text: None,
                vector_dims: None,
                results: Vec::new(),
                prompt,
                error: None,
            },
        })
    }

    /// SEARCH and CLARIFICATION_RESPONSE: retrieve with `query`, cache the
    /// sources, answer from them.
    async fn search_turn(
        &self,
        turn: &Turn<'_>,
        action: RouteAction,
        query: &str,
    ) -> Result<ChatResponse> {
        let mode = turn.req.overrides.retrieval_mode.unwrap_or(self.settings.default_mode);
        let top = turn.req.overrides.top.unwrap_or(self.settings.default_top);

        let query_text = matches!(mode, RetrievalMode::Text | RetrievalMode::Hybrid)
            .then(|| query.to_string());
        let query_vector = match mode {
            RetrievalMode::Vector | RetrievalMode::Hybrid => Some(
                embed_query(self.embedder.as_ref(), query)
                    .await
                    .context("query embedding failed")?,
            ),
            RetrievalMode::Text => None,
        };
        let vector_dims = query_vector.as_ref().map(Vec::len);

        let results = search(
            self.store.as_ref(),
            &SearchRequest {
                query_text: query_text.clone(),
                query_vector,
                top,
                filters: Vec::new(),
                params: self.settings.search_params.clone(),
            },
        )
        .await
        .context("retrieval failed")?;

        let sources = results
            .iter()
            .map(Fragment::source_block)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.sessions.with_session(&turn.req.conversation_id, |s| {
            s.push_context(sources.clone());
        });

        let template = match action {
            RouteAction::ClarificationResponse => &self.prompts.clarification_answer,
            _ => &self.prompts.answer,
        };
        let prompt = self.build_prompt(
            template,
            turn.history,
            self.user_content(turn.user_message, turn.profile.as_ref(), Some(&sources)),
        );
        let answer = self.generator.complete(&prompt).await?;

        Ok(ChatResponse {
            answer,
            trace: ChatTrace {
                action,
                retrieval: true,
                query_text: Some(query.to_string()),
                vector_dims,
                results: results.iter().map(TraceResult::from).collect(),
                prompt,
                error: None,
            },
        })
    }

    fn build_prompt(
        &self,
        system: &str,
        history: &[ChatMessage],
        user_content: String,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system)];
        let skip = history.len().saturating_sub(self.settings.history_limit);
        messages.extend(history[skip..].iter().cloned());
        messages.push(ChatMessage::user(user_content));
        messages
    }

    fn user_content(
        &self,
        message: &str,
        profile: Option<&UserProfile>,
        sources: Option<&str>,
    ) -> String {
        let mut content = message.to_string();
        if let Some(block) = profile.and_then(UserProfile::context_block) {
            content.push_str("\n\nUser profile:\n");
            content.push_str(&block);
        }
        if let Some(sources) = sources {
            content.push_str("\n\nSources:\n");
            content.push_str(sources);
        }
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{document, signals_json, MockEmbedder, MockGenerator};
    use pagechat_core::chunk::content_hash;
    use pagechat_core::models::DocumentMeta;
    use pagechat_core::store::memory::InMemoryStore;

    struct Harness {
        router: ChatRouter,
        generator: Arc<MockGenerator>,
        sessions: Arc<SessionStore>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "https://example.org/fees", "Fees are due in October.").await;
        seed(&store, "https://example.org/library", "The library opens at nine.").await;

        let generator = Arc::new(MockGenerator::new());
        let sessions = Arc::new(SessionStore::new());
        let router = ChatRouter::new(
            store,
            Arc::new(MockEmbedder::new(4)),
            generator.clone(),
            PromptBundle::default(),
            sessions.clone(),
            RouterSettings {
                default_mode: RetrievalMode::Text,
                default_top: 3,
                search_params: SearchParams::default(),
                with_user_profile: true,
                history_limit: 10,
            },
        );
        Harness { router, generator, sessions }
    }

    async fn seed(store: &InMemoryStore, url: &str, content: &str) {
        let input = document(url, content);
        let hash = content_hash(content);
        let meta = DocumentMeta {
            url: input.url.clone(),
            content_hash: hash.clone(),
            title: input.title.clone(),
            doc_type: input.doc_type,
            scraped_at: input.scraped_at,
        };
        let fragment = Fragment {
            id: format!("{}_0", hash),
            doc_id: hash,
            chunk_index: 0,
            doc_type: input.doc_type,
            url: input.url,
            title: input.title,
            content: content.to_string(),
            scraped_at: input.scraped_at,
        };
        store.replace_document(&meta, &[fragment], &[vec![1.0, 0.0, 0.0, 0.0]]).await.unwrap();
    }

    fn request(conversation: &str, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation.to_string(),
            messages,
            overrides: ChatOverrides::default(),
            user_profile: None,
        }
    }

    #[tokio::test]
    async fn greeting_takes_precedence_over_follow_up() {
        let h = harness().await;
        h.generator.queue_structured(signals_json(true, false, true, true, false));
        h.generator.queue_completion("Hello!");

        let response = h
            .router
            .chat(&request("c1", vec![ChatMessage::user("hi there")]))
            .await;

        assert_eq!(response.trace.action, RouteAction::Greet);
        assert_eq!(response.answer, "Hello!");
        assert!(!response.trace.retrieval);
        assert!(response.trace.results.is_empty());
    }

    #[tokio::test]
    async fn relevant_question_searches_and_caches_the_sources() {
        let h = harness().await;
        h.generator.queue_structured(signals_json(false, false, false, true, false));
        h.generator.queue_completion("Fees are due in October [..._0].");

        let response = h
            .router
            .chat(&request("c1", vec![ChatMessage::user("When are fees due?")]))
            .await;

        assert_eq!(response.trace.action, RouteAction::Search);
        assert!(response.trace.retrieval);
        assert_eq!(response.trace.query_text.as_deref(), Some("When are fees due?"));
        assert!(!response.trace.results.is_empty());
        // Text mode embeds nothing.
        assert_eq!(response.trace.vector_dims, None);

        let cached = h.sessions.with_session("c1", |s| s.last_context().cloned());
        assert!(cached.unwrap().contains("October"));
    }

    #[tokio::test]
    async fn follow_up_reuses_the_cached_context_without_searching() {
        let h = harness().await;

        // Turn 1: a search caches sources.
        h.generator.queue_structured(signals_json(false, false, false, true, false));
        h.generator.queue_completion("Fees are due in October.");
        let turn1 = vec![ChatMessage::user("When are fees due?")];
        h.router.chat(&request("c1", turn1.clone())).await;

        // Turn 2: a follow-up answers from the cache.
        h.generator.queue_structured(signals_json(false, false, true, true, false));
        h.generator.queue_completion("They are due at the start of October.");
        let mut turn2 = turn1;
        turn2.push(ChatMessage::assistant("Fees are due in October."));
        turn2.push(ChatMessage::user("Which day exactly?"));

        let response = h.router.chat(&request("c1", turn2)).await;

        assert_eq!(response.trace.action, RouteAction::FollowUp);
        assert!(!response.trace.retrieval);
        let prompt_user = &response.trace.prompt.last().unwrap().content;
        assert!(prompt_user.contains("Sources:"));
        assert!(prompt_user.contains("October"));
    }

    #[tokio::test]
    async fn follow_up_on_the_first_turn_is_not_honored() {
        let h = harness().await;
        // follow_up set but there is no prior turn: falls through to search.
        h.generator.queue_structured(signals_json(false, false, true, true, false));
        h.generator.queue_completion("Fees are due in October.");

        let response = h
            .router
            .chat(&request("c1", vec![ChatMessage::user("When are fees due?")]))
            .await;

        assert_eq!(response.trace.action, RouteAction::Search);
    }

    #[tokio::test]
    async fn clarification_round_trip_uses_the_original_query() {
        let h = harness().await;

        // Turn 1: ambiguous question sets the pending flag.
        h.generator.queue_structured(signals_json(false, false, false, true, true));
        h.generator.queue_completion("Which fees do you mean?");
        let response = h
            .router
            .chat(&request("c1", vec![ChatMessage::user("Tell me about fees")]))
            .await;
        assert_eq!(response.trace.action, RouteAction::RequireClarification);
        assert!(!response.trace.retrieval);
        assert!(h.sessions.with_session("c1", |s| s.pending_clarification));

        // Turn 2: the judge confirms the answer; retrieval runs with the
        // original query, not the clarification text.
        h.generator.queue_structured(signals_json(false, false, false, false, false));
        h.generator.queue_structured(serde_json::json!({"is_response": true}));
        h.generator.queue_completion("Tuition fees are due in October.");

        let messages = vec![
            ChatMessage::user("Tell me about fees"),
            ChatMessage::assistant("Which fees do you mean?"),
            ChatMessage::user("Tuition fees"),
        ];
        let response = h.router.chat(&request("c1", messages)).await;

        assert_eq!(response.trace.action, RouteAction::ClarificationResponse);
        assert!(response.trace.retrieval);
        assert_eq!(response.trace.query_text.as_deref(), Some("Tell me about fees"));
        assert!(!h.sessions.with_session("c1", |s| s.pending_clarification));

        assert_eq!(
            h.generator.structured_tool_names(),
            vec![
                "classify_message",
                "classify_message",
                "judge_clarification_response"
            ]
        );
    }

    #[tokio::test]
    async fn pending_flag_clears_even_when_the_judge_says_no() {
        let h = harness().await;

        h.generator.queue_structured(signals_json(false, false, false, true, true));
        h.generator.queue_completion("Which fees do you mean?");
        h.router
            .chat(&request("c1", vec![ChatMessage::user("Tell me about fees")]))
            .await;

        // The user changes topic; the judge declines, and with no other
        // signal set the turn lands on NO_ANSWER.
        h.generator.queue_structured(signals_json(false, false, false, false, false));
        h.generator.queue_structured(serde_json::json!({"is_response": false}));
        h.generator.queue_completion("That's outside what I can help with.");

        let messages = vec![
            ChatMessage::user("Tell me about fees"),
            ChatMessage::assistant("Which fees do you mean?"),
            ChatMessage::user("What's the weather like?"),
        ];
        let response = h.router.chat(&request("c1", messages)).await;

        assert_eq!(response.trace.action, RouteAction::NoAnswer);
        assert!(!response.trace.retrieval);
        assert!(!h.sessions.with_session("c1", |s| s.pending_clarification));
    }

    #[tokio::test]
    async fn malformed_classification_fails_closed_to_no_answer() {
        let h = harness().await;
        // Both the first attempt and the stricter retry come back broken.
        h.generator.queue_structured(serde_json::json!({"greeting": "yes"}));
        h.generator.queue_structured_error("tool call missing");
        h.generator.queue_completion("That's outside what I can help with.");

        let response = h
            .router
            .chat(&request("c1", vec![ChatMessage::user("When are fees due?")]))
            .await;

        assert_eq!(response.trace.action, RouteAction::NoAnswer);
        assert!(!response.trace.retrieval);
        assert!(response.trace.error.is_some());
    }

    #[tokio::test]
    async fn profile_is_captured_once_and_offered_to_prompts() {
        let h = harness().await;

        let mut req = request("c1", vec![ChatMessage::user("When are fees due?")]);
        req.user_profile = Some(UserProfile {
            role: Some("student".to_string()),
            affiliation: None,
            level_of_study: None,
        });
        h.generator.queue_structured(signals_json(false, false, false, true, false));
        h.generator.queue_completion("October.");
        let response = h.router.chat(&req).await;
        assert!(response.trace.prompt.last().unwrap().content.contains("role: student"));

        // A different profile later in the conversation is ignored.
        let mut req = request("c1", vec![ChatMessage::user("And the library?")]);
        req.user_profile = Some(UserProfile {
            role: Some("staff".to_string()),
            affiliation: None,
            level_of_study: None,
        });
        h.generator.queue_structured(signals_json(false, false, false, true, false));
        h.generator.queue_completion("Nine.");
        h.router.chat(&req).await;

        let stored = h.sessions.with_session("c1", |s| s.profile.clone()).unwrap();
        assert_eq!(stored.role.as_deref(), Some("student"));
    }

    #[tokio::test]
    async fn concurrent_conversations_do_not_share_state() {
        let h = harness().await;

        h.generator.queue_structured(signals_json(false, false, false, true, true));
        h.generator.queue_completion("Which fees?");
        h.router
            .chat(&request("alpha", vec![ChatMessage::user("Tell me about fees")]))
            .await;

        assert!(h.sessions.with_session("alpha", |s| s.pending_clarification));
        assert!(!h.sessions.with_session("beta", |s| s.pending_clarification));
    }

    #[tokio::test]
    async fn internal_failure_returns_the_generic_fallback() {
        let h = harness().await;
        // An empty message list is rejected before any external call runs.
        let response = h.router.chat(&request("c1", vec![])).await;

        assert_eq!(response.answer, PromptBundle::default().fallback_message);
        assert!(response.trace.error.is_some());
    }
}
