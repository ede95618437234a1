//! Conversation engine: the bounded agent loop.
//!
//! One turn runs this state machine:
//!
//! ```text
//! AwaitingModel ──(no tool calls)──▶ Completed
//!      │  ▲
//!      │  └──────(results appended)──────┐
//!      ▼                                 │
//! (tool calls) ──▶ ExecutingTools ───────┘
//!
//! AwaitingModel at the iteration cap ──▶ Aborted
//! ```
//!
//! The turn works on a copy of the session history and commits through the
//! session store only when it ends in `Completed` or `Aborted`. A model
//! failure that exhausts the retry budget commits nothing, and a session
//! created for that turn is removed again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::directive::{build_directive, TurnProgress};
use super::errors::AgentError;
use super::interaction::fold_tool_outcome;
use super::locator::LocatorExtractor;
use super::session_store::SessionStore;
use super::tokens::{estimate_history_tokens, truncate_tool_result};
use super::types::{
    ContentPart, ContextPatch, LocatorRecord, Message, Session, SessionPatch, TurnOutcome,
    TurnStatus,
};
use crate::inference::types::{
    ChatMessage, FunctionCallResponse, ModelReply, ModelRequest, Role, ToolCall, ToolCallResponse,
};
use crate::inference::{InferenceError, ModelService};
use crate::mcp_client::{McpError, ToolRegistry, ToolResult};

// ─── Settings ───────────────────────────────────────────────────────────────

/// Loop and retry limits.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model round-trips per turn before the loop aborts.
    pub max_iterations: u32,
    /// Failed model calls tolerated per turn, shared across the whole loop.
    pub max_model_attempts: u32,
    /// Backoff unit after an overload; multiplied by the failure count.
    pub overload_backoff: Duration,
    /// Fixed delay before the single retry of any other transient failure.
    pub transient_retry_delay: Duration,
    /// Tool results longer than this are truncated before entering history.
    pub max_tool_result_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_model_attempts: 3,
            overload_backoff: Duration::from_secs(2),
            transient_retry_delay: Duration::from_secs(1),
            max_tool_result_chars: 6_000,
        }
    }
}

/// Text returned when a turn completes without any model text.
const COMPLETION_MARKER: &str = "Task completed.";

// ─── State Machine ──────────────────────────────────────────────────────────

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    Completed,
    Aborted,
}

/// Failed model calls, counted across the whole turn.
#[derive(Debug)]
struct RetryBudget {
    max_attempts: u32,
    failures: u32,
}

impl RetryBudget {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    /// Record a failure; `false` once the budget is spent.
    fn consume(&mut self) -> bool {
        self.failures += 1;
        self.failures < self.max_attempts
    }
}

/// Mutable bookkeeping for one turn, kept apart from the committed session.
#[derive(Debug)]
struct Turn {
    session_id: String,
    /// History as the model sees it: committed history plus this turn.
    history: Vec<Message>,
    /// Messages produced by this turn, committed at the end.
    new_messages: Vec<Message>,
    text_segments: Vec<String>,
    locators: Vec<LocatorRecord>,
    context: ContextPatch,
    iterations: u32,
    tool_calls: u64,
    budget: RetryBudget,
}

impl Turn {
    fn push(&mut self, message: Message) {
        self.history.push(message.clone());
        self.new_messages.push(message);
    }
}

// ─── ConversationEngine ─────────────────────────────────────────────────────

/// Drives prompts through the model and the tool registry.
///
/// Safe to share across tasks; turns on different sessions run concurrently,
/// turns on the same session are rejected while one is in flight.
pub struct ConversationEngine {
    model: Arc<dyn ModelService>,
    registry: Arc<ToolRegistry>,
    store: SessionStore,
    extractor: LocatorExtractor,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        model: Arc<dyn ModelService>,
        registry: Arc<ToolRegistry>,
        store: SessionStore,
        extractor: LocatorExtractor,
        settings: EngineSettings,
    ) -> Self {
        Self {
            model,
            registry,
            store,
            extractor,
            settings,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run one prompt to completion.
    ///
    /// With `continue_session` and an id, the prompt joins that session
    /// (`SessionNotFound` if it is gone); otherwise a new session is created,
    /// and removed again if the turn fails.
    pub async fn process_prompt(
        &self,
        session_id: Option<&str>,
        continue_session: bool,
        prompt: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let (guard, session, fresh) = match session_id {
            Some(id) if continue_session => {
                let (guard, session) = self.store.begin_turn(id)?;
                (guard, session, false)
            }
            _ => {
                let id = self.store.create().id;
                let (guard, session) = self.store.begin_turn(&id)?;
                (guard, session, true)
            }
        };

        tracing::info!(
            session_id = %session.id,
            continuing = session.is_continuing(),
            prompt_len = prompt.len(),
            "processing prompt"
        );

        let mut turn = Turn {
            session_id: session.id.clone(),
            history: session.history.clone(),
            new_messages: Vec::new(),
            text_segments: Vec::new(),
            locators: Vec::new(),
            context: ContextPatch::default(),
            iterations: 0,
            tool_calls: 0,
            budget: RetryBudget::new(self.settings.max_model_attempts),
        };
        turn.push(Message::user_text(prompt));

        let status = match self.run_loop(&session, &mut turn).await {
            Ok(status) => status,
            Err(e) => {
                drop(guard);
                if fresh {
                    self.store.delete(&session.id);
                }
                return Err(e);
            }
        };
        self.commit(turn, status)
    }

    async fn run_loop(&self, session: &Session, turn: &mut Turn) -> Result<TurnStatus, AgentError> {
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if turn.iterations >= self.settings.max_iterations {
                        tracing::warn!(
                            session_id = %turn.session_id,
                            iterations = turn.iterations,
                            "iteration cap reached, aborting turn"
                        );
                        LoopState::Aborted
                    } else {
                        turn.iterations += 1;
                        let reply = self.query_model(session, turn).await?;
                        self.absorb_reply(turn, reply)
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    self.execute_tools(turn, calls).await;
                    LoopState::AwaitingModel
                }
                LoopState::Completed => return Ok(TurnStatus::Completed),
                LoopState::Aborted => return Ok(TurnStatus::Aborted),
            };
        }
    }

    /// `AwaitingModel` → `Completed` or `ExecutingTools`.
    fn absorb_reply(&self, turn: &mut Turn, reply: ModelReply) -> LoopState {
        let text = reply.text.filter(|t| !t.trim().is_empty());
        if let Some(text) = &text {
            turn.text_segments.push(text.clone());
        }

        if reply.tool_calls.is_empty() {
            if let Some(text) = text {
                turn.push(Message::assistant(Some(text), Vec::new()));
            }
            return LoopState::Completed;
        }

        let parts = reply
            .tool_calls
            .iter()
            .map(|call| ContentPart::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .collect();
        turn.push(Message::assistant(text, parts));
        LoopState::ExecutingTools(reply.tool_calls)
    }

    // ─── Model Calls ────────────────────────────────────────────────────

    /// One model call under the turn's retry budget.
    async fn query_model(&self, session: &Session, turn: &mut Turn) -> Result<ModelReply, AgentError> {
        let request = ModelRequest {
            system: build_directive(
                &self.registry,
                session,
                TurnProgress {
                    steps: turn.tool_calls,
                    context: Some(&turn.context),
                    locators: &turn.locators,
                },
            ),
            messages: to_chat_messages(&turn.history),
            tools: self.registry.to_model_tools(),
        };
        tracing::debug!(
            session_id = %turn.session_id,
            iteration = turn.iterations,
            model = self.model.model_name(),
            history_tokens = estimate_history_tokens(&turn.history),
            "querying model"
        );

        let mut transient_retried = false;
        loop {
            let err = match self.model.complete(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };

            let has_budget = turn.budget.consume();
            let attempt = turn.budget.failures;
            let delay = match retry_delay(&err, attempt, transient_retried, &self.settings) {
                Some(delay) if has_budget => delay,
                _ => {
                    tracing::warn!(
                        session_id = %turn.session_id,
                        attempt,
                        error = %err,
                        "model call failed, giving up"
                    );
                    return Err(AgentError::ModelServiceError {
                        attempts: attempt,
                        source: err,
                    });
                }
            };
            if !err.is_overloaded() {
                transient_retried = true;
            }

            tracing::warn!(
                session_id = %turn.session_id,
                attempt,
                overloaded = err.is_overloaded(),
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "model call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    // ─── Tool Execution ─────────────────────────────────────────────────

    /// `ExecutingTools`: dispatch every call concurrently and join.
    ///
    /// A call whose arguments could not be parsed is not dispatched; it gets
    /// an error result so the model can retry it.
    async fn execute_tools(&self, turn: &mut Turn, calls: Vec<ToolCall>) {
        let outcomes = futures::future::join_all(calls.iter().map(|call| {
            let registry = Arc::clone(&self.registry);
            async move {
                match &call.argument_error {
                    Some(reason) => Err(McpError::InvalidArguments {
                        tool: call.name.clone(),
                        reason: reason.clone(),
                    }),
                    None => registry.call(&call.name, call.arguments.clone()).await,
                }
            }
        }))
        .await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, outcome) in calls.iter().zip(outcomes) {
            turn.tool_calls += 1;
            let (content, is_error, result) = match outcome {
                Ok(result) => (
                    truncate_tool_result(&result.text(), &call.name, self.settings.max_tool_result_chars),
                    result.is_error,
                    Some(result),
                ),
                Err(e) => {
                    tracing::warn!(
                        session_id = %turn.session_id,
                        tool = %call.name,
                        error = %e,
                        "tool call failed"
                    );
                    (format!("Error: {e}"), true, None)
                }
            };

            self.record_outcome(turn, call, result.as_ref());
            results.push(ContentPart::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error,
            });
        }

        turn.push(Message::tool_results(results));
    }

    /// Derive the locator record and context changes for one call.
    fn record_outcome(&self, turn: &mut Turn, call: &ToolCall, result: Option<&ToolResult>) {
        let args = if call.arguments.is_null() {
            Value::Object(Default::default())
        } else {
            call.arguments.clone()
        };
        let record = self.extractor.extract(&call.name, &args, result);
        turn.context.merge(fold_tool_outcome(
            &self.extractor,
            &call.name,
            &args,
            result,
            record.as_ref(),
        ));
        if let Some(record) = record {
            tracing::debug!(
                session_id = %turn.session_id,
                action = %record.action,
                locator = ?record.locator,
                success = record.success,
                "locator recorded"
            );
            turn.locators.push(record);
        }
    }

    // ─── Commit ─────────────────────────────────────────────────────────

    fn commit(&self, turn: Turn, status: TurnStatus) -> Result<TurnOutcome, AgentError> {
        let response_text = if turn.text_segments.is_empty() {
            match status {
                TurnStatus::Completed => COMPLETION_MARKER.to_string(),
                TurnStatus::Aborted => format!(
                    "Stopped after {} iterations without a final answer.",
                    turn.iterations
                ),
            }
        } else {
            turn.text_segments.join("\n\n")
        };

        let session = self.store.update(
            &turn.session_id,
            SessionPatch {
                messages: turn.new_messages,
                context: turn.context.clone(),
                locators: turn.locators.clone(),
                steps: turn.tool_calls,
            },
        )?;

        tracing::info!(
            session_id = %session.id,
            status = ?status,
            iterations = turn.iterations,
            tool_calls = turn.tool_calls,
            total_steps = session.step_count,
            "turn finished"
        );

        Ok(TurnOutcome {
            session_id: session.id,
            response_text,
            locators: turn.locators,
            total_steps: session.step_count,
            tool_calls: turn.tool_calls,
            iterations: turn.iterations,
            status,
            context_updates: turn.context,
        })
    }
}

/// Delay before retrying a failed model call, or `None` if it must not be retried.
///
/// Overload backs off `attempt × unit`; any other transient failure gets one
/// fixed-delay retry per call.
fn retry_delay(
    err: &InferenceError,
    attempt: u32,
    transient_retried: bool,
    settings: &EngineSettings,
) -> Option<Duration> {
    if err.is_overloaded() {
        Some(settings.overload_backoff * attempt)
    } else if err.is_transient() && !transient_retried {
        Some(settings.transient_retry_delay)
    } else {
        None
    }
}

// ─── History → Model Messages ───────────────────────────────────────────────

/// Convert session history into OpenAI-style chat messages.
///
/// Tool results become one `tool` message each, keyed by call id.
pub fn to_chat_messages(history: &[Message]) -> Vec<ChatMessage> {
    let mut chat_messages = Vec::with_capacity(history.len());

    for msg in history {
        match msg.role {
            Role::Assistant => {
                let tool_calls: Vec<ToolCallResponse> = msg
                    .content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::ToolCall {
                            id,
                            name,
                            arguments,
                        } => Some(ToolCallResponse {
                            id: id.clone(),
                            r#type: "function".to_string(),
                            function: FunctionCallResponse {
                                name: name.clone(),
                                arguments: arguments.to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                let text = msg.text();
                chat_messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: (!text.is_empty()).then_some(text),
                    tool_call_id: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                });
            }
            _ => {
                for part in &msg.content {
                    if let ContentPart::ToolResult {
                        call_id, content, ..
                    } = part
                    {
                        chat_messages.push(ChatMessage {
                            role: Role::Tool,
                            content: Some(content.clone()),
                            tool_call_id: Some(call_id.clone()),
                            tool_calls: None,
                        });
                    }
                }
                let text = msg.text();
                if !text.is_empty() {
                    chat_messages.push(ChatMessage::user(text));
                }
            }
        }
    }

    chat_messages
}

// ─── Tests ──────────────────────────────────────────────────────────────────
