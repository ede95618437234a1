//! Agent Core: sessions and the bounded agent loop.
//!
//! Submodules:
//! - `conversation`: ConversationEngine state machine and retry budget
//! - `directive`: System directive rebuilt for every model call
//! - `session_store`: In-memory sessions with idle expiry
//! - `locator`: Locator records derived from tool invocations
//! - `interaction`: Interaction-context folding from tool outcomes
//! - `tokens`: Token estimation and tool-result truncation
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod directive;
pub mod errors;
pub mod interaction;
pub mod locator;
pub mod session_store;
pub mod tokens;
pub mod types;

pub use conversation::{ConversationEngine, EngineSettings};
pub use errors::AgentError;
pub use locator::LocatorExtractor;
pub use session_store::{SessionStore, TurnGuard};
pub use types::{
    BrowserState, ContentPart, ContextPatch, InteractionContext, LocatorRecord, Message, Session,
    SessionHistory, SessionSummary, TurnOutcome, TurnStatus,
};
