//! Error types for the BimPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type:
//! - [`ProviderError`] for the reasoning engine
//! - [`ToolError`] for a single tool invocation (always recoverable)
//! - [`TransportError`] for a lost collaborator (fatal to the task)

use thiserror::Error;

use crate::message::{ContentBlock, ConversationTurn};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// A lost connection to one of the two external collaborators.
///
/// Unlike [`ToolError`], this aborts the task: the loop cannot make progress
/// without the engine, and a dead backend cannot act on further calls.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("reasoning engine unavailable: {0}")]
    Engine(ProviderError),

    #[error("tool backend unavailable: {0}")]
    ToolBackend(String),
}

/// A failed tool invocation.
///
/// Every variant is surfaced to the reasoning engine as a text result so it
/// can retry or pick another action. `BackendUnavailable` additionally ends
/// the task once its result has been recorded.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Tool call skipped: {0}")]
    Skipped(String),
}

impl ToolError {
    /// Whether this failure means the backend itself is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::BackendUnavailable(_))
    }

    /// The single text block the engine sees in place of a tool result.
    pub fn to_content(&self) -> Vec<ContentBlock> {
        vec![ContentBlock::text(format!("Tool error: {self}"))]
    }

    /// Project this error into the conversation as an ordinary tool result.
    pub fn to_conversation_turn(&self, call_id: impl Into<String>) -> ConversationTurn {
        let content = self.to_content();
        ConversationTurn::tool_error(call_id, content)
    }
}
