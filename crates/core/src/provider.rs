//! Provider trait — the abstraction over the reasoning engine.
//!
//! A Provider receives the full turn sequence plus the tool catalog and
//! returns one engine output: free text, tool-call requests, or both.
//!
//! Implementations: OpenAI-compatible endpoints (`bimpilot-providers`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ConversationTurn;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-5.2")
    pub model: String,

    /// System instructions sent ahead of the turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The conversation, in order
    pub turns: Vec<ConversationTurn>,

    /// Sampling temperature; `None` leaves it to the model default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Token budget for this step's completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether the engine may request several calls in one output
    #[serde(default)]
    pub parallel_tool_calls: bool,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A tool call requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Correlation id; must come back unchanged on the result
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as the engine's JSON text
    pub arguments: String,
}

/// One engine output, as stored in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    /// Free text (the final answer when there are no tool calls)
    #[serde(default)]
    pub content: String,

    /// Requested tool calls, in the engine's order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// The engine-native message, replayed verbatim when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl EngineOutput {
    /// A text-only output (no tool calls).
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            raw: None,
        }
    }

    /// An output requesting tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            raw: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated output
    pub output: EngineOutput,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` once per step without knowing which
/// backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}
