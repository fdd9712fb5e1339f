//! Conversation domain types.
//!
//! A task's conversation is the literal turn sequence replayed to the
//! reasoning engine on every step:
//! user task → engine output → tool invocation → tool result → engine output → ...

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::EngineOutput;

/// Unique identifier for one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of tool output, exactly as the tool backend produced it.
///
/// Wire shape: `{"type":"text","data":...}` or
/// `{"type":"image","data":"<base64>","mimeType":"image/png"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain or structured text. Structured results arrive as JSON values.
    Text { data: serde_json::Value },

    /// An image, base64-encoded.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    /// A plain-string text block.
    pub fn text(value: impl Into<String>) -> Self {
        ContentBlock::Text {
            data: serde_json::Value::String(value.into()),
        }
    }

    /// A structured JSON text block.
    pub fn json(value: serde_json::Value) -> Self {
        ContentBlock::Text { data: value }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentBlock::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentBlock::Image { .. })
    }

    /// Render a text block for the engine: strings as-is, anything else as
    /// compact JSON. Returns `None` for images.
    pub fn render_text(&self) -> Option<String> {
        match self {
            ContentBlock::Text {
                data: serde_json::Value::String(s),
            } => Some(s.clone()),
            ContentBlock::Text { data } => Some(data.to_string()),
            ContentBlock::Image { .. } => None,
        }
    }
}

/// One item of a multimodal tool result as handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Raw base64 bytes inline; never a reference to the frame store.
    Image { mime_type: String, data: String },
}

/// The engine-ready form of a tool result.
///
/// The engine's plain result channel only accepts text, so results without
/// images collapse to a single string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single immutable entry in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum ConversationTurn {
    /// The operator's task description.
    UserTask { text: String },

    /// Whatever the engine returned for one inference, kept for replay.
    EngineOutput(EngineOutput),

    /// A tool call the loop executed. `arguments` is the engine's JSON text,
    /// untouched.
    ToolInvocation {
        call_id: String,
        tool_name: String,
        arguments: String,
    },

    /// The outcome of the invocation with the same `call_id`.
    ToolResult {
        call_id: String,
        content: Vec<ContentBlock>,
        payload: ToolPayload,
        #[serde(default)]
        is_error: bool,
    },
}

impl ConversationTurn {
    pub fn user_task(text: impl Into<String>) -> Self {
        ConversationTurn::UserTask { text: text.into() }
    }

    pub fn tool_invocation(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ConversationTurn::ToolInvocation {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        content: Vec<ContentBlock>,
        payload: ToolPayload,
    ) -> Self {
        ConversationTurn::ToolResult {
            call_id: call_id.into(),
            content,
            payload,
            is_error: false,
        }
    }

    /// A failed call. Error content is text-only, so the payload is the
    /// joined text.
    pub fn tool_error(call_id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        let text = content
            .iter()
            .filter_map(ContentBlock::render_text)
            .collect::<Vec<_>>()
            .join("\n");
        ConversationTurn::ToolResult {
            call_id: call_id.into(),
            content,
            payload: ToolPayload::Text(text),
            is_error: true,
        }
    }

    /// The call id of an invocation or result turn.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            ConversationTurn::ToolInvocation { call_id, .. }
            | ConversationTurn::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

/// The ordered, append-only turn log of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// The task this conversation belongs to
    pub id: TaskId,

    turns: Vec<ConversationTurn>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Start a conversation with the single user-task turn.
    pub fn with_task(id: TaskId, text: impl Into<String>) -> Self {
        let mut conversation = Self::new(id);
        conversation.push(ConversationTurn::user_task(text));
        conversation
    }

    /// Append a turn. Turns are never edited or removed.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of tool results recorded so far.
    pub fn tool_result_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, ConversationTurn::ToolResult { .. }))
            .count()
    }

    /// Call ids that break invocation/result pairing: invocations without a
    /// later result, and results without an earlier invocation.
    pub fn unmatched_call_ids(&self) -> Vec<String> {
        let mut open: Vec<&str> = Vec::new();
        let mut orphans = Vec::new();
        for turn in &self.turns {
            match turn {
                ConversationTurn::ToolInvocation { call_id, .. } => open.push(call_id),
                ConversationTurn::ToolResult { call_id, .. } => {
                    match open.iter().position(|id| id == call_id) {
                        Some(pos) => {
                            open.remove(pos);
                        }
                        None => orphans.push(call_id.clone()),
                    }
                }
                _ => {}
            }
        }
        orphans.extend(open.into_iter().map(String::from));
        orphans
    }

    /// Rough token estimate (4 chars ≈ 1 token); image payloads excluded.
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .map(|t| match t {
                ConversationTurn::UserTask { text } => text.len(),
                ConversationTurn::EngineOutput(output) => output.content.len(),
                ConversationTurn::ToolInvocation { arguments, .. } => arguments.len(),
                ConversationTurn::ToolResult { payload, .. } => match payload {
                    ToolPayload::Text(text) => text.len(),
                    ToolPayload::Parts(parts) => parts
                        .iter()
                        .map(|p| match p {
                            ContentPart::Text { text } => text.len(),
                            ContentPart::Image { .. } => 0,
                        })
                        .sum(),
                },
            })
            .sum::<usize>()
            / 4
    }
}
