//! # BimPilot Core
//!
//! Domain types, traits, and error definitions for the BimPilot agent.
//! This crate has **no transport dependencies**: it defines the conversation
//! model, the reasoning-engine contract and the tool-backend contract that
//! the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Both external collaborators (the reasoning engine and the tool backend)
//! are traits here. Implementations live in their own crates:
//! - `bimpilot-providers` speaks to OpenAI-compatible endpoints
//! - `bimpilot-mcp` speaks to an MCP server over stdio
//!
//! Tests swap either side for an in-process double.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::ToolExecutionMode;
pub use error::{ProviderError, ToolError, TransportError};
pub use event::{DomainEvent, EventBus};
pub use message::{ContentBlock, ContentPart, Conversation, ConversationTurn, TaskId, ToolPayload};
pub use provider::{EngineOutput, MessageToolCall, Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use tool::{Tool, ToolArguments, ToolBackend, ToolCallRequest, ToolRegistry};
