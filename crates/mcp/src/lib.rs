//! MCP client for the BIM viewer's tool server.
//!
//! Spawns the server as a child process, speaks newline-delimited JSON-RPC
//! over its stdio, and exposes the result as a [`bimpilot_core::ToolBackend`].

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::McpClient;
pub use transport::StdioTransport;

use bimpilot_core::ToolError;

/// Errors talking to an MCP server.
#[derive(Debug, Clone, thiserror::Error)]
pub enum McpError {
    #[error("failed to start MCP server: {0}")]
    Spawn(String),

    #[error("MCP connection closed: {0}")]
    Closed(String),

    #[error("MCP request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("MCP server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl McpError {
    /// Map onto the tool error the agent loop understands.
    ///
    /// Only a lost connection is fatal; everything else is a failed call.
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        match self {
            McpError::Spawn(reason) | McpError::Closed(reason) => ToolError::BackendUnavailable(reason),
            McpError::Timeout { timeout_ms, .. } => ToolError::Timeout {
                tool_name: tool_name.to_string(),
                timeout_ms,
            },
            other => ToolError::ExecutionFailed {
                tool_name: tool_name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
