//! JSON-RPC framing and the MCP messages BimPilot uses.

use bimpilot_core::{ContentBlock, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// An outgoing request or notification (no `id`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Anything the server writes to stdout.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification { method: String },
    Request { id: Value, method: String },
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        let method = value.get("method").and_then(Value::as_str).map(String::from);
        match method {
            Some(method) => match value.get("id") {
                Some(id) if !id.is_null() => Ok(IncomingMessage::Request {
                    id: id.clone(),
                    method,
                }),
                _ => Ok(IncomingMessage::Notification { method }),
            },
            None => serde_json::from_value(value).map(IncomingMessage::Response),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: &'static str,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl InitializeParams {
    pub fn new(client_name: &str, client_version: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: client_name.to_string(),
                version: client_version.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl From<McpTool> for ToolDefinition {
    fn from(tool: McpTool) -> Self {
        ToolDefinition {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            parameters: tool.input_schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Unsupported,
}

impl CallToolResult {
    /// Convert to content blocks, in order.
    ///
    /// Text that parses as JSON is kept structured; other text stays a
    /// string. Content kinds the agent cannot use are dropped.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        self.content
            .into_iter()
            .filter_map(|item| match item {
                McpContent::Text { text } => Some(match serde_json::from_str::<Value>(&text) {
                    Ok(value) => ContentBlock::json(value),
                    Err(_) => ContentBlock::text(text),
                }),
                McpContent::Image { data, mime_type } => Some(ContentBlock::image(data, mime_type)),
                McpContent::Unsupported => {
                    warn!("Skipping unsupported MCP content block");
                    None
                }
            })
            .collect()
    }

    /// The text of an error result, joined.
    pub fn error_text(&self) -> String {
        let text = self
            .content
            .iter()
            .filter_map(|item| match item {
                McpContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        }
    }
}
