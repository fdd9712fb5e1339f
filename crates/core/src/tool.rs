//! Tool contracts — how the agent reaches the navigation surface.
//!
//! The loop only ever talks to a [`ToolBackend`]: discover the catalog once,
//! then invoke tools by name. The production backend is a remote MCP server;
//! [`ToolRegistry`] is an in-process backend built from [`Tool`] values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::ContentBlock;
use crate::provider::{MessageToolCall, ToolDefinition};

/// Tool arguments as a key→value mapping.
pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// A validated request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (matches the engine's tool_call.id)
    pub call_id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed arguments
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    /// Parse the engine's JSON argument text.
    ///
    /// Empty text means no arguments. Anything that is not a JSON object is
    /// malformed.
    pub fn parse(call: &MessageToolCall) -> Result<Self, ToolError> {
        let arguments = parse_arguments(&call.name, &call.arguments)?;
        Ok(Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }
}

fn parse_arguments(tool_name: &str, raw: &str) -> Result<ToolArguments, ToolError> {
    if raw.trim().is_empty() {
        return Ok(ToolArguments::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(ToolError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// The external tool surface: capability discovery plus invocation.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// The ordered tool catalog.
    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    /// Invoke one tool and return its ordered content blocks.
    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError>;
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "reset_view").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered registry of in-process tools, usable as a [`ToolBackend`].
///
/// Registration order is the catalog order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(pos) => self.tools[pos] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBackend for ToolRegistry {
    fn name(&self) -> &str {
        "in_process"
    }

    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.definitions())
    }

    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
            let text = arguments.get("text").and_then(|v| v.as_str()).unwrap_or("");
            Ok(vec![ContentBlock::text(text)])
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str { self.0 }
        fn description(&self) -> &str { "" }
        fn parameters_schema(&self) -> serde_json::Value { serde_json::json!({"type": "object"}) }
        async fn execute(&self, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
            Ok(vec![])
        }
    }

    fn call(arguments: &str) -> MessageToolCall {
        MessageToolCall {
            id: "call_1".into(),
            name: "zoom".into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(NamedTool("reset_view")));
        registry.register(Box::new(NamedTool("orbit_camera")));
        registry.register(Box::new(NamedTool("zoom")));
        registry.register(Box::new(NamedTool("orbit_camera")));
        assert_eq!(registry.names(), vec!["reset_view", "orbit_camera", "zoom"]);
        assert_eq!(registry.definitions()[1].name, "orbit_camera");
    }

    #[tokio::test]
    async fn registry_invokes_as_backend() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let mut args = ToolArguments::new();
        args.insert("text".into(), serde_json::json!("hello world"));
        let blocks = registry.invoke("echo", args).await.unwrap();
        assert_eq!(blocks, vec![ContentBlock::text("hello world")]);
    }

    #[tokio::test]
    async fn registry_invoke_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nonexistent", ToolArguments::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn parse_object_arguments() {
        let req = ToolCallRequest::parse(&call(r#"{"factor": 2.5}"#)).unwrap();
        assert_eq!(req.call_id, "call_1");
        assert_eq!(req.arguments["factor"], serde_json::json!(2.5));
    }

    #[test]
    fn parse_empty_arguments_as_empty_map() {
        let req = ToolCallRequest::parse(&call("  ")).unwrap();
        assert!(req.arguments.is_empty());
    }

    #[test]
    fn malformed_arguments_are_tool_errors() {
        let err = ToolCallRequest::parse(&call(r#"{"factor": "#)).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = ToolCallRequest::parse(&call("[1, 2]")).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
