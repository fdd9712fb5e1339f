//! Tool dispatch: catalog caching, argument parsing, timeouts.
//!
//! Nothing here fails past a [`ToolError`]; the loop decides what a failure
//! means for the task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bimpilot_core::{
    ContentBlock, MessageToolCall, ToolArguments, ToolBackend, ToolCallRequest, ToolDefinition, ToolError,
};
use tokio::sync::OnceCell;
use tracing::debug;

/// The outcome of one dispatched call.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub call_id: String,
    pub tool_name: String,
    pub result: Result<Vec<ContentBlock>, ToolError>,
    pub duration: Duration,
}

/// Per-task front end for a [`ToolBackend`].
pub struct ToolDispatcher {
    backend: Arc<dyn ToolBackend>,
    catalog: OnceCell<Vec<ToolDefinition>>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn ToolBackend>, tool_timeout: Duration) -> Self {
        Self {
            backend,
            catalog: OnceCell::new(),
            tool_timeout,
        }
    }

    /// The backend's catalog, fetched on first use and cached afterwards.
    pub async fn discover(&self) -> Result<&[ToolDefinition], ToolError> {
        let catalog = self
            .catalog
            .get_or_try_init(|| async {
                let tools = self.backend.discover().await?;
                debug!(backend = self.backend.name(), count = tools.len(), "Discovered tools");
                Ok::<_, ToolError>(tools)
            })
            .await?;
        Ok(catalog.as_slice())
    }

    /// Invoke a tool, bounded by the tool timeout.
    pub async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        match tokio::time::timeout(self.tool_timeout, self.backend.invoke(name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_ms: self.tool_timeout.as_millis() as u64,
            }),
        }
    }

    /// Parse and execute one engine-requested call.
    pub async fn dispatch(&self, call: &MessageToolCall) -> Dispatched {
        let start = Instant::now();
        let result = match ToolCallRequest::parse(call) {
            Ok(request) => self.invoke(&request.name, request.arguments).await,
            Err(e) => Err(e),
        };
        Dispatched {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result,
            duration: start.elapsed(),
        }
    }
}
