//! Shared test doubles for the engine and the tool backend.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bimpilot_core::error::ProviderError;
use bimpilot_core::provider::{ProviderResponse, Usage};
use bimpilot_core::{
    ContentBlock, EngineOutput, MessageToolCall, Provider, ProviderRequest, Tool, ToolArguments, ToolBackend,
    ToolDefinition, ToolError, ToolRegistry,
};
use tokio_util::sync::CancellationToken;

/// A provider that replays scripted outputs in order and records requests.
///
/// Panics if called more often than scripted.
pub struct ScriptedProvider {
    outputs: Mutex<VecDeque<Result<EngineOutput, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(outputs: Vec<Result<EngineOutput, ProviderError>>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn outputs(outputs: Vec<EngineOutput>) -> Self {
        Self::new(outputs.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let next = self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no output scripted for call #{call}"));
        next.map(|output| ProviderResponse {
            output,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted-model".into(),
        })
    }
}

/// A provider whose inference never finishes.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

pub fn calls(calls: &[(&str, &str)]) -> EngineOutput {
    EngineOutput::with_tool_calls(
        "",
        calls
            .iter()
            .map(|(id, name)| tool_call(id, name, "{}"))
            .collect(),
    )
}

/// A tiny valid PNG header, base64-encoded.
pub fn png_b64() -> String {
    BASE64.encode(b"\x89PNG\r\n\x1a\n")
}

/// A tool that returns fixed blocks.
pub struct StaticTool {
    name: &'static str,
    blocks: Vec<ContentBlock>,
}

impl StaticTool {
    pub fn new(name: &'static str, blocks: Vec<ContentBlock>) -> Self {
        Self { name, blocks }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "static test tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        Ok(self.blocks.clone())
    }
}

/// A tool that echoes its `url` argument.
pub struct LoadModelTool;

#[async_trait]
impl Tool for LoadModelTool {
    fn name(&self) -> &str {
        "load_model"
    }
    fn description(&self) -> &str {
        "Load an IFC model from a URL"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]})
    }
    async fn execute(&self, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool_name: "load_model".into(),
                reason: "missing url".into(),
            })?;
        Ok(vec![ContentBlock::json(serde_json::json!({"loaded": url}))])
    }
}

/// A tool that sleeps before answering.
pub struct SlowTool {
    name: &'static str,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self { name, delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "slow test tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![ContentBlock::text(format!("{} done", self.name))])
    }
}

/// A tool that always fails with the given error.
pub struct FailingTool {
    name: &'static str,
    error: ToolError,
}

impl FailingTool {
    pub fn new(name: &'static str, error: ToolError) -> Self {
        Self { name, error }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "failing test tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        Err(self.error.clone())
    }
}

/// A tool that cancels the task while it runs.
pub struct CancellingTool {
    token: CancellationToken,
}

impl CancellingTool {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "pan_camera"
    }
    fn description(&self) -> &str {
        "cancels the task"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        self.token.cancel();
        Ok(vec![ContentBlock::text("panned")])
    }
}

/// A viewer-like registry: `reset_view`, `capture_view`, `zoom`, `load_model`.
pub fn camera_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(StaticTool::new(
        "reset_view",
        vec![ContentBlock::text("view reset")],
    )));
    registry.register(Box::new(StaticTool::new(
        "capture_view",
        vec![
            ContentBlock::image(png_b64(), "image/png"),
            ContentBlock::json(serde_json::json!({"camera": {"position": [10, 5, 10]}})),
        ],
    )));
    registry.register(Box::new(StaticTool::new(
        "zoom",
        vec![ContentBlock::text("zoomed")],
    )));
    registry.register(Box::new(LoadModelTool));
    registry
}

/// Wraps a backend and counts calls.
pub struct CountingBackend<B> {
    inner: B,
    discovers: AtomicUsize,
    invokes: AtomicUsize,
}

impl<B: ToolBackend> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            discovers: AtomicUsize::new(0),
            invokes: AtomicUsize::new(0),
        }
    }

    pub fn discover_calls(&self) -> usize {
        self.discovers.load(Ordering::SeqCst)
    }

    pub fn invoke_calls(&self) -> usize {
        self.invokes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B: ToolBackend> ToolBackend for CountingBackend<B> {
    fn name(&self) -> &str {
        "counting"
    }

    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        self.discovers.fetch_add(1, Ordering::SeqCst);
        self.inner.discover().await
    }

    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        self.invokes.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(name, arguments).await
    }
}

/// A backend whose discovery fails as if the server were gone.
pub struct UnreachableBackend;

#[async_trait]
impl ToolBackend for UnreachableBackend {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Err(ToolError::BackendUnavailable("server not running".into()))
    }

    async fn invoke(&self, _name: &str, _arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        Err(ToolError::BackendUnavailable("server not running".into()))
    }
}
