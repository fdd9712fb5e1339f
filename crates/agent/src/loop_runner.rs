//! The vision-action loop implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bimpilot_config::AppConfig;
use bimpilot_core::error::{ProviderError, ToolError, TransportError};
use bimpilot_core::event::{DomainEvent, EventBus};
use bimpilot_core::message::{ContentBlock, Conversation, ConversationTurn, TaskId};
use bimpilot_core::provider::{MessageToolCall, Provider, ProviderRequest, ToolDefinition};
use bimpilot_core::tool::{ToolArguments, ToolBackend};
use bimpilot_core::ToolExecutionMode;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::ToolDispatcher;
use crate::formatter::ResultFormatter;
use crate::frames::{FrameHistoryBuffer, FrameRecord, effective_capacity};
use crate::prompt;
use crate::state::{LoopState, TaskOutcome};

/// Longest tool-result summary carried in events.
const SUMMARY_CHARS: usize = 160;

/// The result of a task that reached a terminal state.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    /// Inferences made
    pub steps: u32,
    pub tool_calls_made: usize,
    pub conversation: Conversation,
    /// Frames still on disk, oldest first
    pub frames: Vec<FrameRecord>,
}

/// A task stopped by a lost engine or backend connection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("task aborted after {steps} step(s): {error}")]
pub struct TaskAborted {
    pub error: TransportError,
    pub steps: u32,
    /// Everything recorded before the failure
    pub conversation: Conversation,
}

#[derive(Debug, Clone)]
struct FrameSettings {
    root: PathBuf,
    capacity: usize,
}

/// Everything one `run` owns. Nothing here outlives the task.
struct TaskContext {
    task_id: TaskId,
    conversation: Conversation,
    state: LoopState,
    dispatcher: ToolDispatcher,
    formatter: ResultFormatter,
    frames: Option<Arc<Mutex<FrameHistoryBuffer>>>,
    tool_calls_made: usize,
}

/// The paired turns for one tool call, plus a fatal error if the backend is gone.
struct ExecutedCall {
    invocation: ConversationTurn,
    result: ConversationTurn,
    fatal: Option<ToolError>,
}

/// Drives the reasoning engine against the tool backend until the task
/// completes or the step budget runs out.
pub struct AgentLoop {
    /// The reasoning engine
    provider: Arc<dyn Provider>,

    /// The tool surface
    backend: Arc<dyn ToolBackend>,

    /// The model to use
    model: String,

    /// Instructions sent ahead of every inference
    system_prompt: String,

    /// Sampling temperature; `None` leaves it to the model
    temperature: Option<f32>,

    /// Completion token budget per step
    max_tokens: Option<u32>,

    /// Maximum inferences per task
    max_steps: u32,

    /// How the calls of one step run
    tool_execution: ToolExecutionMode,

    inference_timeout: Duration,

    tool_timeout: Duration,

    /// Where captured frames go; `None` disables persistence
    frames: Option<FrameSettings>,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop with default settings.
    pub fn new(
        provider: Arc<dyn Provider>,
        backend: Arc<dyn ToolBackend>,
        model: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            backend,
            model: model.into(),
            system_prompt: prompt::SYSTEM_PROMPT.to_string(),
            temperature: None,
            max_tokens: Some(4096),
            max_steps: 30,
            tool_execution: ToolExecutionMode::Sequential,
            inference_timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(60),
            frames: None,
            event_bus,
        }
    }

    /// Create a loop configured from the `[agent]` and `[frames]` sections.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        backend: Arc<dyn ToolBackend>,
        config: &AppConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let agent = &config.agent;
        let mut agent_loop = Self::new(provider, backend, &config.default_model, event_bus)
            .with_max_steps(agent.max_steps)
            .with_max_tokens(agent.max_tokens)
            .with_tool_execution(agent.tool_execution)
            .with_inference_timeout(agent.inference_timeout())
            .with_tool_timeout(agent.tool_timeout());
        if let Some(t) = agent.temperature {
            agent_loop = agent_loop.with_temperature(t);
        }
        if let Some(system_prompt) = &agent.system_prompt_override {
            agent_loop = agent_loop.with_system_prompt(system_prompt);
        }
        if config.frames.enabled {
            agent_loop = agent_loop.with_frames(config.frames.resolved_dir(), config.frames.capacity);
        }
        agent_loop
    }

    /// Set the maximum number of inferences per task.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    /// Set the completion token budget per step.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the built-in navigator instructions.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool_execution(mut self, mode: ToolExecutionMode) -> Self {
        self.tool_execution = mode;
        self
    }

    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Persist captured images under `<root>/<task_id>/`, keeping `capacity`
    /// (0 means the default).
    pub fn with_frames(mut self, root: impl Into<PathBuf>, capacity: usize) -> Self {
        self.frames = Some(FrameSettings {
            root: root.into(),
            capacity: effective_capacity(capacity),
        });
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Load a model into the viewer before a task, via the `load_model` tool.
    pub async fn preload(&self, url: &str) -> Result<Vec<ContentBlock>, ToolError> {
        info!(url = %url, "Preloading model");
        let mut arguments = ToolArguments::new();
        arguments.insert("url".into(), serde_json::Value::String(url.to_string()));
        ToolDispatcher::new(self.backend.clone(), self.tool_timeout)
            .invoke("load_model", arguments)
            .await
    }

    /// Run a task to a terminal state.
    pub async fn run(&self, task: &str) -> Result<TaskReport, TaskAborted> {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run a task, stopping early when `cancel` fires.
    ///
    /// In-flight tool calls finish; calls not yet started get a "skipped"
    /// result; an in-flight inference is abandoned.
    pub async fn run_with_cancel(&self, task: &str, cancel: CancellationToken) -> Result<TaskReport, TaskAborted> {
        let task_id = TaskId::new();
        let frames = self.frames.as_ref().map(|settings| {
            Arc::new(Mutex::new(FrameHistoryBuffer::for_task(
                &settings.root,
                &task_id,
                settings.capacity,
            )))
        });
        let mut ctx = TaskContext {
            task_id: task_id.clone(),
            conversation: Conversation::with_task(task_id.clone(), prompt::task_message(task)),
            state: LoopState::new(self.max_steps),
            dispatcher: ToolDispatcher::new(self.backend.clone(), self.tool_timeout),
            formatter: ResultFormatter::new(frames.clone()),
            frames,
            tool_calls_made: 0,
        };

        let discovered = ctx.dispatcher.discover().await.map(<[ToolDefinition]>::to_vec);
        let catalog = match discovered {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Tool discovery failed");
                return Err(self.abort(ctx, TransportError::ToolBackend(e.to_string())));
            }
        };

        info!(
            task_id = %task_id,
            model = %self.model,
            max_steps = ctx.state.max_steps(),
            tools = catalog.len(),
            mode = %self.tool_execution,
            "Starting task"
        );
        self.event_bus.publish(DomainEvent::TaskStarted {
            task_id: task_id.to_string(),
            model: self.model.clone(),
            max_steps: ctx.state.max_steps(),
            tool_count: catalog.len(),
            timestamp: Utc::now(),
        });

        while ctx.state.can_infer() {
            if cancel.is_cancelled() {
                ctx.state.finish(TaskOutcome::Cancelled);
                break;
            }

            let step = ctx.state.begin_step();
            debug!(
                task_id = %task_id,
                step,
                turns = ctx.conversation.len(),
                est_tokens = ctx.conversation.estimated_tokens(),
                "Agent loop step"
            );

            let request = ProviderRequest {
                model: self.model.clone(),
                system: Some(self.system_prompt.clone()),
                turns: ctx.conversation.turns().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: catalog.clone(),
                parallel_tool_calls: true,
            };

            let inference = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(self.inference_timeout, self.provider.complete(request)) => Some(result),
            };

            let response = match inference {
                None => {
                    info!(task_id = %task_id, step, "Inference abandoned on cancellation");
                    ctx.state.finish(TaskOutcome::Cancelled);
                    break;
                }
                Some(Ok(Ok(response))) => response,
                Some(Ok(Err(e))) => {
                    warn!(task_id = %task_id, step, error = %e, "Inference failed");
                    return Err(self.abort(ctx, TransportError::Engine(e)));
                }
                Some(Err(_)) => {
                    let timeout_ms = self.inference_timeout.as_millis() as u64;
                    warn!(task_id = %task_id, step, timeout_ms, "Inference timed out");
                    let error = ProviderError::Timeout(format!("no response within {timeout_ms}ms"));
                    return Err(self.abort(ctx, TransportError::Engine(error)));
                }
            };

            let output = response.output;
            self.event_bus.publish(DomainEvent::InferenceCompleted {
                task_id: task_id.to_string(),
                step,
                model: response.model,
                tool_calls: output.tool_calls.len(),
                tokens_used: response.usage.map(|u| u.total_tokens),
                timestamp: Utc::now(),
            });

            ctx.conversation.push(ConversationTurn::EngineOutput(output.clone()));

            if !output.has_tool_calls() {
                info!(task_id = %task_id, step, "Engine answered without tool calls");
                ctx.state.finish(TaskOutcome::Completed(output.content));
                break;
            }

            debug!(task_id = %task_id, step, tool_count = output.tool_calls.len(), "Executing tool calls");
            if let Some(fatal) = self.execute_calls(&mut ctx, step, &output.tool_calls, &cancel).await {
                return Err(self.abort(ctx, TransportError::ToolBackend(fatal.to_string())));
            }
        }

        if !ctx.state.is_terminal() {
            warn!(task_id = %task_id, max_steps = ctx.state.max_steps(), "Max steps reached");
        }

        let steps = ctx.state.step();
        let outcome = ctx.state.into_outcome();
        info!(task_id = %task_id, outcome = %outcome, steps, tool_calls = ctx.tool_calls_made, "Task finished");
        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: task_id.to_string(),
            outcome: outcome.label().to_string(),
            steps,
            timestamp: Utc::now(),
        });

        let frames = match &ctx.frames {
            Some(buffer) => buffer.lock().await.records(),
            None => Vec::new(),
        };

        Ok(TaskReport {
            task_id,
            outcome,
            steps,
            tool_calls_made: ctx.tool_calls_made,
            conversation: ctx.conversation,
            frames,
        })
    }

    /// Execute one step's calls and append their turns in request order.
    ///
    /// Returns the first backend-loss error, if any.
    async fn execute_calls(
        &self,
        ctx: &mut TaskContext,
        step: u32,
        calls: &[MessageToolCall],
        cancel: &CancellationToken,
    ) -> Option<ToolError> {
        let mut fatal = None;

        match self.tool_execution {
            ToolExecutionMode::Sequential => {
                for call in calls {
                    if let Some(reason) = skip_reason(cancel, fatal.as_ref()) {
                        push_skipped(&mut ctx.conversation, call, reason);
                        continue;
                    }
                    let executed = self.execute_call(ctx, step, call).await;
                    ctx.tool_calls_made += 1;
                    fatal = fatal.or(executed.fatal);
                    ctx.conversation.push(executed.invocation);
                    ctx.conversation.push(executed.result);
                }
            }
            ToolExecutionMode::Concurrent => {
                if let Some(reason) = skip_reason(cancel, None) {
                    for call in calls {
                        push_skipped(&mut ctx.conversation, call, reason);
                    }
                    return None;
                }
                let shared: &TaskContext = ctx;
                let executed = join_all(calls.iter().map(|call| self.execute_call(shared, step, call))).await;
                ctx.tool_calls_made += executed.len();
                for executed in executed {
                    fatal = fatal.or(executed.fatal);
                    ctx.conversation.push(executed.invocation);
                    ctx.conversation.push(executed.result);
                }
            }
        }

        fatal
    }

    /// Dispatch, format and report a single call.
    async fn execute_call(&self, ctx: &TaskContext, step: u32, call: &MessageToolCall) -> ExecutedCall {
        let dispatched = ctx.dispatcher.dispatch(call).await;
        let duration_ms = dispatched.duration.as_millis() as u64;
        let invocation = ConversationTurn::tool_invocation(&call.id, &call.name, &call.arguments);

        let (result, fatal, summary, image_count) = match dispatched.result {
            Ok(blocks) => {
                let formatted = ctx.formatter.format(&blocks).await;
                for frame in &formatted.frames {
                    self.event_bus.publish(DomainEvent::FrameRecorded {
                        task_id: ctx.task_id.to_string(),
                        sequence: frame.sequence,
                        path: frame.path.clone(),
                        timestamp: Utc::now(),
                    });
                }
                let summary = summarize(&blocks);
                let image_count = blocks.iter().filter(|b| b.is_image()).count();
                info!(
                    task_id = %ctx.task_id,
                    step,
                    tool = %call.name,
                    call_id = %call.id,
                    duration_ms,
                    images = image_count,
                    "Tool executed"
                );
                (
                    ConversationTurn::tool_result(&call.id, blocks, formatted.payload),
                    None,
                    summary,
                    image_count,
                )
            }
            Err(e) => {
                warn!(
                    task_id = %ctx.task_id,
                    step,
                    tool = %call.name,
                    call_id = %call.id,
                    duration_ms,
                    error = %e,
                    "Tool execution failed"
                );
                let fatal = e.is_fatal().then(|| e.clone());
                (e.to_conversation_turn(&call.id), fatal, e.to_string(), 0)
            }
        };

        self.event_bus.publish(DomainEvent::ToolExecuted {
            task_id: ctx.task_id.to_string(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            success: fatal.is_none() && !matches!(result, ConversationTurn::ToolResult { is_error: true, .. }),
            summary,
            image_count,
            duration_ms,
            timestamp: Utc::now(),
        });

        ExecutedCall {
            invocation,
            result,
            fatal,
        }
    }

    fn abort(&self, ctx: TaskContext, error: TransportError) -> TaskAborted {
        let steps = ctx.state.step();
        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: ctx.task_id.to_string(),
            outcome: "aborted".into(),
            steps,
            timestamp: Utc::now(),
        });
        TaskAborted {
            error,
            steps,
            conversation: ctx.conversation,
        }
    }
}

fn skip_reason(cancel: &CancellationToken, fatal: Option<&ToolError>) -> Option<&'static str> {
    if fatal.is_some() {
        Some("tool backend unavailable")
    } else if cancel.is_cancelled() {
        Some("task cancelled")
    } else {
        None
    }
}

/// Record a call that never ran, keeping invocation/result pairs matched.
fn push_skipped(conversation: &mut Conversation, call: &MessageToolCall, reason: &str) {
    debug!(tool = %call.name, call_id = %call.id, reason, "Skipping tool call");
    conversation.push(ConversationTurn::tool_invocation(&call.id, &call.name, &call.arguments));
    conversation.push(ToolError::Skipped(reason.to_string()).to_conversation_turn(&call.id));
}

/// Text of a result with images elided, cut to a readable length.
fn summarize(blocks: &[ContentBlock]) -> String {
    let text = blocks
        .iter()
        .map(|b| b.render_text().unwrap_or_else(|| "[image]".to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    match text.char_indices().nth(SUMMARY_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use bimpilot_core::message::ToolPayload;
    use bimpilot_core::{EngineOutput, ToolRegistry};

    fn agent(provider: Arc<dyn Provider>, registry: ToolRegistry, max_steps: u32) -> AgentLoop {
        AgentLoop::new(provider, Arc::new(registry), "gpt-5.2", Arc::new(EventBus::default()))
            .with_max_steps(max_steps)
    }

    fn result_turns(conversation: &Conversation) -> Vec<(&str, &ToolPayload, bool)> {
        conversation
            .turns()
            .iter()
            .filter_map(|t| match t {
                ConversationTurn::ToolResult {
                    call_id,
                    payload,
                    is_error,
                    ..
                } => Some((call_id.as_str(), payload, *is_error)),
                _ => None,
            })
            .collect()
    }

    fn invocation_ids(conversation: &Conversation) -> Vec<&str> {
        conversation
            .turns()
            .iter()
            .filter_map(|t| match t {
                ConversationTurn::ToolInvocation { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn completes_after_tool_steps() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "capture_view")]),
            calls(&[("c2", "zoom")]),
            EngineOutput::text("TASK COMPLETE: the walls are red"),
        ]));
        let report = agent(provider.clone(), camera_registry(), 3)
            .run("What color are the walls?")
            .await
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Completed("TASK COMPLETE: the walls are red".into()));
        assert_eq!(report.steps, 3);
        assert_eq!(report.tool_calls_made, 2);
        assert_eq!(provider.call_count(), 3);
        assert!(report.conversation.unmatched_call_ids().is_empty());
    }

    #[tokio::test]
    async fn exhausts_budget_with_tool_calls_every_step() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "reset_view")]),
            calls(&[("c2", "zoom")]),
        ]));
        let report = agent(provider.clone(), camera_registry(), 2)
            .run("Find the roof")
            .await
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Exhausted);
        assert_eq!(report.outcome.text(), "INCOMPLETE: Max steps reached");
        assert_eq!(report.steps, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn conversation_starts_with_task_and_replays_every_turn() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "reset_view")]),
            EngineOutput::text("done"),
        ]));
        agent(provider.clone(), camera_registry(), 5)
            .run("Inspect the stairs")
            .await
            .unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].turns.len(), 1);
        assert!(matches!(
            &requests[0].turns[0],
            ConversationTurn::UserTask { text } if text == "Task: Inspect the stairs\n\nStart by capturing a view of the model."
        ));
        assert_eq!(requests[1].turns.len(), 4);
        assert_eq!(requests[0].tools, requests[1].tools);
        assert_eq!(requests[0].tools.len(), 4);
        assert!(requests[0].system.as_deref().unwrap_or_default().contains("BIM"));
        assert!(requests[0].parallel_tool_calls);
    }

    #[tokio::test]
    async fn missing_tool_becomes_text_result_and_loop_continues() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "missing_tool")]),
            EngineOutput::text("recovered"),
        ]));
        let report = agent(provider, camera_registry(), 5).run("t").await.unwrap();

        assert!(report.outcome.is_completed());
        let results = result_turns(&report.conversation);
        assert_eq!(results.len(), 1);
        let (call_id, payload, is_error) = results[0];
        assert_eq!(call_id, "c1");
        assert!(is_error);
        assert!(matches!(payload, ToolPayload::Text(text) if text.contains("missing_tool")));
    }

    #[tokio::test]
    async fn failing_tool_does_not_abort() {
        let mut registry = camera_registry();
        registry.register(Box::new(FailingTool::new(
            "highlight_elements",
            ToolError::ExecutionFailed {
                tool_name: "highlight_elements".into(),
                reason: "no selection".into(),
            },
        )));
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "highlight_elements"), ("c2", "reset_view")]),
            EngineOutput::text("done"),
        ]));
        let report = agent(provider, registry, 5).run("t").await.unwrap();

        let results = result_turns(&report.conversation);
        assert_eq!(results.len(), 2);
        assert!(results[0].2);
        assert!(!results[1].2);
        assert_eq!(results[1].1, &ToolPayload::Text("view reset".into()));
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported_to_engine() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            EngineOutput::with_tool_calls("", vec![tool_call("c1", "zoom", "{\"factor\": 2")]),
            EngineOutput::text("done"),
        ]));
        let report = agent(provider, camera_registry(), 5).run("t").await.unwrap();
        let results = result_turns(&report.conversation);
        assert!(matches!(results[0].1, ToolPayload::Text(text) if text.contains("Invalid tool arguments")));
        // raw argument text is kept verbatim
        assert!(report.conversation.turns().iter().any(|t| matches!(
            t,
            ConversationTurn::ToolInvocation { arguments, .. } if arguments == "{\"factor\": 2"
        )));
    }

    #[tokio::test]
    async fn image_results_are_multimodal_and_persisted() {
        let frames = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "capture_view")]),
            calls(&[("c2", "capture_view")]),
            EngineOutput::text("done"),
        ]));
        let report = AgentLoop::new(provider, Arc::new(camera_registry()), "m", bus)
            .with_frames(frames.path(), 1)
            .run("t")
            .await
            .unwrap();

        let results = result_turns(&report.conversation);
        match results[0].1 {
            ToolPayload::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], bimpilot_core::ContentPart::Image { .. }));
            }
            other => panic!("expected multimodal payload, got {other:?}"),
        }

        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.frames[0].sequence, 2);
        assert!(report.frames[0].path.starts_with(frames.path().join(&report.task_id.0)));

        let mut recorded = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(*event, DomainEvent::FrameRecorded { .. }) {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_mode_keeps_request_order() {
        let mut registry = camera_registry();
        registry.register(Box::new(SlowTool::new("orbit_camera", Duration::from_millis(500))));
        registry.register(Box::new(SlowTool::new("pan_camera", Duration::from_millis(10))));
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("slow", "orbit_camera"), ("fast", "pan_camera"), ("mid", "zoom")]),
            EngineOutput::text("done"),
        ]));
        let report = agent(provider, registry, 5)
            .with_tool_execution(ToolExecutionMode::Concurrent)
            .run("t")
            .await
            .unwrap();

        assert_eq!(invocation_ids(&report.conversation), vec!["slow", "fast", "mid"]);
        let ids: Vec<&str> = result_turns(&report.conversation).iter().map(|r| r.0).collect();
        assert_eq!(ids, vec!["slow", "fast", "mid"]);
        assert!(report.conversation.unmatched_call_ids().is_empty());
        assert_eq!(report.tool_calls_made, 3);
    }

    #[tokio::test]
    async fn cancellation_skips_unstarted_calls() {
        let cancel = CancellationToken::new();
        let mut registry = camera_registry();
        registry.register(Box::new(CancellingTool::new(cancel.clone())));
        let provider = Arc::new(ScriptedProvider::outputs(vec![calls(&[
            ("c1", "pan_camera"),
            ("c2", "zoom"),
            ("c3", "reset_view"),
        ])]));
        let report = agent(provider.clone(), registry, 5)
            .run_with_cancel("t", cancel)
            .await
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(report.tool_calls_made, 1);
        assert!(report.conversation.unmatched_call_ids().is_empty());

        let results = result_turns(&report.conversation);
        assert_eq!(results.len(), 3);
        assert!(!results[0].2);
        for (_, payload, is_error) in &results[1..] {
            assert!(*is_error);
            assert!(matches!(payload, ToolPayload::Text(text) if text.contains("skipped")));
        }
    }

    #[tokio::test]
    async fn cancellation_abandons_inflight_inference() {
        let cancel = CancellationToken::new();
        let agent = agent(Arc::new(HangingProvider), camera_registry(), 5);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = agent.run_with_cancel("t", cancel).await.unwrap();
        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert_eq!(report.steps, 1);
        assert_eq!(report.conversation.len(), 1);
    }

    #[tokio::test]
    async fn engine_failure_aborts_with_partial_conversation() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(calls(&[("c1", "reset_view")])),
            Err(ProviderError::Network("connection reset".into())),
        ]));
        let aborted = agent(provider, camera_registry(), 5).run("t").await.unwrap_err();

        assert!(matches!(aborted.error, TransportError::Engine(ProviderError::Network(_))));
        assert_eq!(aborted.steps, 2);
        assert_eq!(aborted.conversation.len(), 4);
        assert!(aborted.to_string().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn inference_timeout_is_fatal() {
        let aborted = agent(Arc::new(HangingProvider), camera_registry(), 5)
            .with_inference_timeout(Duration::from_secs(3))
            .run("t")
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, TransportError::Engine(ProviderError::Timeout(_))));
        assert!(aborted.to_string().contains("no response within 3000ms"));
    }

    #[tokio::test]
    async fn backend_loss_is_recorded_then_aborts() {
        let mut registry = camera_registry();
        registry.register(Box::new(FailingTool::new(
            "set_camera_position",
            ToolError::BackendUnavailable("pipe closed".into()),
        )));
        let provider = Arc::new(ScriptedProvider::outputs(vec![calls(&[
            ("c1", "set_camera_position"),
            ("c2", "reset_view"),
        ])]));
        let aborted = agent(provider, registry, 5).run("t").await.unwrap_err();

        assert!(matches!(aborted.error, TransportError::ToolBackend(_)));
        assert!(aborted.conversation.unmatched_call_ids().is_empty());
        let results = result_turns(&aborted.conversation);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, ToolPayload::Text(text) if text.contains("pipe closed")));
        assert!(matches!(results[1].1, ToolPayload::Text(text) if text.contains("skipped")));
    }

    #[tokio::test]
    async fn discovery_failure_aborts_before_inference() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![]));
        let aborted = AgentLoop::new(provider.clone(), Arc::new(UnreachableBackend), "m", Arc::new(EventBus::default()))
            .run("t")
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, TransportError::ToolBackend(_)));
        assert_eq!(aborted.steps, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn preload_invokes_load_model() {
        let provider = Arc::new(ScriptedProvider::outputs(vec![]));
        let blocks = agent(provider, camera_registry(), 1)
            .preload("https://example.com/house.ifc")
            .await
            .unwrap();
        assert_eq!(
            blocks,
            vec![ContentBlock::json(serde_json::json!({"loaded": "https://example.com/house.ifc"}))]
        );
    }

    #[tokio::test]
    async fn events_cover_task_lifecycle() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let provider = Arc::new(ScriptedProvider::outputs(vec![
            calls(&[("c1", "zoom")]),
            EngineOutput::text("done"),
        ]));
        AgentLoop::new(provider, Arc::new(camera_registry()), "m", bus)
            .run("t")
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match *event {
                DomainEvent::TaskStarted { .. } => "started",
                DomainEvent::InferenceCompleted { .. } => "inference",
                DomainEvent::ToolExecuted { .. } => "tool",
                DomainEvent::FrameRecorded { .. } => "frame",
                DomainEvent::TaskFinished { .. } => "finished",
            });
        }
        assert_eq!(kinds, vec!["started", "inference", "tool", "inference", "finished"]);
    }

    #[tokio::test]
    async fn zero_frame_capacity_keeps_default_history() {
        let frames = tempfile::tempdir().unwrap();
        let mut script: Vec<EngineOutput> = (0..12).map(|i| calls(&[(&format!("c{i}"), "capture_view")])).collect();
        script.push(EngineOutput::text("done"));
        let provider = Arc::new(ScriptedProvider::outputs(script));
        let report = agent(provider, camera_registry(), 20)
            .with_frames(frames.path(), 0)
            .run("t")
            .await
            .unwrap();

        assert_eq!(report.frames.len(), crate::frames::DEFAULT_CAPACITY);
        assert_eq!(report.frames[0].sequence, 3);
    }

    #[test]
    fn summary_elides_images_and_truncates() {
        let long = "x".repeat(400);
        let summary = summarize(&[ContentBlock::image("a", "image/png"), ContentBlock::text(long)]);
        assert!(summary.starts_with("[image] x"));
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 1);
    }
}
