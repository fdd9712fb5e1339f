//! `bimpilot run`: one navigation task against the viewer.

use std::path::PathBuf;
use std::sync::Arc;

use bimpilot_agent::AgentLoop;
use bimpilot_config::AppConfig;
use bimpilot_core::event::{DomainEvent, EventBus};
use bimpilot_core::ToolExecutionMode;
use bimpilot_mcp::McpClient;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

pub struct RunArgs {
    pub task: String,
    pub model: Option<String>,
    pub max_steps: Option<u32>,
    pub model_url: Option<String>,
    pub concurrent_tools: bool,
    pub server_dir: Option<PathBuf>,
}

/// Fold command-line flags into the loaded config.
fn apply_overrides(config: &mut AppConfig, args: &RunArgs) {
    if let Some(model) = &args.model {
        config.default_model = model.clone();
    }
    if let Some(max_steps) = args.max_steps {
        config.agent.max_steps = max_steps;
    }
    if args.concurrent_tools {
        config.agent.tool_execution = ToolExecutionMode::Concurrent;
    }
    if let Some(dir) = &args.server_dir {
        config.mcp.cwd = dir.clone();
    }
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENAI_API_KEY   = 'sk-...'");
        eprintln!("    BIMPILOT_API_KEY = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = bimpilot_providers::build_from_config(&config);

    eprintln!("  Starting MCP server in {}", config.mcp.cwd.display());
    let client = Arc::new(McpClient::spawn(&config.mcp).await?);

    let event_bus = Arc::new(EventBus::default());
    let progress = tokio::spawn(print_progress(event_bus.subscribe()));
    let agent = AgentLoop::from_config(provider, client.clone(), &config, event_bus);

    println!();
    println!("  Task:      {}", args.task);
    println!("  Model:     {}", agent.model());
    println!("  Max steps: {}", agent.max_steps());
    println!("  Tools:     {} execution", config.agent.tool_execution);
    println!();

    if let Some(url) = &args.model_url {
        if let Err(e) = agent.preload(url).await {
            client.shutdown().await;
            return Err(format!("Failed to load model {url}: {e}").into());
        }
        println!("  Loaded model: {url}");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  Cancelling, waiting for running tools to finish...");
                cancel.cancel();
            }
        })
    };

    let result = agent.run_with_cancel(&args.task, cancel).await;

    ctrl_c.abort();
    client.shutdown().await;
    drop(agent);
    let _ = progress.await;

    match result {
        Ok(report) => {
            println!();
            println!("  ─── Result ({}) ───", report.outcome);
            for line in report.outcome.text().lines() {
                println!("  {line}");
            }
            println!();
            println!(
                "  Steps used: {}/{}  Tool calls: {}",
                report.steps, config.agent.max_steps, report.tool_calls_made
            );
            if let Some(last) = report.frames.last() {
                println!("  Last frame: {}", last.path.display());
            }
            Ok(())
        }
        Err(aborted) => {
            eprintln!();
            eprintln!("  [Error] {aborted}");
            Err(aborted.into())
        }
    }
}

/// Render loop events until the bus closes.
async fn print_progress(mut events: tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.as_ref() {
                DomainEvent::InferenceCompleted {
                    step, tool_calls, ..
                } => {
                    if *tool_calls > 0 {
                        println!("  [step {step}] {tool_calls} tool call(s)");
                    } else {
                        println!("  [step {step}] final answer");
                    }
                }
                DomainEvent::ToolExecuted {
                    tool_name,
                    arguments,
                    success,
                    summary,
                    image_count,
                    duration_ms,
                    ..
                } => {
                    let mark = if *success { "🔧" } else { "❌" };
                    println!("     {mark} {tool_name}({}) {duration_ms}ms", clip(arguments, 100));
                    if *image_count > 0 {
                        println!("        📷 {image_count} image(s)");
                    }
                    if !summary.is_empty() {
                        println!("        → {}", clip(summary, 120));
                    }
                }
                _ => {}
            },
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
