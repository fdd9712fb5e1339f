//! BimPilot CLI: the main entry point.
//!
//! Commands:
//! - `onboard` Write a default config
//! - `run`     Run one navigation task against the viewer
//! - `tools`   List the tools the viewer's MCP server offers

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "bimpilot",
    about = "BimPilot: vision-action agent for BIM model navigation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Run a navigation task
    Run {
        /// What the agent should find out or do
        #[arg(short, long)]
        task: String,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum inference steps
        #[arg(long)]
        max_steps: Option<u32>,

        /// IFC model to load into the viewer before starting
        #[arg(long)]
        model_url: Option<String>,

        /// Run the tool calls of one step concurrently
        #[arg(long)]
        concurrent_tools: bool,

        /// Directory of the MCP server (overrides config)
        #[arg(long)]
        server_dir: Option<PathBuf>,
    },

    /// List the tools exposed by the MCP server
    Tools {
        /// Directory of the MCP server (overrides config)
        #[arg(long)]
        server_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run {
            task,
            model,
            max_steps,
            model_url,
            concurrent_tools,
            server_dir,
        } => {
            commands::run::run(commands::run::RunArgs {
                task,
                model,
                max_steps,
                model_url,
                concurrent_tools,
                server_dir,
            })
            .await?
        }
        Commands::Tools { server_dir } => commands::tools::run(server_dir).await?,
    }

    Ok(())
}
