//! `bimpilot tools`: list what the viewer's MCP server exposes.

use std::path::PathBuf;

use bimpilot_config::AppConfig;
use bimpilot_mcp::McpClient;

pub async fn run(server_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(dir) = server_dir {
        config.mcp.cwd = dir;
    }

    let client = McpClient::spawn(&config.mcp).await?;
    let tools = client.list_tools().await;
    client.shutdown().await;
    let tools = tools?;

    println!();
    println!(
        "  {} ({} tools)",
        client.server_name().unwrap_or("MCP server"),
        tools.len()
    );
    println!();
    for tool in &tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("  {:<28} {summary}", tool.name);
    }
    println!();

    Ok(())
}
