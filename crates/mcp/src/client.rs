//! MCP client lifecycle: spawn, handshake, discovery, invocation.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bimpilot_config::McpServerConfig;
use bimpilot_core::{ContentBlock, ToolArguments, ToolBackend, ToolDefinition, ToolError};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::McpError;
use crate::protocol::{CallToolResult, InitializeParams, InitializeResult, ToolsListResult};
use crate::transport::StdioTransport;

const CLIENT_NAME: &str = "bimpilot";

/// A connected MCP server.
pub struct McpClient {
    transport: StdioTransport,
    child: Mutex<Option<Child>>,
    server_name: Option<String>,
}

impl McpClient {
    /// Start the configured server process and complete the handshake.
    ///
    /// The child is killed when the client is dropped.
    pub async fn spawn(config: &McpServerConfig) -> Result<Self, McpError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .current_dir(&config.cwd)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            command = %config.command,
            args = ?config.args,
            cwd = %config.cwd.display(),
            "Spawning MCP server"
        );

        let mut child = command.spawn().map_err(|e| {
            McpError::Spawn(format!(
                "{} {} (in {}): {e}",
                config.command,
                config.args.join(" "),
                config.cwd.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("server stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("server stdout was not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let client = Self::connect(stdout, stdin, config.request_timeout()).await?;
        *client.child.lock().await = Some(child);
        Ok(client)
    }

    /// Handshake over an already-open pair of streams.
    pub async fn connect<R, W>(reader: R, writer: W, request_timeout: Duration) -> Result<Self, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = StdioTransport::new(reader, writer, request_timeout);

        let params = serde_json::to_value(InitializeParams::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")))
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = transport.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("bad initialize result: {e}")))?;
        transport.notify("notifications/initialized", None).await?;

        let server_name = init.server_info.map(|s| s.name);
        info!(
            server = server_name.as_deref().unwrap_or("unknown"),
            protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
            "Connected to MCP server"
        );

        Ok(Self {
            transport,
            child: Mutex::new(None),
            server_name,
        })
    }

    /// The name the server reported during the handshake.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Fetch the full tool list, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.transport.request("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?;
            tools.extend(page.tools.into_iter().map(ToolDefinition::from));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call one tool.
    pub async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<CallToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": Value::Object(arguments),
        });
        let result = self.transport.request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("bad tools/call result: {e}")))
    }

    /// Stop the server process, if this client started one.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to stop MCP server");
            } else {
                debug!("MCP server stopped");
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mcp_server", "{line}");
    }
}

#[async_trait]
impl ToolBackend for McpClient {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn discover(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        self.list_tools().await.map_err(|e| e.into_tool_error("tools/list"))
    }

    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<Vec<ContentBlock>, ToolError> {
        let result = self
            .call_tool(name, arguments)
            .await
            .map_err(|e| e.into_tool_error(name))?;
        if result.is_error {
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: result.error_text(),
            });
        }
        Ok(result.into_blocks())
    }
}
