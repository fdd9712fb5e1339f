//! Newline-delimited JSON-RPC over a pair of byte streams.
//!
//! Responses are matched to requests by id through a pending-waiter map; a
//! background reader task owns the read half.

use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::McpError;
use crate::protocol::{IncomingMessage, JsonRpcRequest, JsonRpcResponse};

type ResponseWaiter = oneshot::Sender<JsonRpcResponse>;
type PendingMap = Arc<std::sync::Mutex<HashMap<u64, ResponseWaiter>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, ResponseWaiter>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes a request's waiter however the request future ends, including
/// being dropped by an outer timeout.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

pub struct StdioTransport {
    writer: Arc<Mutex<BoxedWriter>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Wrap a server's stdout (`reader`) and stdin (`writer`).
    pub fn new<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Arc<Mutex<BoxedWriter>> = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(Self::read_loop(
            reader,
            writer.clone(),
            pending.clone(),
            closed.clone(),
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            request_timeout,
            reader_task,
        }
    }

    async fn read_loop<R>(reader: R, writer: Arc<Mutex<BoxedWriter>>, pending: PendingMap, closed: Arc<AtomicBool>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    trace!(line = %line, "MCP <-");
                    match IncomingMessage::parse(&line) {
                        Ok(IncomingMessage::Response(response)) => {
                            let Some(id) = response.id.as_u64() else {
                                warn!("Received MCP response without a numeric id");
                                continue;
                            };
                            let waiter = lock_pending(&pending).remove(&id);
                            match waiter {
                                Some(waiter) => {
                                    let _ = waiter.send(response);
                                }
                                None => warn!(id, "Received response for unknown request ID"),
                            }
                        }
                        Ok(IncomingMessage::Notification { method }) => {
                            debug!(method = %method, "Received MCP notification");
                        }
                        Ok(IncomingMessage::Request { id, method }) => {
                            Self::answer_server_request(&writer, id, &method).await;
                        }
                        Err(e) => warn!(error = %e, "Ignoring non-JSON line from MCP server"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "MCP server stdout read failed");
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        // Dropping the waiters wakes every in-flight request with a closed error.
        lock_pending(&pending).clear();
        debug!("MCP reader task finished");
    }

    /// Reply to a server-initiated request. Only `ping` is supported.
    async fn answer_server_request(writer: &Arc<Mutex<BoxedWriter>>, id: Value, method: &str) {
        let reply = if method == "ping" {
            serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}})
        } else {
            warn!(method = %method, "Received unexpected request from MCP server");
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {method}")}
            })
        };
        let mut line = reply.to_string();
        line.push('\n');
        let mut w = writer.lock().await;
        if let Err(e) = w.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to answer MCP server request");
            return;
        }
        let _ = w.flush().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn write_message(&self, message: &JsonRpcRequest) -> Result<(), McpError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        trace!(line = %line.trim_end(), "MCP ->");

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Closed(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Closed(format!("flush failed: {e}")))
    }

    /// Send a request and wait for its response.
    ///
    /// Returns the `result` value, or the server's error as [`McpError::Rpc`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed("server exited".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.write_message(&JsonRpcRequest::request(id, method, params))
            .await?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => match response.error {
                Some(error) => Err(McpError::Rpc {
                    code: error.code,
                    message: error.message,
                }),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(McpError::Closed(format!(
                "connection lost while waiting for '{method}'"
            ))),
            Err(_) => Err(McpError::Timeout {
                method: method.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed("server exited".into()));
        }
        self.write_message(&JsonRpcRequest::notification(method, params))
            .await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
