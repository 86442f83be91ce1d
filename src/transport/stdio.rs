use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::lines::{BoundedLines, Line};
use crate::transport::pending::PendingRequests;
use crate::transport::traits::Transport;
use crate::utils::errors::{McpError, McpResult};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound for one newline-delimited message
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Longer stderr lines are skipped, not logged
const MAX_STDERR_LINE: usize = 64 * 1024;

type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// Newline-delimited JSON-RPC over a child's stdin/stdout
pub struct StdioTransport {
    label: String,
    stdin: SharedStdin,
    pending: Arc<PendingRequests>,
    is_connected: Arc<AtomicBool>,
    request_timeout: Duration,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    pub fn new(
        label: impl Into<String>,
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: Option<ChildStderr>,
        request_timeout: Duration,
    ) -> Self {
        let label = label.into();
        let stdin: SharedStdin = Arc::new(Mutex::new(Some(stdin)));
        let pending = Arc::new(PendingRequests::new());
        let is_connected = Arc::new(AtomicBool::new(true));

        let mut tasks = vec![Self::start_reader(
            label.clone(),
            stdout,
            stdin.clone(),
            pending.clone(),
            is_connected.clone(),
        )];
        if let Some(stderr) = stderr {
            tasks.push(Self::start_stderr_forwarder(label.clone(), stderr));
        }

        Self {
            label,
            stdin,
            pending,
            is_connected,
            request_timeout,
            tasks: SyncMutex::new(tasks),
        }
    }

    fn start_reader(
        label: String,
        stdout: ChildStdout,
        stdin: SharedStdin,
        pending: Arc<PendingRequests>,
        is_connected: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BoundedLines::new(stdout, MAX_LINE_LENGTH);

            loop {
                match lines.next_line().await {
                    Ok(Some(Line::Text(line))) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        debug!("[{}] Received: {}", label, line);
                        if let Some(reply) = pending.route(line) {
                            if let Err(e) = write_message(&stdin, &reply).await {
                                warn!("[{}] Failed to answer server request: {}", label, e);
                            }
                        }
                    }
                    Ok(Some(Line::Oversized(len))) => {
                        warn!(
                            "[{}] Dropped {} byte message (limit {})",
                            label, len, MAX_LINE_LENGTH
                        );
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("[{}] Stdout read error: {}", label, e);
                        break;
                    }
                }
            }

            info!("[{}] Stdio reader task ended", label);
            is_connected.store(false, Ordering::SeqCst);
            pending.clear();
        })
    }

    /// Forward stderr to the log, draining the pipe until EOF
    fn start_stderr_forwarder(label: String, stderr: ChildStderr) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BoundedLines::new(stderr, MAX_STDERR_LINE);
            loop {
                match lines.next_line().await {
                    Ok(Some(Line::Text(line))) => debug!("[{}] stderr: {}", label, line),
                    Ok(Some(Line::Oversized(len))) => {
                        debug!("[{}] stderr: <{} bytes skipped>", label, len)
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("[{}] stderr read error: {}", label, e);
                        break;
                    }
                }
            }
        })
    }
}

async fn write_message<T: serde::Serialize>(stdin: &SharedStdin, message: &T) -> McpResult<()> {
    let json = serde_json::to_string(message)?;
    let mut guard = stdin.lock().await;
    let writer = guard
        .as_mut()
        .ok_or_else(|| McpError::TransportError("stdin already closed".to_string()))?;
    write_line(writer, &json).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> McpResult<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        let waiter = self.pending.register(&mut request);
        debug!("[{}] Sending {}", self.label, request.method);

        write_message(&self.stdin, &request).await?;
        waiter.wait(self.request_timeout).await
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        request.id = None;
        debug!("[{}] Sending notification {}", self.label, request.method);
        write_message(&self.stdin, &request).await
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> McpResult<()> {
        self.is_connected.store(false, Ordering::SeqCst);

        // Closing stdin is the polite stop signal for stdio servers.
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pending.clear();
        debug!("[{}] Stdio transport closed", self.label);
        Ok(())
    }
}
