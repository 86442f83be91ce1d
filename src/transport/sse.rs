//! SSE (Server-Sent Events) transport for MCP communication
//!
//! The server streams JSON-RPC messages over a long-lived GET. Its first
//! `endpoint` event names the URL that client messages are POSTed to.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::pending::PendingRequests;
use crate::transport::traits::Transport;
use crate::utils::errors::{McpError, McpResult};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};
use url::Url;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental line-oriented SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator); returns an event on blank lines
    pub fn feed(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            _ => {}
        }
        None
    }

    /// Flush a trailing event when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data);
        Some(SseEvent {
            event,
            data: data.trim_end_matches('\n').to_string(),
        })
    }
}

/// SSE transport for MCP servers
pub struct SseTransport {
    endpoint: Url,
    post_url: Url,
    client: reqwest::Client,
    pending: Arc<PendingRequests>,
    is_connected: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event
    pub async fn connect(
        endpoint: Url,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> McpResult<Self> {
        info!("Connecting to SSE endpoint: {}", endpoint);

        // No overall timeout: it would cut the long-lived event stream.
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| McpError::TransportError(e.to_string()))?;

        let response = tokio::time::timeout(
            connect_timeout,
            client
                .get(endpoint.clone())
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send(),
        )
        .await
        .map_err(|_| McpError::Timeout(connect_timeout.as_millis() as u64))?
        .map_err(|e| McpError::TransportError(format!("Failed to connect: {}", e)))?;

        if !response.status().is_success() {
            return Err(McpError::TransportError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let pending = Arc::new(PendingRequests::new());
        let is_connected = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let reader = Self::start_reader(
            response,
            endpoint.clone(),
            client.clone(),
            pending.clone(),
            is_connected.clone(),
            endpoint_tx,
            request_timeout,
        );

        let post_url = match tokio::time::timeout(connect_timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::TransportError(
                    "SSE stream ended before the endpoint event".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout(connect_timeout.as_millis() as u64));
            }
        };

        info!("SSE connection established, posting to {}", post_url);
        Ok(Self {
            endpoint,
            post_url,
            client,
            pending,
            is_connected,
            request_timeout,
            reader: Mutex::new(Some(reader)),
        })
    }

    fn start_reader(
        response: reqwest::Response,
        base: Url,
        client: reqwest::Client,
        pending: Arc<PendingRequests>,
        is_connected: Arc<AtomicBool>,
        endpoint_tx: oneshot::Sender<Url>,
        request_timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let stream = Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(std::io::Error::other)),
            );
            let mut lines = BufReader::new(StreamReader::new(stream)).lines();
            let mut parser = SseParser::new();
            let mut endpoint_tx = Some(endpoint_tx);
            let mut post_url: Option<Url> = None;

            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) => match parser.feed(&line) {
                        Some(event) => event,
                        None => continue,
                    },
                    Ok(None) => match parser.finish() {
                        Some(event) => event,
                        None => break,
                    },
                    Err(e) => {
                        error!("SSE stream error: {}", e);
                        break;
                    }
                };

                match event.event.as_str() {
                    "endpoint" => match base.join(event.data.trim()) {
                        Ok(url) => {
                            post_url = Some(url.clone());
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(url);
                            }
                        }
                        Err(e) => warn!("Invalid SSE endpoint '{}': {}", event.data, e),
                    },
                    "message" => {
                        debug!("SSE received: {}", event.data);
                        if let Some(reply) = pending.route(&event.data) {
                            if let Some(url) = &post_url {
                                // Answered off the reader task; a slow POST must not stall the stream.
                                let request = client
                                    .post(url.clone())
                                    .timeout(request_timeout)
                                    .json(&reply);
                                tokio::spawn(async move {
                                    if let Err(e) = request.send().await {
                                        warn!("Failed to answer server request: {}", e);
                                    }
                                });
                            }
                        }
                    }
                    other => debug!("Ignoring SSE event '{}'", other),
                }
            }

            info!("SSE reader task ended");
            is_connected.store(false, Ordering::SeqCst);
            pending.clear();
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// URL client messages are POSTed to
    pub fn post_url(&self) -> &Url {
        &self.post_url
    }

    async fn post(&self, request: &JsonRpcRequest) -> McpResult<()> {
        let response = self
            .client
            .post(self.post_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| McpError::TransportError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(McpError::TransportError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn header_map(headers: &HashMap<String, String>) -> McpResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| McpError::invalid("headers", format!("{}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| McpError::invalid("headers", format!("{}: {}", name, e)))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for SseTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        let waiter = self.pending.register(&mut request);
        debug!("Sending SSE request: {}", request.method);

        self.post(&request).await?;
        waiter.wait(self.request_timeout).await
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::TransportError("Transport not connected".to_string()));
        }

        let mut request = request;
        request.id = None;
        debug!("Sending SSE notification: {}", request.method);
        self.post(&request).await
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> McpResult<()> {
        info!("Closing SSE transport");
        self.is_connected.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.pending.clear();
        Ok(())
    }
}
