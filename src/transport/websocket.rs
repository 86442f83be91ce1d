//! WebSocket transport for MCP communication
//!
//! Provides bidirectional streaming communication over WebSocket.

use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::pending::PendingRequests;
use crate::transport::traits::Transport;
use crate::utils::errors::{McpError, McpResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};
use url::Url;

/// WebSocket transport for MCP servers
pub struct WebSocketTransport {
    url: Url,
    write_tx: mpsc::Sender<Message>,
    pending: Arc<PendingRequests>,
    is_connected: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Open the socket and start the reader/writer tasks
    pub async fn connect(
        url: Url,
        headers: &HashMap<String, String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> McpResult<Self> {
        info!("Connecting to WebSocket: {}", url);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| McpError::invalid("url", e.to_string()))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::invalid("headers", format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::invalid("headers", format!("{}: {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| McpError::Timeout(connect_timeout.as_millis() as u64))?
            .map_err(|e| McpError::TransportError(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (write_tx, mut write_rx) = mpsc::channel::<Message>(100);
        let pending = Arc::new(PendingRequests::new());
        let is_connected = Arc::new(AtomicBool::new(true));

        let writer = {
            let is_connected = is_connected.clone();
            tokio::spawn(async move {
                while let Some(msg) = write_rx.recv().await {
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = write.send(msg).await {
                        error!("WebSocket send error: {}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                is_connected.store(false, Ordering::SeqCst);
            })
        };

        let reader = {
            let pending = pending.clone();
            let is_connected = is_connected.clone();
            let reply_tx = write_tx.clone();
            tokio::spawn(async move {
                while let Some(result) = read.next().await {
                    let text = match result {
                        Ok(Message::Text(text)) => text.as_str().to_owned(),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("Ignoring non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Ok(Message::Close(frame)) => {
                            info!("WebSocket closed by server: {:?}", frame);
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            error!("WebSocket read error: {}", e);
                            break;
                        }
                    };

                    debug!("WebSocket received: {}", text);
                    if let Some(reply) = pending.route(&text) {
                        match serde_json::to_string(&reply) {
                            Ok(json) => {
                                let _ = reply_tx.send(Message::Text(json.into())).await;
                            }
                            Err(e) => error!("Failed to encode reply: {}", e),
                        }
                    }
                }
                is_connected.store(false, Ordering::SeqCst);
                pending.clear();
                info!("WebSocket reader task ended");
            })
        };

        info!("WebSocket transport connected");
        Ok(Self {
            url,
            write_tx,
            pending,
            is_connected,
            request_timeout,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send_text(&self, json: String) -> McpResult<()> {
        self.write_tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| McpError::TransportError(format!("Failed to send: {}", e)))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::TransportError("WebSocket not connected".to_string()));
        }

        let mut request = request;
        let waiter = self.pending.register(&mut request);
        let json = serde_json::to_string(&request)?;
        debug!("WebSocket sending: {}", json);

        self.send_text(json).await?;
        waiter.wait(self.request_timeout).await
    }

    async fn send_notification(&self, request: JsonRpcRequest) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::TransportError("WebSocket not connected".to_string()));
        }

        let mut request = request;
        request.id = None;
        let json = serde_json::to_string(&request)?;
        debug!("WebSocket sending notification: {}", json);
        self.send_text(json).await
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> McpResult<()> {
        info!("Closing WebSocket transport to {}", self.url);

        let _ = self.write_tx.send(Message::Close(None)).await;
        self.is_connected.store(false, Ordering::SeqCst);
        self.pending.clear();

        // Let the writer flush the close frame before tearing it down.
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(Duration::from_millis(500), &mut writer).await;
            writer.abort();
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Port 9 (discard) is essentially never listening for WebSocket.
        let url = "ws://127.0.0.1:9/mcp".parse::<Url>().unwrap();
        let result = WebSocketTransport::connect(
            url,
            &HashMap::new(),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_header_rejected() {
        let url = "ws://127.0.0.1:9/mcp".parse::<Url>().unwrap();
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let result = WebSocketTransport::connect(
            url,
            &headers,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(McpError::InvalidParameter { .. })));
    }
}
