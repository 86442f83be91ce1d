//! Request/response correlation shared by every transport

use crate::core::protocol::{
    IncomingMessage, JsonRpcRequest, JsonRpcResponse, RequestId, METHOD_NOT_FOUND,
};
use crate::utils::errors::{McpError, McpResult};
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// In-flight requests of one session, keyed by JSON-RPC id
pub struct PendingRequests {
    counter: AtomicI64,
    waiters: DashMap<RequestId, oneshot::Sender<JsonRpcResponse>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(1),
            waiters: DashMap::new(),
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Assign an id if the request has none and register a waiter for it
    pub fn register(&self, request: &mut JsonRpcRequest) -> Waiter<'_> {
        let id = match &request.id {
            Some(id) => id.clone(),
            None => {
                let id = self.next_id();
                request.id = Some(id.clone());
                id
            }
        };
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), tx);
        Waiter {
            pending: self,
            id,
            rx,
        }
    }

    /// Fail every in-flight request; used when the stream ends
    pub fn clear(&self) {
        self.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Dispatch one raw message read from the transport.
    ///
    /// Returns the reply to write back when the server sent a request.
    pub fn route(&self, raw: &str) -> Option<JsonRpcResponse> {
        match IncomingMessage::parse(raw) {
            Ok(IncomingMessage::Response(response)) => {
                match response.id.clone() {
                    Some(id) => match self.waiters.remove(&id) {
                        Some((_, tx)) => {
                            let _ = tx.send(response);
                        }
                        None => warn!("Received response with unknown id: {:?}", id),
                    },
                    None => debug!("Received response without id, ignoring"),
                }
                None
            }
            Ok(IncomingMessage::Request(request)) => {
                let id = request.id?;
                if request.method == "ping" {
                    Some(JsonRpcResponse::success(id, json!({})))
                } else {
                    debug!("Rejecting server request {}", request.method);
                    Some(JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!("method not supported by client: {}", request.method),
                    ))
                }
            }
            Ok(IncomingMessage::Notification(notification)) => {
                debug!("Server notification: {}", notification.method);
                None
            }
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                None
            }
        }
    }
}

/// One registered request. Dropping it, whether after the reply, on a timeout
/// or with the caller's future, releases the waiter entry.
pub struct Waiter<'a> {
    pending: &'a PendingRequests,
    id: RequestId,
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl Waiter<'_> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub async fn wait(mut self, timeout: Duration) -> McpResult<JsonRpcResponse> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::TransportError(
                "connection closed before a response arrived".to_string(),
            )),
            Err(_) => Err(McpError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.pending.waiters.remove(&self.id);
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
