use crate::core::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::core::session::Session;
use crate::transport::process::ManagedProcess;
use crate::utils::errors::McpResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Transport for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for response
    async fn send_request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, request: JsonRpcRequest) -> McpResult<()>;

    /// Check if transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> McpResult<()>;
}

/// A freshly created session and the subprocess backing it, if any
pub struct SessionHandle {
    pub session: Arc<dyn Session>,
    pub process: Option<ManagedProcess>,
}

impl SessionHandle {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            process: None,
        }
    }

    pub fn with_process(session: Arc<dyn Session>, process: ManagedProcess) -> Self {
        Self {
            session,
            process: Some(process),
        }
    }
}
