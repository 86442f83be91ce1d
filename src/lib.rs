//! supermcp-client: keeps sessions to many MCP tool servers alive over
//! stdio subprocesses, container exec, npx packages and SSE/WebSocket endpoints

pub mod cli;
pub mod config;
pub mod core;
pub mod transport;
pub mod utils;

pub use config::{AppConfig, ServiceSettings};
pub use core::{ClientConfig, ClientRecord, ClientService, ClientStatus, TransportKind};
pub use utils::errors::{McpError, McpResult};
