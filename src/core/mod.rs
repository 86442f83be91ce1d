pub mod catalog;
pub mod client;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;
pub mod supervisor;

pub use catalog::ClientTools;
pub use client::{
    ClientConfig, ClientEvent, ClientRecord, ClientStatus, ConnectionParams, TransportKind,
};
pub use lifecycle::ConnectionManager;
pub use protocol::{CallToolResult, Tool};
pub use registry::{ClientRegistry, ClientSlot};
pub use service::ClientService;
pub use session::{McpSession, Session};
pub use supervisor::{HealthSupervisor, SweepReport};
