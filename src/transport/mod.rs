pub mod factory;
pub mod lines;
pub mod pending;
pub mod process;
pub mod sse;
pub mod stdio;
pub mod traits;
pub mod websocket;

pub use factory::{
    ContainerExecFactory, LocalProcessFactory, PackageLaunchFactory, SessionFactory,
    StreamingEndpointFactory, TransportRegistry,
};
pub use process::{ManagedProcess, ProcessSpec};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use traits::{SessionHandle, Transport};
pub use websocket::WebSocketTransport;
