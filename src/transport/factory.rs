//! Session factories, one per transport kind

use crate::config::ServiceSettings;
use crate::core::client::{ConnectionParams, TransportKind};
use crate::core::session::McpSession;
use crate::transport::process::{ManagedProcess, ProcessSpec};
use crate::transport::sse::SseTransport;
use crate::transport::stdio::StdioTransport;
use crate::transport::traits::{SessionHandle, Transport};
use crate::transport::websocket::WebSocketTransport;
use crate::utils::errors::{McpError, McpResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Builds a live session for one transport kind
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        client_id: &str,
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<SessionHandle>;
}

/// Factories keyed by transport kind
#[derive(Clone)]
pub struct TransportRegistry {
    factories: HashMap<TransportKind, Arc<dyn SessionFactory>>,
}

impl TransportRegistry {
    /// No factories; kinds must be registered explicitly
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The built-in factory for every transport kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(TransportKind::LocalProcess, Arc::new(LocalProcessFactory));
        registry.register(TransportKind::ContainerExec, Arc::new(ContainerExecFactory));
        registry.register(TransportKind::StreamingEndpoint, Arc::new(StreamingEndpointFactory));
        registry.register(TransportKind::PackageLaunch, Arc::new(PackageLaunchFactory));
        registry
    }

    /// Install or replace the factory for `kind`
    pub fn register(&mut self, kind: TransportKind, factory: Arc<dyn SessionFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: TransportKind) -> McpResult<Arc<dyn SessionFactory>> {
        self.factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| McpError::UnsupportedTransport(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.factories.contains_key(kind))
            .collect()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Spawn `spec` and speak JSON-RPC over its stdio
fn spawn_stdio_session(
    client_id: &str,
    spec: &ProcessSpec,
    settings: &ServiceSettings,
) -> McpResult<SessionHandle> {
    let mut child = spec.spawn()?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| McpError::SpawnFailure("child stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| McpError::SpawnFailure("child stdout not captured".to_string()))?;
    let stderr = child.stderr.take();

    let process = ManagedProcess::new(client_id, child);
    info!(
        "[{}] Started {} (pid {:?})",
        client_id,
        spec.command_line(),
        process.id()
    );

    let transport = StdioTransport::new(
        client_id,
        stdin,
        stdout,
        stderr,
        settings.request_timeout(),
    );
    let session = Arc::new(McpSession::new(client_id, Box::new(transport)));
    Ok(SessionHandle::with_process(session, process))
}

/// Subprocess launched from `command` + `args`
pub struct LocalProcessFactory;

impl LocalProcessFactory {
    pub fn invocation(params: &ConnectionParams) -> McpResult<ProcessSpec> {
        let mut argv = params.command(TransportKind::LocalProcess)?;
        argv.extend(params.string_list("args")?);
        Ok(ProcessSpec::from_argv(argv)?
            .with_working_dir(params.working_dir()?)
            .with_env(params.string_map("env")?))
    }
}

#[async_trait]
impl SessionFactory for LocalProcessFactory {
    async fn create(
        &self,
        client_id: &str,
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<SessionHandle> {
        spawn_stdio_session(client_id, &Self::invocation(params)?, settings)
    }
}

/// Subprocess exec'd inside a running container
pub struct ContainerExecFactory;

impl ContainerExecFactory {
    /// With a `container` parameter the engine's `exec` wrapper is synthesized;
    /// otherwise `command` is already the full wrapper.
    pub fn invocation(
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<ProcessSpec> {
        let command = params.command(TransportKind::ContainerExec)?;
        let args = params.string_list("args")?;
        let env = params.string_map("env")?;
        let working_dir = params.working_dir()?;

        let Some(container) = params.optional_str("container")? else {
            let argv = command.into_iter().chain(args).collect();
            return Ok(ProcessSpec::from_argv(argv)?
                .with_working_dir(working_dir)
                .with_env(env));
        };

        let engine = params
            .optional_str("engine")?
            .unwrap_or_else(|| settings.container_engine.clone());

        let mut argv = vec![engine, "exec".to_string(), "-i".to_string()];
        if let Some(dir) = working_dir {
            argv.push("-w".to_string());
            argv.push(dir.to_string_lossy().into_owned());
        }
        let mut env: Vec<_> = env.into_iter().collect();
        env.sort();
        for (key, value) in env {
            argv.push("-e".to_string());
            argv.push(format!("{}={}", key, value));
        }
        argv.push(container);
        argv.extend(command);
        argv.extend(args);

        ProcessSpec::from_argv(argv)
    }
}

#[async_trait]
impl SessionFactory for ContainerExecFactory {
    async fn create(
        &self,
        client_id: &str,
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<SessionHandle> {
        spawn_stdio_session(client_id, &Self::invocation(params, settings)?, settings)
    }
}

/// Package fetched and run by an on-demand runner such as `npx -y`
pub struct PackageLaunchFactory;

impl PackageLaunchFactory {
    pub fn invocation(
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<ProcessSpec> {
        let package = params.require_str(TransportKind::PackageLaunch, "package")?;

        let runner = match params.get("runner") {
            Some(_) => params.string_list("runner")?,
            None => settings.package_runner.clone(),
        };
        if runner.is_empty() {
            return Err(McpError::invalid("runner", "runner command is empty"));
        }

        let mut argv = runner;
        argv.push(package);
        argv.extend(params.string_list("args")?);

        Ok(ProcessSpec::from_argv(argv)?
            .with_working_dir(params.working_dir()?)
            .with_env(params.string_map("env")?))
    }
}

#[async_trait]
impl SessionFactory for PackageLaunchFactory {
    async fn create(
        &self,
        client_id: &str,
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<SessionHandle> {
        spawn_stdio_session(client_id, &Self::invocation(params, settings)?, settings)
    }
}

/// Which stream a streaming-endpoint URL selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    WebSocket,
    Sse,
}

/// Remote server reached over WebSocket or SSE
pub struct StreamingEndpointFactory;

impl StreamingEndpointFactory {
    pub fn endpoint(params: &ConnectionParams) -> McpResult<(Url, EndpointKind)> {
        let raw = params.require_str(TransportKind::StreamingEndpoint, "url")?;
        let url = Url::parse(&raw).map_err(|e| McpError::invalid("url", format!("{}: {}", raw, e)))?;

        let kind = match url.scheme() {
            "ws" | "wss" => EndpointKind::WebSocket,
            "http" | "https" => EndpointKind::Sse,
            other => {
                return Err(McpError::invalid(
                    "url",
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };
        Ok((url, kind))
    }
}

#[async_trait]
impl SessionFactory for StreamingEndpointFactory {
    async fn create(
        &self,
        client_id: &str,
        params: &ConnectionParams,
        settings: &ServiceSettings,
    ) -> McpResult<SessionHandle> {
        let (url, kind) = Self::endpoint(params)?;
        let headers = params.string_map("headers")?;

        let transport: Box<dyn Transport> = match kind {
            EndpointKind::WebSocket => Box::new(
                WebSocketTransport::connect(
                    url,
                    &headers,
                    settings.connect_timeout(),
                    settings.request_timeout(),
                )
                .await?,
            ),
            EndpointKind::Sse => Box::new(
                SseTransport::connect(
                    url,
                    &headers,
                    settings.connect_timeout(),
                    settings.request_timeout(),
                )
                .await?,
            ),
        };

        Ok(SessionHandle::new(Arc::new(McpSession::new(
            client_id, transport,
        ))))
    }
}
