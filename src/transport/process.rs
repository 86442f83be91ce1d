//! Subprocess invocation and termination

use crate::utils::errors::{McpError, McpResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Everything needed to start a stdio server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Overlay on top of the inherited environment
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    /// Build from an argv whose first element is the program
    pub fn from_argv(argv: Vec<String>) -> McpResult<Self> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| McpError::SpawnFailure("empty command line".to_string()))?;
        Ok(Self {
            program,
            args: argv.collect(),
            working_dir: None,
            env: HashMap::new(),
        })
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }

    /// Spawn with piped stdio. The child is killed if its handle is dropped.
    pub fn spawn(&self) -> McpResult<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        debug!("Spawning: {}", self.command_line());
        command
            .spawn()
            .map_err(|e| McpError::SpawnFailure(format!("{}: {}", self.command_line(), e)))
    }
}

/// An OS process owned by a client connection
pub struct ManagedProcess {
    label: String,
    child: Child,
}

impl ManagedProcess {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the process has not exited yet
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit, force-kill it after `grace`.
    ///
    /// Dropping this future mid-way still kills the child via `kill_on_drop`.
    pub async fn terminate(mut self, grace: Duration) -> McpResult<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            debug!("Process for {} already exited: {}", self.label, status);
            return Ok(status);
        }

        self.request_exit();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process for {} exited: {}", self.label, status);
                Ok(status)
            }
            Ok(Err(e)) => Err(McpError::Io(e)),
            Err(_) => {
                warn!(
                    "Process for {} did not exit within {:?}, killing",
                    self.label, grace
                );
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to {}: {}", self.label, e);
                }
            }
            None => debug!("Process for {} has no pid, already reaped", self.label),
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to stop process for {}: {}", self.label, e);
        }
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("label", &self.label)
            .field("pid", &self.child.id())
            .finish()
    }
}
