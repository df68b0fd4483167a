//! Tunnel launching.
//!
//! A launcher starts a tunnel for a local address and hands back a
//! [`LaunchHandle`]: the pid to record plus the tunnel's output as a
//! stream of lines. The core reads lines until one carries the public
//! address or the stream ends.

pub mod discovery;
pub mod process;

pub use discovery::PublicUrlMatcher;
pub use process::{BinaryLauncher, SupervisorLauncher};

use std::process::{Child, ExitStatus};
use thiserror::Error;
use tk_common::ProcessId;

/// Output lines of a launched tunnel.
pub type LineStream = Box<dyn Iterator<Item = String> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub name: String,
    pub local_address: String,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("tunnel binary '{0}' not found in PATH")]
    BinaryNotFound(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("cannot locate our own executable: {0}")]
    CurrentExe(std::io::Error),
}

impl LaunchError {
    pub(crate) fn from_spawn(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            LaunchError::BinaryNotFound(program.to_string())
        } else {
            LaunchError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    }
}

impl From<LaunchError> for tk_common::Error {
    fn from(err: LaunchError) -> Self {
        tk_common::Error::Launch(err.to_string())
    }
}

/// A launched tunnel.
pub struct LaunchHandle {
    pid: Option<ProcessId>,
    lines: LineStream,
    child: Option<Child>,
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("pid", &self.pid)
            .field("lines", &"...")
            .field("child", &self.child.as_ref().map(Child::id))
            .finish()
    }
}

impl LaunchHandle {
    pub fn new(pid: Option<ProcessId>, lines: LineStream) -> Self {
        Self {
            pid,
            lines,
            child: None,
        }
    }

    /// Handle owning a child process, reaped by [`wait`](Self::wait).
    pub fn with_child(child: Child, lines: LineStream) -> Self {
        Self {
            pid: Some(ProcessId(child.id())),
            lines,
            child: Some(child),
        }
    }

    /// Pid to record as the tunnel's owning process.
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn lines(&mut self) -> &mut (dyn Iterator<Item = String> + Send) {
        self.lines.as_mut()
    }

    /// Drain remaining output, then reap the child if we own one.
    pub fn wait(mut self) -> Option<ExitStatus> {
        for line in self.lines.by_ref() {
            tracing::trace!(line = %line, "tunnel output");
        }
        self.child.as_mut().and_then(|child| child.wait().ok())
    }
}

/// Starts tunnels.
pub trait TunnelLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError>;
}
