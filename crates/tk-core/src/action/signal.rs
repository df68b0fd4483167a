//! Signal delivery.
//!
//! Single-signal termination attempts with OS error mapping. Escalation
//! (graceful, wait, forceful) lives in the tree killer and the reaper.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tk_common::ProcessId;
use tracing::debug;

/// Which termination signal to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// SIGTERM: ask the process to exit.
    Graceful,
    /// SIGKILL: cannot be caught or ignored.
    Forceful,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Graceful => "SIGTERM",
            SignalKind::Forceful => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn as_raw(&self) -> i32 {
        match self {
            SignalKind::Graceful => libc::SIGTERM,
            SignalKind::Forceful => libc::SIGKILL,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a signal was not delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("no such process")]
    NoSuchProcess,

    #[error("permission denied")]
    PermissionDenied,

    #[error("refusing to signal protected pid {0}")]
    Protected(ProcessId),

    #[error("signals are not supported on this platform")]
    Unsupported,

    #[error("{0}")]
    Failed(String),
}

/// Sends signals to processes.
pub trait Signaller {
    fn send(&self, pid: ProcessId, kind: SignalKind) -> Result<(), SignalError>;
}

/// [`Signaller`] backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignaller;

impl Signaller for OsSignaller {
    #[cfg(unix)]
    fn send(&self, pid: ProcessId, kind: SignalKind) -> Result<(), SignalError> {
        if pid.is_protected() {
            return Err(SignalError::Protected(pid));
        }
        let raw = i32::try_from(pid.0).map_err(|_| SignalError::NoSuchProcess)?;

        let result = unsafe { libc::kill(raw, kind.as_raw()) };
        if result == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(SignalError::NoSuchProcess),
            Some(libc::EPERM) => Err(SignalError::PermissionDenied),
            _ => Err(SignalError::Failed(err.to_string())),
        }
    }

    #[cfg(not(unix))]
    fn send(&self, _pid: ProcessId, _kind: SignalKind) -> Result<(), SignalError> {
        Err(SignalError::Unsupported)
    }
}

/// Result of one signal delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationAttempt {
    pub pid: ProcessId,
    pub signal: SignalKind,
    /// Whether the OS accepted the signal.
    pub accepted: bool,
    pub detail: String,
}

/// Sends a single termination signal and reports what happened.
pub struct Terminator<'a> {
    signaller: &'a dyn Signaller,
}

impl<'a> Terminator<'a> {
    pub fn new(signaller: &'a dyn Signaller) -> Self {
        Self { signaller }
    }

    /// Send `kind` to `pid`. Never fails: refusals come back as
    /// `accepted: false` with the reason in `detail`.
    pub fn terminate(&self, pid: ProcessId, kind: SignalKind) -> TerminationAttempt {
        let outcome = self.signaller.send(pid, kind);
        debug!(pid = pid.0, signal = %kind, ok = outcome.is_ok(), "signal sent");
        match outcome {
            Ok(()) => TerminationAttempt {
                pid,
                signal: kind,
                accepted: true,
                detail: format!("sent {}", kind),
            },
            Err(e) => TerminationAttempt {
                pid,
                signal: kind,
                accepted: false,
                detail: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSystem;

    #[test]
    fn test_signal_names() {
        assert_eq!(SignalKind::Graceful.to_string(), "SIGTERM");
        assert_eq!(SignalKind::Forceful.to_string(), "SIGKILL");
    }

    #[test]
    fn test_terminate_reports_missing_process() {
        let system = FakeSystem::new();
        let attempt = Terminator::new(&system).terminate(ProcessId(4321), SignalKind::Graceful);
        assert!(!attempt.accepted);
        assert_eq!(attempt.detail, "no such process");
    }

    #[test]
    fn test_terminate_live_process() {
        let system = FakeSystem::new();
        system.spawn(4321, 1, "cloudflared tunnel --url localhost:1");
        let attempt = Terminator::new(&system).terminate(ProcessId(4321), SignalKind::Graceful);
        assert!(attempt.accepted);
        assert_eq!(system.signals(), vec![(ProcessId(4321), SignalKind::Graceful)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_os_signaller_refuses_init() {
        let err = OsSignaller.send(ProcessId(1), SignalKind::Graceful).unwrap_err();
        assert_eq!(err, SignalError::Protected(ProcessId(1)));
        let err = OsSignaller.send(ProcessId(0), SignalKind::Forceful).unwrap_err();
        assert_eq!(err, SignalError::Protected(ProcessId(0)));
    }

    #[cfg(unix)]
    #[test]
    fn test_os_signaller_missing_pid() {
        // Above the default pid_max on Linux and macOS.
        let err = OsSignaller
            .send(ProcessId(2_000_000_000), SignalKind::Graceful)
            .unwrap_err();
        assert_eq!(err, SignalError::NoSuchProcess);
    }
}
