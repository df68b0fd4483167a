//! Test utilities for tk-core.
//!
//! This module provides test infrastructure including:
//! - `FakeSystem`: an in-memory process table whose signaller kills entries
//! - `ScriptedLauncher`: a launcher replaying canned output
//! - `ProcessHarness`: real child processes for end-to-end termination tests

use crate::action::{KillPolicy, SignalError, SignalKind, Signaller};
use crate::collect::{InspectError, ProcessEntry, ProcessState, ProcessTable};
use crate::launch::{LaunchError, LaunchHandle, LaunchRequest, TunnelLauncher};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tk_common::ProcessId;
use tk_config::TunnelSettings;

// ============================================================================
// Settings
// ============================================================================

/// Settings whose URL pattern also accepts `*.example-tunnel.com`.
pub fn test_settings() -> TunnelSettings {
    TunnelSettings {
        public_url_pattern: r"https://[a-z0-9-]+\.(trycloudflare|example-tunnel)\.com".to_string(),
        grace_period_ms: 10,
        ..TunnelSettings::default()
    }
}

/// Default signatures with millisecond timings.
pub fn fast_policy() -> KillPolicy {
    let mut policy = KillPolicy::from_settings(&test_settings());
    policy.grace = Duration::from_millis(10);
    policy.settle = Duration::from_millis(10);
    policy.poll_interval = Duration::from_millis(1);
    policy
}

// ============================================================================
// FakeSystem
// ============================================================================

#[derive(Debug, Clone)]
struct FakeProcess {
    entry: ProcessEntry,
    ignores_graceful: bool,
    unkillable: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    signals: Vec<(ProcessId, SignalKind)>,
    fail_snapshots: bool,
}

/// In-memory process table plus a signaller acting on it.
///
/// A delivered signal removes the target (and reparents its children to
/// pid 1) unless the process was told to ignore that signal.
#[derive(Debug, Default)]
pub struct FakeSystem {
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn(&self, pid: u32, ppid: u32, command: &str) {
        self.state().processes.insert(
            pid,
            FakeProcess {
                entry: ProcessEntry {
                    pid: ProcessId(pid),
                    ppid: ProcessId(ppid),
                    state: ProcessState::Sleeping,
                    user: "dev".to_string(),
                    command: command.to_string(),
                },
                ignores_graceful: false,
                unkillable: false,
            },
        );
    }

    /// The process exits on its own.
    pub fn exit(&self, pid: u32) {
        Self::remove(&mut self.state(), pid);
    }

    pub fn zombify(&self, pid: u32) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.entry.state = ProcessState::Zombie;
        }
    }

    /// SIGTERM is caught and ignored; SIGKILL still works.
    pub fn set_ignores_graceful(&self, pid: u32) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.ignores_graceful = true;
        }
    }

    /// Survives every signal (uninterruptible sleep).
    pub fn set_unkillable(&self, pid: u32) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.unkillable = true;
        }
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.state().fail_snapshots = fail;
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.state().processes.contains_key(&pid)
    }

    /// Every signal sent, in order, including undeliverable ones.
    pub fn signals(&self) -> Vec<(ProcessId, SignalKind)> {
        self.state().signals.clone()
    }

    fn remove(state: &mut FakeState, pid: u32) {
        state.processes.remove(&pid);
        for p in state.processes.values_mut() {
            if p.entry.ppid.0 == pid {
                p.entry.ppid = ProcessId(1);
            }
        }
    }
}

impl ProcessTable for FakeSystem {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, InspectError> {
        let state = self.state();
        if state.fail_snapshots {
            return Err(InspectError::CommandFailed("simulated ps failure".to_string()));
        }
        Ok(state.processes.values().map(|p| p.entry.clone()).collect())
    }
}

impl Signaller for FakeSystem {
    fn send(&self, pid: ProcessId, kind: SignalKind) -> Result<(), SignalError> {
        let mut state = self.state();
        state.signals.push((pid, kind));
        if pid.is_protected() {
            return Err(SignalError::Protected(pid));
        }
        let Some(process) = state.processes.get(&pid.0) else {
            return Err(SignalError::NoSuchProcess);
        };
        let survives = process.unkillable
            || (kind == SignalKind::Graceful && process.ignores_graceful);
        if !survives {
            Self::remove(&mut state, pid.0);
        }
        Ok(())
    }
}

// ============================================================================
// ScriptedLauncher
// ============================================================================

/// Launcher that replays fixed output lines.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    pid: Option<ProcessId>,
    lines: Vec<String>,
    failure: Option<String>,
    launched: Mutex<Vec<LaunchRequest>>,
}

impl ScriptedLauncher {
    pub fn new(pid: u32, lines: &[&str]) -> Self {
        Self {
            pid: Some(ProcessId(pid)),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Launcher whose binary is missing.
    pub fn failing(binary: &str) -> Self {
        Self {
            failure: Some(binary.to_string()),
            ..Self::default()
        }
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TunnelLauncher for ScriptedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        if let Some(binary) = &self.failure {
            return Err(LaunchError::BinaryNotFound(binary.clone()));
        }
        self.launched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(LaunchHandle::new(
            self.pid,
            Box::new(self.lines.clone().into_iter()),
        ))
    }
}

// ============================================================================
// Real processes
// ============================================================================

/// Spawns real processes for termination tests.
pub struct ProcessHarness;

impl ProcessHarness {
    /// Return true if `sh` and `ps` work here.
    pub fn is_available() -> bool {
        #[cfg(unix)]
        {
            let works = |program: &str, args: &[&str]| {
                std::process::Command::new(program)
                    .args(args)
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false)
            };
            works("sh", &["-c", "true"]) && works("ps", &["-A", "-o", "pid="])
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Spawn `sh -c cmd`.
    pub fn spawn_shell(&self, cmd: &str) -> std::io::Result<ProcessHandle> {
        let child = std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(std::process::Stdio::null())
            .spawn()?;
        Ok(ProcessHandle {
            pid: child.id(),
            child: Mutex::new(child),
        })
    }

    /// Spawn a launcher-like shell tagged `tag` that runs `child_cmd` in
    /// the background and waits for it.
    pub fn spawn_launcher(&self, tag: &str, child_cmd: &str) -> std::io::Result<ProcessHandle> {
        self.spawn_shell(&format!(": {}; {} & wait", tag, child_cmd))
    }
}

/// Poll `table` until `pred` holds for some entry or `timeout` elapses.
pub fn wait_for_entry(
    table: &dyn ProcessTable,
    timeout: Duration,
    pred: impl Fn(&ProcessEntry) -> bool,
) -> Option<ProcessEntry> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(entries) = table.snapshot() {
            if let Some(found) = entries.into_iter().find(|e| e.is_live() && pred(e)) {
                return Some(found);
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

/// Handle to a spawned process; killed and reaped on drop.
pub struct ProcessHandle {
    pid: u32,
    child: Mutex<std::process::Child>,
}

impl ProcessHandle {
    pub fn pid(&self) -> ProcessId {
        ProcessId(self.pid)
    }

    /// Reap the process if it has exited.
    pub fn try_reap(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = child.kill();
        let _ = child.wait();
    }
}
