//! Termination actions.
//!
//! - [`signal`]: one signal to one pid, with OS error mapping
//! - [`tree_kill`]: stop one tunnel (launcher process plus tunnel-binary children)
//! - [`reaper`]: stop every non-token tunnel on this machine
//!
//! Both escalating paths send SIGTERM, wait up to the grace period, then
//! send SIGKILL exactly once to whatever survived.

pub mod reaper;
pub mod signal;
pub mod transcript;
pub mod tree_kill;

pub use reaper::{BulkReaper, ReapReport};
pub use signal::{OsSignaller, SignalError, SignalKind, Signaller, TerminationAttempt, Terminator};
pub use transcript::{EntryKind, Transcript, TranscriptEntry};
pub use tree_kill::{KillReport, KillTarget, TreeKiller};

use crate::collect::{CommandSignature, ProcessSnapshot, ProcessTable};
use std::thread;
use std::time::{Duration, Instant};
use tk_common::ProcessId;
use tk_config::TunnelSettings;

/// How long to keep checking after SIGKILL before calling a process a survivor.
const KILL_SETTLE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signatures and timing shared by the tree killer and the reaper.
#[derive(Debug, Clone)]
pub struct KillPolicy {
    /// Tunnel-binary processes.
    pub tunnel: CommandSignature,
    /// Our own launcher (supervisor) processes.
    pub launcher: CommandSignature,
    /// Marker of credential tunnels that bulk reaping must skip.
    pub token_marker: String,
    /// Wait after SIGTERM before escalating.
    pub grace: Duration,
    /// Wait after SIGKILL before reporting survivors.
    pub settle: Duration,
    pub poll_interval: Duration,
}

impl KillPolicy {
    pub fn from_settings(settings: &TunnelSettings) -> Self {
        Self {
            tunnel: CommandSignature::new(&settings.tunnel_signature),
            launcher: CommandSignature::new(&settings.launcher_signature),
            token_marker: settings.token_marker.clone(),
            grace: settings.grace_period(),
            settle: KILL_SETTLE,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Tunnel signature minus token-authenticated tunnels.
    pub fn reapable_tunnels(&self) -> CommandSignature {
        self.tunnel.clone().excluding(&self.token_marker)
    }

    /// Whether `command` is a process this tool may have started.
    pub fn owns(&self, command: &str) -> bool {
        self.launcher.matches(command) || self.tunnel.matches(command)
    }
}

/// Poll until none of `pids` is running or `timeout` elapses.
///
/// Returns the pids still running. When the table cannot be read at all
/// every pid is reported as a survivor.
pub(crate) fn wait_for_exit(
    table: &dyn ProcessTable,
    pids: &[ProcessId],
    timeout: Duration,
    poll_interval: Duration,
) -> Vec<ProcessId> {
    if pids.is_empty() {
        return Vec::new();
    }

    let start = Instant::now();
    loop {
        let survivors = match table.snapshot() {
            Ok(entries) => {
                let snapshot = ProcessSnapshot::new(entries);
                pids.iter()
                    .copied()
                    .filter(|pid| snapshot.contains(*pid))
                    .collect::<Vec<_>>()
            }
            Err(e) => {
                tracing::debug!(error = %e, "process table unreadable while waiting");
                pids.to_vec()
            }
        };

        let elapsed = start.elapsed();
        if survivors.is_empty() || elapsed >= timeout {
            return survivors;
        }
        thread::sleep(poll_interval.min(timeout - elapsed));
    }
}

/// SIGTERM every pid, wait out the grace period, SIGKILL whatever is left.
///
/// Returns the pids that were still running after the forceful round.
pub(crate) fn escalate(
    table: &dyn ProcessTable,
    terminator: &Terminator<'_>,
    policy: &KillPolicy,
    pids: &[ProcessId],
    transcript: &mut Transcript,
) -> Vec<ProcessId> {
    if pids.is_empty() {
        return Vec::new();
    }

    for pid in pids {
        transcript.attempt(&terminator.terminate(*pid, SignalKind::Graceful));
    }

    let remaining = wait_for_exit(table, pids, policy.grace, policy.poll_interval);
    if remaining.is_empty() {
        return remaining;
    }

    transcript.info(format!(
        "{} process(es) still running after {}ms grace period",
        remaining.len(),
        policy.grace.as_millis()
    ));
    for pid in &remaining {
        transcript.attempt(&terminator.terminate(*pid, SignalKind::Forceful));
    }

    wait_for_exit(table, &remaining, policy.settle, policy.poll_interval)
}
