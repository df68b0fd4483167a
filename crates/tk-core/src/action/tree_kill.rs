//! Stop a single tunnel and the processes it spawned.
//!
//! A tunnel started by this tool is a launcher process with the tunnel
//! binary as a child. Children are captured from one snapshot taken before
//! any signal is sent, so killing the launcher first cannot orphan the
//! tunnel binary out of reach. A recorded pid is only signalled when the
//! live command line still belongs to this tunnel: pids get reused, and
//! the new owner may be another tunnel's launcher.

use super::transcript::Transcript;
use super::{escalate, KillPolicy, Signaller, Terminator};
use crate::collect::{
    exposes_address, flag_value, normalize_address, ProcessInspector, ProcessTable,
};
use serde::Serialize;
use tk_common::ProcessId;
use tracing::{debug, info_span};

/// What to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillTarget {
    pub name: String,
    pub process_id: Option<ProcessId>,
    pub local_address: String,
}

/// Outcome of a tree kill.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KillReport {
    pub transcript: Transcript,
    /// Every pid selected for termination.
    pub targeted: Vec<ProcessId>,
    /// Pids still running after SIGKILL.
    pub survivors: Vec<ProcessId>,
    /// Targets were found by local address rather than by pid.
    pub matched_by_address: bool,
    /// The process table could not be read; nothing was signalled.
    pub inspection_failed: bool,
}

impl KillReport {
    /// Everything targeted is gone and the table was readable.
    pub fn is_complete(&self) -> bool {
        !self.inspection_failed && self.survivors.is_empty()
    }
}

pub struct TreeKiller<'a> {
    table: &'a dyn ProcessTable,
    terminator: Terminator<'a>,
    policy: &'a KillPolicy,
}

impl<'a> TreeKiller<'a> {
    pub fn new(
        table: &'a dyn ProcessTable,
        signaller: &'a dyn Signaller,
        policy: &'a KillPolicy,
    ) -> Self {
        Self {
            table,
            terminator: Terminator::new(signaller),
            policy,
        }
    }

    pub fn kill(&self, target: &KillTarget) -> KillReport {
        let _span = info_span!("tree_kill", name = %target.name).entered();
        let mut report = KillReport::default();
        report.transcript.info(format!(
            "stopping tunnel '{}' ({})",
            target.name,
            normalize_address(&target.local_address)
        ));

        let snapshot = match ProcessInspector::new(self.table).snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.inspection_failed = true;
                report
                    .transcript
                    .warn(format!("cannot read the process table: {}; nothing was signalled", e));
                return report;
            }
        };

        let mut targets = Vec::new();
        if let Some(pid) = target.process_id {
            match snapshot.get(pid) {
                Some(entry) if self.belongs_to(&entry.command, target) => {
                    targets.push(pid);
                    for child in snapshot.children_of(pid) {
                        if self.policy.tunnel.matches(&child.command) {
                            targets.push(child.pid);
                        } else {
                            report.transcript.info(format!(
                                "leaving child pid {} alone: {}",
                                child.pid, child.command
                            ));
                        }
                    }
                }
                Some(entry) if self.policy.owns(&entry.command) => {
                    report.transcript.warn(format!(
                        "pid {} now belongs to another tunnel ('{}'); not signalling it",
                        pid, entry.command
                    ))
                }
                Some(entry) => report.transcript.warn(format!(
                    "pid {} now runs '{}', not a tunnel process; not signalling it",
                    pid, entry.command
                )),
                None => report
                    .transcript
                    .info(format!("pid {} is no longer running", pid)),
            }
        }

        // No usable pid: fall back to the exact local address on tunnel command lines.
        if targets.is_empty() {
            let address = normalize_address(&target.local_address);
            let by_address: Vec<ProcessId> = snapshot
                .matching_signature(&self.policy.tunnel)
                .into_iter()
                .filter(|e| exposes_address(&e.command, &address))
                .map(|e| e.pid)
                .collect();

            if by_address.is_empty() {
                report
                    .transcript
                    .info(format!("no running tunnel process exposes {}", address));
            } else {
                report.matched_by_address = true;
                report.transcript.warn(format!(
                    "matched {} process(es) by local address {} only; any other tunnel exposing it is stopped too",
                    by_address.len(),
                    address
                ));
                targets.extend(by_address);
            }
        }

        debug!(targets = ?targets, "tree kill targets");
        report.survivors = escalate(
            self.table,
            &self.terminator,
            self.policy,
            &targets,
            &mut report.transcript,
        );
        report.targeted = targets;

        if !report.survivors.is_empty() {
            let pids: Vec<String> = report.survivors.iter().map(|p| p.to_string()).collect();
            report.transcript.warn(format!(
                "partial kill: pid(s) {} still running after SIGKILL",
                pids.join(", ")
            ));
        }

        report
    }

    /// Whether `command` is the launcher or tunnel binary of `target`.
    ///
    /// Launchers are identified by `--name` or `--local-address`, tunnel
    /// binaries by the exact local address they expose.
    fn belongs_to(&self, command: &str, target: &KillTarget) -> bool {
        if self.policy.launcher.matches(command) {
            let wanted = normalize_address(&target.local_address);
            return flag_value(command, "--name") == Some(target.name.as_str())
                || flag_value(command, "--local-address")
                    .is_some_and(|a| normalize_address(a) == wanted);
        }
        self.policy.tunnel.matches(command) && exposes_address(command, &target.local_address)
    }
}
