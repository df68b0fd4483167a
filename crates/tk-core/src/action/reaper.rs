//! Bulk reaping of every quick tunnel on the machine.
//!
//! Used when no tunnel name is given. Tunnel binaries go first, then the
//! launcher processes that supervised them. Token-authenticated tunnels
//! are long-lived infrastructure and are never touched.

use super::transcript::Transcript;
use super::{escalate, KillPolicy, Signaller, Terminator};
use crate::collect::{ProcessInspector, ProcessTable};
use serde::Serialize;
use tk_common::ProcessId;
use tracing::info_span;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReapReport {
    pub transcript: Transcript,
    /// Tunnel-binary pids selected.
    pub tunnels: Vec<ProcessId>,
    /// Launcher pids selected.
    pub launchers: Vec<ProcessId>,
    /// Token tunnels left running.
    pub skipped: Vec<ProcessId>,
    /// Targeted pids still running at the end.
    pub survivors: Vec<ProcessId>,
}

impl ReapReport {
    pub fn is_complete(&self) -> bool {
        self.survivors.is_empty()
    }

    pub fn targeted_count(&self) -> usize {
        self.tunnels.len() + self.launchers.len()
    }
}

pub struct BulkReaper<'a> {
    table: &'a dyn ProcessTable,
    terminator: Terminator<'a>,
    policy: &'a KillPolicy,
}

impl<'a> BulkReaper<'a> {
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

    /// Terminate every non-token tunnel process, then every launcher.
    ///
    /// Finding nothing is a normal outcome.
    pub fn reap_all(&self) -> ReapReport {
        let _span = info_span!("reap_all").entered();
        let mut report = ReapReport::default();
        let inspector = ProcessInspector::new(self.table);

        match inspector.snapshot() {
            Ok(snapshot) => {
                let reapable = self.policy.reapable_tunnels();
                for entry in snapshot.matching_signature(&self.policy.tunnel) {
                    if reapable.matches(&entry.command) {
                        report.tunnels.push(entry.pid);
                    } else {
                        report.skipped.push(entry.pid);
                        report.transcript.info(format!(
                            "skipping token tunnel pid {}",
                            entry.pid
                        ));
                    }
                }
            }
            Err(e) => report
                .transcript
                .warn(format!("cannot read the process table: {}", e)),
        }

        if report.tunnels.is_empty() {
            report.transcript.info("no tunnel processes found");
        } else {
            report.transcript.info(format!(
                "stopping {} tunnel process(es)",
                report.tunnels.len()
            ));
        }
        let mut survivors = escalate(
            self.table,
            &self.terminator,
            self.policy,
            &report.tunnels,
            &mut report.transcript,
        );

        // Re-read: launchers whose tunnel died may already have exited.
        match inspector.snapshot() {
            Ok(snapshot) => {
                report.launchers = snapshot
                    .matching_signature(&self.policy.launcher)
                    .into_iter()
                    .map(|e| e.pid)
                    .collect();
            }
            Err(e) => report
                .transcript
                .warn(format!("cannot read the process table: {}", e)),
        }

        if !report.launchers.is_empty() {
            report.transcript.info(format!(
                "stopping {} launcher process(es)",
                report.launchers.len()
            ));
            survivors.extend(escalate(
                self.table,
                &self.terminator,
                self.policy,
                &report.launchers,
                &mut report.transcript,
            ));
        }

        if !survivors.is_empty() {
            let pids: Vec<String> = survivors.iter().map(|p| p.to_string()).collect();
            report.transcript.warn(format!(
                "{} process(es) survived: {}",
                survivors.len(),
                pids.join(", ")
            ));
        }
        report.survivors = survivors;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::SignalKind;
    use crate::test_utils::{fast_policy, FakeSystem};

    #[test]
    fn reaps_quick_tunnels_and_launchers_but_not_token_tunnels() {
        let system = FakeSystem::new();
        system.spawn(10, 1, "tk-core supervise --name web");
        system.spawn(11, 10, "cloudflared tunnel --url http://localhost:3000");
        system.spawn(12, 1, "cloudflared tunnel --url http://localhost:4000");
        system.spawn(13, 1, "cloudflared tunnel run --token eyJhIjoiYWJj");
        let policy = fast_policy();

        let report = BulkReaper::new(&system, &system, &policy).reap_all();

        assert!(report.is_complete());
        assert_eq!(report.tunnels, vec![ProcessId(11), ProcessId(12)]);
        assert_eq!(report.launchers, vec![ProcessId(10)]);
        assert_eq!(report.skipped, vec![ProcessId(13)]);
        assert!(system.is_running(13));
        assert!(!system.signals().iter().any(|(pid, _)| *pid == ProcessId(13)));
    }

    #[test]
    fn nothing_to_reap_is_not_an_error() {
        let system = FakeSystem::new();
        system.spawn(20, 1, "node server.js");
        let policy = fast_policy();

        let report = BulkReaper::new(&system, &system, &policy).reap_all();

        assert!(report.is_complete());
        assert_eq!(report.targeted_count(), 0);
        assert!(system.signals().is_empty());
        assert!(report.transcript.to_string().contains("no tunnel processes found"));
    }

    #[test]
    fn stubborn_tunnel_gets_one_forceful_signal() {
        let system = FakeSystem::new();
        system.spawn(30, 1, "cloudflared tunnel --url http://localhost:3000");
        system.set_ignores_graceful(30);
        let policy = fast_policy();

        let report = BulkReaper::new(&system, &system, &policy).reap_all();

        assert!(report.is_complete());
        let forceful = system
            .signals()
            .into_iter()
            .filter(|(pid, kind)| *pid == ProcessId(30) && *kind == SignalKind::Forceful)
            .count();
        assert_eq!(forceful, 1);
    }
}
