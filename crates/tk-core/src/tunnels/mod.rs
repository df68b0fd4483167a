//! Tunnel lifecycle operations for front ends.
//!
//! Every operation reloads the registry first, since another invocation
//! may have changed the file, and ends with a save when it mutated
//! anything. Failures degrade to descriptive outcomes; nothing here
//! returns an error once the manager is built.

use crate::action::{BulkReaper, KillPolicy, ReapReport, Signaller, Transcript, TreeKiller};
use crate::collect::{
    exposes_address, port_of, ProcessInspector, ProcessSnapshot, ProcessTable,
};
use crate::launch::{LaunchHandle, LaunchRequest, PublicUrlMatcher, TunnelLauncher};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::registry::{TerminationHandle, TunnelOrigin, TunnelRecord, TunnelRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tk_common::ProcessId;
use tk_config::TunnelSettings;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Reason given when a start names an existing tunnel.
pub const ALREADY_RUNNING: &str = "already running";

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub accepted: bool,
    pub name: String,
    pub local_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StartOutcome {
    fn rejected(name: &str, local_address: &str, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            name: name.to_string(),
            local_address: local_address.to_string(),
            process_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// A start outcome plus the launch handle when accepted.
#[derive(Debug)]
pub struct Started {
    pub outcome: StartOutcome,
    pub handle: Option<LaunchHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DiscoveryOutcome {
    /// The tunnel printed its public address.
    Discovered { public_address: String },
    /// Output ended without a public address; the launch failed.
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopStatus {
    Stopped,
    NotFound,
    Refused,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub status: StopStatus,
    /// Human-readable log of every step.
    pub transcript: String,
    /// Records removed from the registry.
    pub stopped_count: usize,
    pub steps: Transcript,
}

impl StopOutcome {
    fn new(status: StopStatus, steps: Transcript, stopped_count: usize) -> Self {
        Self {
            status,
            transcript: steps.to_string(),
            stopped_count,
            steps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelStatus {
    /// Process alive and public address known.
    Running,
    /// Process alive, public address not yet printed.
    Starting,
    ProcessNotFound,
    /// Owned by another host; not inspected.
    Remote,
    /// Process table unreadable.
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSnapshot {
    pub name: String,
    pub local_address: String,
    pub public_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub process_id: Option<ProcessId>,
    pub host_identifier: String,
    pub is_remote: bool,
    pub is_auto_detected: bool,
    pub origin: TunnelOrigin,
    pub status: TunnelStatus,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSummary {
    /// Live tunnel-binary processes, token tunnels excluded.
    pub tunnel_processes: usize,
    pub token_tunnels: usize,
    pub launcher_processes: usize,
    pub tracked: usize,
    pub auto_detected: usize,
    pub remote: usize,
    pub process_table_available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutcome {
    pub tunnels: Vec<TunnelSnapshot>,
    pub summary: LiveSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileReport>,
}

// ============================================================================
// Manager
// ============================================================================

/// Front-end operations over one registry.
pub struct TunnelManager<'a> {
    registry: &'a mut TunnelRegistry,
    table: &'a dyn ProcessTable,
    signaller: &'a dyn Signaller,
    launcher: &'a dyn TunnelLauncher,
    policy: KillPolicy,
    matcher: PublicUrlMatcher,
}

impl<'a> TunnelManager<'a> {
    pub fn new(
        registry: &'a mut TunnelRegistry,
        table: &'a dyn ProcessTable,
        signaller: &'a dyn Signaller,
        launcher: &'a dyn TunnelLauncher,
        settings: &TunnelSettings,
    ) -> Result<Self, tk_common::Error> {
        Ok(Self {
            registry,
            table,
            signaller,
            launcher,
            policy: KillPolicy::from_settings(settings),
            matcher: PublicUrlMatcher::from_settings(settings)?,
        })
    }

    /// Replace the kill policy (signatures and timing).
    pub fn with_policy(mut self, policy: KillPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &TunnelRegistry {
        self.registry
    }

    /// Start a tunnel for `local_address`.
    ///
    /// Without a name one is generated from the port. The record is saved
    /// before launching so a fast-failing launch can find and remove it.
    pub fn start_tunnel(&mut self, name: Option<&str>, local_address: &str) -> Started {
        self.registry.load();

        if local_address.trim().is_empty() {
            return Started {
                outcome: StartOutcome::rejected(
                    name.unwrap_or_default(),
                    local_address,
                    "local address must not be empty",
                ),
                handle: None,
            };
        }

        let name = match name {
            Some(name) if self.registry.contains(name) => {
                info!(name, "start rejected: name in use");
                return Started {
                    outcome: StartOutcome::rejected(name, local_address, ALREADY_RUNNING),
                    handle: None,
                };
            }
            Some(name) => name.to_string(),
            None => self.registry.unique_name(&default_name(local_address)),
        };

        let record = TunnelRecord::new(&name, local_address, self.registry.host());
        self.registry.set(&name, record);
        let persisted = self.registry.save();

        let request = LaunchRequest {
            name: name.clone(),
            local_address: local_address.to_string(),
        };
        let handle = match self.launcher.launch(&request) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(name = %name, error = %e, "launch failed");
                if persisted {
                    self.registry.load();
                }
                self.registry.delete(&name);
                self.registry.save();
                return Started {
                    outcome: StartOutcome::rejected(&name, local_address, e.to_string()),
                    handle: None,
                };
            }
        };

        if persisted {
            self.registry.load();
        }
        if let Some(record) = self.registry.get_mut(&name) {
            record.process_id = handle.pid();
        }
        self.registry.save();
        info!(name = %name, pid = ?handle.pid(), "tunnel started");

        Started {
            outcome: StartOutcome {
                accepted: true,
                name,
                local_address: local_address.to_string(),
                process_id: handle.pid(),
                reason: None,
            },
            handle: Some(handle),
        }
    }

    /// Read launch output until the public address appears or output ends.
    ///
    /// Discovery sets the address on the record if it is still unset. Output
    /// ending first counts as a failed launch and removes the record unless
    /// it already has an address.
    pub fn watch_launch(&mut self, name: &str, handle: &mut LaunchHandle) -> DiscoveryOutcome {
        match self.matcher.scan(handle.lines()) {
            Some(url) => {
                self.registry.load();
                match self.registry.get_mut(name) {
                    Some(record) if record.public_address.is_none() => {
                        info!(name, url = %url, "public address discovered");
                        record.public_address = Some(url.clone());
                        self.registry.save();
                    }
                    Some(_) => debug!(name, "public address already recorded"),
                    None => debug!(name, "record removed before discovery; not recreating"),
                }
                DiscoveryOutcome::Discovered {
                    public_address: url,
                }
            }
            None => {
                self.registry.load();
                let failed = self
                    .registry
                    .get(name)
                    .is_some_and(|r| r.public_address.is_none());
                if failed {
                    warn!(name, "tunnel exited without a public address; removing record");
                    self.registry.delete(name);
                    self.registry.save();
                }
                DiscoveryOutcome::Exited
            }
        }
    }

    /// Stop one tunnel, or every local tunnel when `name` is `None`.
    pub fn stop_tunnel(&mut self, name: Option<&str>) -> StopOutcome {
        match name {
            Some(name) => self.stop_named(name),
            None => self.stop_all(),
        }
    }

    fn stop_named(&mut self, name: &str) -> StopOutcome {
        self.registry.load();
        let mut steps = Transcript::new();

        let Some(record) = self.registry.get(name) else {
            steps.info(format!("no tunnel named '{}'", name));
            return StopOutcome::new(StopStatus::NotFound, steps, 0);
        };

        let target = match record.termination_handle() {
            TerminationHandle::Local(target) => target,
            TerminationHandle::Remote { host, .. } => {
                steps.warn(format!(
                    "refusing to stop '{}': it runs on host '{}', not '{}'",
                    name,
                    host,
                    self.registry.host()
                ));
                return StopOutcome::new(StopStatus::Refused, steps, 0);
            }
        };

        let report = TreeKiller::new(self.table, self.signaller, &self.policy).kill(&target);
        let complete = report.is_complete();
        steps.extend(report.transcript);

        // The supervisor may have rewritten the file while dying.
        self.registry.load();
        if complete {
            self.registry.delete(name);
            self.registry.save();
            steps.info(format!("removed '{}' from the registry", name));
            StopOutcome::new(StopStatus::Stopped, steps, 1)
        } else {
            steps.warn(format!("kept '{}' in the registry", name));
            StopOutcome::new(StopStatus::Partial, steps, 0)
        }
    }

    fn stop_all(&mut self) -> StopOutcome {
        let reap = self.reap();
        let complete = reap.is_complete();
        let mut steps = reap.transcript;

        self.registry.load();
        let local: Vec<String> = self
            .registry
            .entries()
            .filter(|r| !r.is_remote)
            .map(|r| r.name.clone())
            .collect();
        for name in &local {
            self.registry.delete(name);
        }
        let remote = self.registry.size();
        self.registry.save();

        steps.info(format!(
            "removed {} local record(s); kept {} remote record(s)",
            local.len(),
            remote
        ));
        let status = if complete {
            StopStatus::Stopped
        } else {
            StopStatus::Partial
        };
        StopOutcome::new(status, steps, local.len())
    }

    /// Bulk-reap tunnel processes without touching the registry.
    pub fn reap(&self) -> ReapReport {
        BulkReaper::new(self.table, self.signaller, &self.policy).reap_all()
    }

    /// Reconcile, then report every record with its live status.
    pub fn list_tunnels(&mut self) -> ListOutcome {
        self.registry.load();

        let snapshot = match ProcessInspector::new(self.table).snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "process table unavailable; skipping reconciliation");
                None
            }
        };

        let reconciliation = snapshot
            .as_ref()
            .map(|s| reconcile(self.registry, s, &self.policy, &self.matcher));

        let now = Utc::now();
        let tunnels = self
            .registry
            .entries()
            .map(|record| TunnelSnapshot {
                name: record.name.clone(),
                local_address: record.local_address.clone(),
                public_address: record.public_address.clone(),
                created_at: record.created_at,
                process_id: record.process_id,
                host_identifier: record.host_identifier.clone(),
                is_remote: record.is_remote,
                is_auto_detected: record.is_auto_detected(),
                origin: record.origin,
                status: self.status_of(record, snapshot.as_ref()),
                uptime_secs: (now - record.created_at).num_seconds().max(0),
            })
            .collect::<Vec<_>>();

        let summary = self.summarize(&tunnels, snapshot.as_ref());
        ListOutcome {
            tunnels,
            summary,
            reconciliation,
        }
    }

    fn status_of(&self, record: &TunnelRecord, snapshot: Option<&ProcessSnapshot>) -> TunnelStatus {
        if record.is_remote {
            return TunnelStatus::Remote;
        }
        let Some(snapshot) = snapshot else {
            return TunnelStatus::Unknown;
        };

        let alive = match record.process_id {
            Some(pid) => snapshot.contains(pid),
            None => snapshot
                .matching_signature(&self.policy.tunnel)
                .iter()
                .any(|e| exposes_address(&e.command, &record.local_address)),
        };

        match (alive, record.public_address.is_some()) {
            (false, _) => TunnelStatus::ProcessNotFound,
            (true, true) => TunnelStatus::Running,
            (true, false) => TunnelStatus::Starting,
        }
    }

    fn summarize(&self, tunnels: &[TunnelSnapshot], snapshot: Option<&ProcessSnapshot>) -> LiveSummary {
        let mut summary = LiveSummary {
            tracked: tunnels.len(),
            auto_detected: tunnels.iter().filter(|t| t.is_auto_detected).count(),
            remote: tunnels.iter().filter(|t| t.is_remote).count(),
            ..LiveSummary::default()
        };
        if let Some(snapshot) = snapshot {
            let all = snapshot.matching_signature(&self.policy.tunnel).len();
            summary.tunnel_processes = snapshot
                .matching_signature(&self.policy.reapable_tunnels())
                .len();
            summary.token_tunnels = all - summary.tunnel_processes;
            summary.launcher_processes = snapshot.matching_signature(&self.policy.launcher).len();
            summary.process_table_available = true;
        }
        summary
    }
}

/// `tunnel-<port>`, or `tunnel` when the address has no port.
fn default_name(local_address: &str) -> String {
    match port_of(local_address) {
        Some(port) => format!("tunnel-{}", port),
        None => "tunnel".to_string(),
    }
}
