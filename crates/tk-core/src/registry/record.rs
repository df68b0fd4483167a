//! Tunnel records as stored in the registry file.

use crate::action::KillTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tk_common::ProcessId;

/// How a record entered the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelOrigin {
    /// Started through this tool.
    #[default]
    Explicit,
    /// Synthesized by reconciliation from a running process.
    AutoDetected,
}

/// One tunnel.
///
/// Serialized with camelCase keys; the file is shared with other
/// implementations of the same registry format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    pub name: String,

    /// Local endpoint the tunnel exposes, as given at start.
    pub local_address: String,

    /// Public address, once the tunnel binary has printed it.
    #[serde(default)]
    pub public_address: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Launcher process; `None` for records found by reconciliation.
    #[serde(default)]
    pub process_id: Option<ProcessId>,

    /// Host that owns the tunnel.
    pub host_identifier: String,

    #[serde(default)]
    pub origin: TunnelOrigin,

    /// Set on load when `host_identifier` is not this host. Never persisted.
    #[serde(skip)]
    pub is_remote: bool,
}

impl TunnelRecord {
    pub fn new(name: &str, local_address: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            local_address: local_address.to_string(),
            public_address: None,
            created_at: Utc::now(),
            process_id: None,
            host_identifier: host.to_string(),
            origin: TunnelOrigin::Explicit,
            is_remote: false,
        }
    }

    pub fn with_process_id(mut self, pid: ProcessId) -> Self {
        self.process_id = Some(pid);
        self
    }

    pub fn with_origin(mut self, origin: TunnelOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_auto_detected(&self) -> bool {
        self.origin == TunnelOrigin::AutoDetected
    }

    /// How this tunnel can be terminated from the current host.
    ///
    /// Computed on demand so it always reflects the current `is_remote` and
    /// `process_id`.
    pub fn termination_handle(&self) -> TerminationHandle {
        if self.is_remote {
            TerminationHandle::Remote {
                name: self.name.clone(),
                host: self.host_identifier.clone(),
            }
        } else {
            TerminationHandle::Local(KillTarget {
                name: self.name.clone(),
                process_id: self.process_id,
                local_address: self.local_address.clone(),
            })
        }
    }
}

/// Capability to terminate a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationHandle {
    /// Runs on this host; stop via the tree killer.
    Local(KillTarget),
    /// Runs elsewhere; no signal can reach it from here.
    Remote { name: String, host: String },
}

impl TerminationHandle {
    /// The kill target, or an explanation of why there is none.
    pub fn local_target(&self) -> Result<&KillTarget, tk_common::Error> {
        match self {
            TerminationHandle::Local(target) => Ok(target),
            TerminationHandle::Remote { name, host } => Err(tk_common::Error::RemoteRefused {
                name: name.clone(),
                host: host.clone(),
            }),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, TerminationHandle::Remote { .. })
    }
}
