//! The detached process that owns one tunnel binary.
//!
//! `tk-core start` records the tunnel and spawns `tk-core supervise`, then
//! returns. The supervisor launches the binary, writes the public address
//! into the registry once the binary prints it, and keeps reading output
//! until the binary exits so the binary never blocks on a full pipe.

use crate::action::Signaller;
use crate::collect::ProcessTable;
use crate::launch::{LaunchRequest, TunnelLauncher};
use crate::registry::{TunnelRecord, TunnelRegistry};
use crate::tunnels::{DiscoveryOutcome, TunnelManager};
use serde::Serialize;
use tk_common::ProcessId;
use tk_config::TunnelSettings;
use tracing::{info, info_span, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorReport {
    pub name: String,
    pub discovery: DiscoveryOutcome,
    /// Exit code of the tunnel binary, when it exited normally.
    pub exit_code: Option<i32>,
}

/// Everything the supervisor needs besides the registry.
pub struct Supervisor<'a> {
    pub table: &'a dyn ProcessTable,
    pub signaller: &'a dyn Signaller,
    pub launcher: &'a dyn TunnelLauncher,
    pub settings: &'a TunnelSettings,
}

impl Supervisor<'_> {
    /// Run the tunnel `name` for `local_address` until its binary exits.
    ///
    /// A record missing at startup (supervisor run by hand) is created and
    /// owned by this process. A failed launch removes the record unless it
    /// already carries a public address.
    pub fn run(
        &self,
        registry: &mut TunnelRegistry,
        name: &str,
        local_address: &str,
    ) -> Result<SupervisorReport, tk_common::Error> {
        let _span = info_span!("supervise", name).entered();

        registry.load();
        if !registry.contains(name) {
            info!("no record yet; adopting");
            let record = TunnelRecord::new(name, local_address, registry.host())
                .with_process_id(ProcessId::current());
            registry.set(name, record);
            registry.save();
        }

        let request = LaunchRequest {
            name: name.to_string(),
            local_address: local_address.to_string(),
        };
        let mut handle = match self.launcher.launch(&request) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "tunnel binary failed to start");
                registry.load();
                if registry
                    .get(name)
                    .is_some_and(|r| r.public_address.is_none())
                {
                    registry.delete(name);
                    registry.save();
                }
                return Err(e.into());
            }
        };

        let discovery = {
            let mut manager = TunnelManager::new(
                registry,
                self.table,
                self.signaller,
                self.launcher,
                self.settings,
            )?;
            manager.watch_launch(name, &mut handle)
        };

        let exit_code = handle.wait().and_then(|status| status.code());
        info!(?exit_code, "tunnel binary exited");

        Ok(SupervisorReport {
            name: name.to_string(),
            discovery,
            exit_code,
        })
    }
}
