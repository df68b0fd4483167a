//! Reconciliation of the registry against live tunnel processes.
//!
//! Tunnels started outside our bookkeeping (or whose launcher crashed
//! before saving) are absorbed as auto-detected records. Records are never
//! deleted here: a record without a live process may still be starting.

use crate::action::KillPolicy;
use crate::collect::{extract_local_address, normalize_address, port_of, ProcessSnapshot};
use crate::launch::PublicUrlMatcher;
use crate::registry::{TunnelOrigin, TunnelRecord, TunnelRegistry};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Live tunnel processes with an identifiable local address.
    pub examined: usize,
    /// Names of auto-detected records added.
    pub created: Vec<String>,
    /// Names of records whose public address was filled in.
    pub backfilled: Vec<String>,
    pub saved: bool,
}

/// Fold live tunnel processes into `registry` and save it.
pub fn reconcile(
    registry: &mut TunnelRegistry,
    snapshot: &ProcessSnapshot,
    policy: &KillPolicy,
    matcher: &PublicUrlMatcher,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for entry in snapshot.matching_signature(&policy.tunnel) {
        let Some(local_address) = extract_local_address(&entry.command) else {
            continue;
        };
        report.examined += 1;
        let normalized = normalize_address(&local_address);
        let public_address = matcher.find(&entry.command);

        // Remote records describe processes on another machine.
        let existing = registry
            .entries()
            .find(|r| !r.is_remote && normalize_address(&r.local_address) == normalized)
            .map(|r| r.name.clone());

        match existing {
            Some(name) => {
                if let (Some(record), Some(url)) = (registry.get_mut(&name), public_address) {
                    if record.public_address.is_none() {
                        debug!(name = %name, url = %url, "backfilled public address");
                        record.public_address = Some(url);
                        report.backfilled.push(name);
                    }
                }
            }
            None => {
                let base = match port_of(&normalized) {
                    Some(port) => format!("auto-{}", port),
                    None => "auto-tunnel".to_string(),
                };
                let name = registry.unique_name(&base);
                let mut record = TunnelRecord::new(&name, &local_address, registry.host())
                    .with_origin(TunnelOrigin::AutoDetected);
                record.public_address = public_address;
                info!(name = %name, address = %normalized, pid = entry.pid.0, "absorbed untracked tunnel");
                registry.set(&name, record);
                report.created.push(name);
            }
        }
    }

    report.saved = registry.save();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{ProcessEntry, ProcessState};
    use tempfile::TempDir;
    use tk_common::ProcessId;
    use tk_config::TunnelSettings;

    fn process(pid: u32, command: &str) -> ProcessEntry {
        ProcessEntry {
            pid: ProcessId(pid),
            ppid: ProcessId(1),
            state: ProcessState::Sleeping,
            user: "dev".to_string(),
            command: command.to_string(),
        }
    }

    fn setup() -> (TempDir, TunnelRegistry, KillPolicy, PublicUrlMatcher) {
        let dir = TempDir::new().unwrap();
        let registry = TunnelRegistry::new(dir.path().join("tunnels.json"), "thishost");
        let settings = TunnelSettings::default();
        let policy = KillPolicy::from_settings(&settings);
        let matcher = PublicUrlMatcher::from_settings(&settings).unwrap();
        (dir, registry, policy, matcher)
    }

    #[test]
    fn absorbs_untracked_tunnel() {
        let (_dir, mut registry, policy, matcher) = setup();
        let snapshot = ProcessSnapshot::new(vec![process(
            500,
            "cloudflared tunnel --url http://localhost:4000",
        )]);

        let report = reconcile(&mut registry, &snapshot, &policy, &matcher);

        assert_eq!(report.created, vec!["auto-4000".to_string()]);
        let record = registry.get("auto-4000").unwrap();
        assert!(record.is_auto_detected());
        assert_eq!(record.host_identifier, "thishost");
        assert_eq!(record.process_id, None);
        assert!(report.saved);
        assert!(registry.path().exists());
    }

    #[test]
    fn matches_existing_record_across_spellings() {
        let (_dir, mut registry, policy, matcher) = setup();
        registry.set(
            "web",
            TunnelRecord::new("web", "http://localhost:3000/", "thishost"),
        );
        let snapshot = ProcessSnapshot::new(vec![process(
            501,
            "cloudflared tunnel --url localhost:3000 --label https://calm-sea.trycloudflare.com",
        )]);

        let report = reconcile(&mut registry, &snapshot, &policy, &matcher);

        assert!(report.created.is_empty());
        assert_eq!(report.backfilled, vec!["web".to_string()]);
        assert_eq!(
            registry.get("web").unwrap().public_address.as_deref(),
            Some("https://calm-sea.trycloudflare.com")
        );
    }

    #[test]
    fn never_deletes_and_never_overwrites_public_address() {
        let (_dir, mut registry, policy, matcher) = setup();
        let mut web = TunnelRecord::new("web", "localhost:3000", "thishost");
        web.public_address = Some("https://first.trycloudflare.com".to_string());
        registry.set("web", web);
        registry.set("idle", TunnelRecord::new("idle", "localhost:9999", "thishost"));
        let snapshot = ProcessSnapshot::new(vec![process(
            502,
            "cloudflared tunnel --url localhost:3000 https://second.trycloudflare.com",
        )]);

        let report = reconcile(&mut registry, &snapshot, &policy, &matcher);

        assert!(report.backfilled.is_empty());
        assert_eq!(registry.size(), 2);
        assert_eq!(
            registry.get("web").unwrap().public_address.as_deref(),
            Some("https://first.trycloudflare.com")
        );
    }

    #[test]
    fn remote_record_does_not_claim_local_process() {
        let (_dir, mut registry, policy, matcher) = setup();
        let mut remote = TunnelRecord::new("web", "localhost:3000", "otherhost");
        remote.is_remote = true;
        registry.set("web", remote);
        let snapshot = ProcessSnapshot::new(vec![process(
            503,
            "cloudflared tunnel --url localhost:3000",
        )]);

        let report = reconcile(&mut registry, &snapshot, &policy, &matcher);
        assert_eq!(report.created, vec!["auto-3000".to_string()]);
    }

    #[test]
    fn generated_names_are_unique() {
        let (_dir, mut registry, policy, matcher) = setup();
        registry.set(
            "auto-4000",
            TunnelRecord::new("auto-4000", "otherbox.local:4000", "thishost"),
        );
        let snapshot = ProcessSnapshot::new(vec![
            process(504, "cloudflared tunnel --url localhost:4000"),
            process(505, "cloudflared tunnel --url localhost:4000"),
            process(506, "cloudflared tunnel run --token abc"),
            process(507, "node server.js --url localhost:4000"),
        ]);

        let report = reconcile(&mut registry, &snapshot, &policy, &matcher);

        assert_eq!(report.examined, 2);
        assert_eq!(report.created, vec!["auto-4000-2".to_string()]);
        assert_eq!(registry.size(), 2);
    }
}
