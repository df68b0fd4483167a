use super::*;
use crate::action::SignalKind;
use crate::test_utils::{fast_policy, test_settings, FakeSystem, ScriptedLauncher};
use tempfile::TempDir;

const THIS_HOST: &str = "thishost";

struct Fixture {
    dir: TempDir,
    system: FakeSystem,
    registry: TunnelRegistry,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let registry = TunnelRegistry::new(dir.path().join("tunnels.json"), THIS_HOST);
        Self {
            dir,
            system: FakeSystem::new(),
            registry,
        }
    }

    fn manager<'a>(&'a mut self, launcher: &'a ScriptedLauncher) -> TunnelManager<'a> {
        TunnelManager::new(
            &mut self.registry,
            &self.system,
            &self.system,
            launcher,
            &test_settings(),
        )
        .unwrap()
        .with_policy(fast_policy())
    }

    /// Write records straight to the file, as another invocation would.
    fn seed(&self, records: &[TunnelRecord]) {
        let json = serde_json::to_string_pretty(records).unwrap();
        std::fs::write(self.dir.path().join("tunnels.json"), json).unwrap();
    }

    fn reload(&self) -> TunnelRegistry {
        let mut registry = TunnelRegistry::new(self.dir.path().join("tunnels.json"), THIS_HOST);
        registry.load();
        registry
    }
}

fn record(name: &str, address: &str, host: &str) -> TunnelRecord {
    TunnelRecord::new(name, address, host)
}

// ============================================================================
// start / discovery
// ============================================================================

#[test]
fn start_on_empty_registry_creates_record() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::new(4242, &[]);

    let started = fx
        .manager(&launcher)
        .start_tunnel(Some("web"), "http://localhost:3000");

    assert!(started.outcome.accepted);
    assert_eq!(started.outcome.reason, None);
    assert!(started.handle.is_some());
    let saved = fx.reload();
    let web = saved.get("web").unwrap();
    assert_eq!(web.public_address, None);
    assert_eq!(web.process_id, Some(ProcessId(4242)));
    assert_eq!(web.origin, TunnelOrigin::Explicit);
    assert_eq!(launcher.launches().len(), 1);
}

#[test]
fn discovery_sets_public_address() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::new(
        4242,
        &[
            "INF Requesting new quick tunnel",
            "INF Your tunnel: https://abc123.example-tunnel.com",
            "INF Registered connection",
        ],
    );
    let mut manager = fx.manager(&launcher);

    let started = manager.start_tunnel(Some("web"), "http://localhost:3000");
    let mut handle = started.handle.unwrap();
    let outcome = manager.watch_launch("web", &mut handle);

    assert_eq!(
        outcome,
        DiscoveryOutcome::Discovered {
            public_address: "https://abc123.example-tunnel.com".to_string()
        }
    );
    assert_eq!(
        manager.registry().get("web").unwrap().public_address.as_deref(),
        Some("https://abc123.example-tunnel.com")
    );
    assert_eq!(
        fx.reload().get("web").unwrap().public_address.as_deref(),
        Some("https://abc123.example-tunnel.com")
    );
}

#[test]
fn duplicate_start_is_rejected() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::new(4242, &[]);
    let mut manager = fx.manager(&launcher);

    assert!(manager.start_tunnel(Some("web"), "http://localhost:3000").outcome.accepted);
    let again = manager.start_tunnel(Some("web"), "http://localhost:3001");

    assert!(!again.outcome.accepted);
    assert_eq!(again.outcome.reason.as_deref(), Some(ALREADY_RUNNING));
    assert!(again.handle.is_none());
    assert_eq!(manager.registry().size(), 1);
    assert_eq!(
        manager.registry().get("web").unwrap().local_address,
        "http://localhost:3000"
    );
    assert_eq!(launcher.launches().len(), 1);
}

#[test]
fn exit_without_address_removes_record() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::new(4242, &["ERR failed to bind", "ERR exiting"]);
    let mut manager = fx.manager(&launcher);

    let mut handle = manager
        .start_tunnel(Some("web"), "localhost:3000")
        .handle
        .unwrap();
    assert_eq!(manager.watch_launch("web", &mut handle), DiscoveryOutcome::Exited);
    assert!(manager.registry().get("web").is_none());
    assert!(fx.reload().get("web").is_none());
}

#[test]
fn failed_launch_is_rejected_and_leaves_no_record() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::failing("cloudflared");

    let started = fx.manager(&launcher).start_tunnel(Some("web"), "localhost:3000");

    assert!(!started.outcome.accepted);
    assert!(started.outcome.reason.unwrap().contains("cloudflared"));
    assert!(fx.reload().get("web").is_none());
}

#[test]
fn generated_names_follow_the_port() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::new(10, &[]);
    let mut manager = fx.manager(&launcher);

    let first = manager.start_tunnel(None, "http://localhost:8080");
    let second = manager.start_tunnel(None, "http://localhost:8080");

    assert_eq!(first.outcome.name, "tunnel-8080");
    assert_eq!(second.outcome.name, "tunnel-8080-2");
}

#[test]
fn late_discovery_does_not_overwrite_or_resurrect() {
    let mut fx = Fixture::new();
    let mut web = record("web", "localhost:3000", THIS_HOST);
    web.public_address = Some("https://first.example-tunnel.com".to_string());
    fx.seed(&[web]);
    let launcher = ScriptedLauncher::new(1, &[]);
    let mut manager = fx.manager(&launcher);

    let mut handle = LaunchHandle::new(
        None,
        Box::new(vec!["https://second.example-tunnel.com".to_string()].into_iter()),
    );
    manager.watch_launch("web", &mut handle);
    let mut handle = LaunchHandle::new(
        None,
        Box::new(vec!["https://ghost.example-tunnel.com".to_string()].into_iter()),
    );
    manager.watch_launch("ghost", &mut handle);

    assert_eq!(
        manager.registry().get("web").unwrap().public_address.as_deref(),
        Some("https://first.example-tunnel.com")
    );
    assert!(manager.registry().get("ghost").is_none());
}

// ============================================================================
// stop
// ============================================================================

#[test]
fn stop_kills_tree_and_removes_record() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "http://localhost:3000", THIS_HOST).with_process_id(ProcessId(100))]);
    fx.system
        .spawn(100, 1, "tk-core supervise --name web --local-address http://localhost:3000");
    fx.system
        .spawn(101, 100, "cloudflared tunnel --url http://localhost:3000");
    fx.system
        .spawn(200, 1, "cloudflared tunnel --url http://localhost:3001");
    let launcher = ScriptedLauncher::default();

    let outcome = fx.manager(&launcher).stop_tunnel(Some("web"));

    assert_eq!(outcome.status, StopStatus::Stopped);
    assert_eq!(outcome.stopped_count, 1);
    assert!(outcome.transcript.contains("SIGTERM -> pid 100"));
    assert!(outcome.transcript.contains("SIGTERM -> pid 101"));
    assert!(fx.system.is_running(200));
    assert!(fx.reload().get("web").is_none());
}

#[test]
fn stop_twice_reports_not_found() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "localhost:3000", THIS_HOST)]);
    let launcher = ScriptedLauncher::default();
    let mut manager = fx.manager(&launcher);

    assert_eq!(manager.stop_tunnel(Some("web")).status, StopStatus::Stopped);
    let second = manager.stop_tunnel(Some("web"));
    let third = manager.stop_tunnel(Some("web"));

    assert_eq!(second.status, StopStatus::NotFound);
    assert_eq!(third.status, StopStatus::NotFound);
    assert_eq!(third.stopped_count, 0);
}

#[test]
fn remote_stop_is_refused_without_signals() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "localhost:3000", "otherhost").with_process_id(ProcessId(100))]);
    fx.system.spawn(100, 1, "tk-core supervise --name web");
    let launcher = ScriptedLauncher::default();
    let mut manager = fx.manager(&launcher);

    let outcome = manager.stop_tunnel(Some("web"));

    assert_eq!(outcome.status, StopStatus::Refused);
    assert_eq!(outcome.stopped_count, 0);
    assert!(outcome.transcript.contains("otherhost"));
    assert!(manager.registry().get("web").is_some());
    assert!(fx.system.signals().is_empty());
    assert!(fx.system.is_running(100));
}

#[test]
fn partial_kill_keeps_record() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "localhost:3000", THIS_HOST).with_process_id(ProcessId(100))]);
    fx.system.spawn(100, 1, "tk-core supervise --name web");
    fx.system.set_unkillable(100);
    let launcher = ScriptedLauncher::default();

    let outcome = fx.manager(&launcher).stop_tunnel(Some("web"));

    assert_eq!(outcome.status, StopStatus::Partial);
    assert_eq!(outcome.stopped_count, 0);
    assert!(outcome.transcript.contains("partial kill"));
    assert!(fx.reload().get("web").is_some());
}

#[test]
fn stop_without_pid_matches_exact_address_and_warns() {
    let mut fx = Fixture::new();
    fx.seed(&[record("auto-3000", "localhost:3000", THIS_HOST).with_origin(TunnelOrigin::AutoDetected)]);
    fx.system
        .spawn(300, 1, "cloudflared tunnel --url http://localhost:3000");
    fx.system
        .spawn(301, 1, "cloudflared tunnel --url http://localhost:30001");
    let launcher = ScriptedLauncher::default();

    let outcome = fx.manager(&launcher).stop_tunnel(Some("auto-3000"));

    assert_eq!(outcome.status, StopStatus::Stopped);
    assert!(outcome.steps.warnings().count() >= 1);
    assert!(!fx.system.is_running(300));
    assert!(fx.system.is_running(301));
    assert!(!fx
        .system
        .signals()
        .iter()
        .any(|(pid, _)| *pid == ProcessId(301)));
}

#[test]
fn stop_all_removes_local_records_and_keeps_remote() {
    let mut fx = Fixture::new();
    fx.seed(&[
        record("web", "localhost:3000", THIS_HOST).with_process_id(ProcessId(100)),
        record("api", "localhost:4000", THIS_HOST),
        record("shared", "localhost:5000", "otherhost"),
    ]);
    fx.system.spawn(100, 1, "tk-core supervise --name web");
    fx.system
        .spawn(101, 100, "cloudflared tunnel --url localhost:3000");
    fx.system
        .spawn(150, 1, "cloudflared tunnel --url localhost:4000");
    fx.system
        .spawn(160, 1, "cloudflared tunnel run --token eyJhIjoi");
    let launcher = ScriptedLauncher::default();
    let mut manager = fx.manager(&launcher);

    let outcome = manager.stop_tunnel(None);

    assert_eq!(outcome.stopped_count, 2);
    assert_eq!(outcome.status, StopStatus::Stopped);
    assert_eq!(manager.registry().size(), 1);
    let shared = manager.registry().get("shared").unwrap();
    assert!(shared.is_remote);
    assert_eq!(shared.host_identifier, "otherhost");
    assert!(!fx.system.is_running(100));
    assert!(!fx.system.is_running(101));
    assert!(!fx.system.is_running(150));
    assert!(fx.system.is_running(160));

    // Saving stamps every record with this host, so the survivor is now ours.
    let saved = fx.reload();
    assert_eq!(saved.size(), 1);
    let shared = saved.get("shared").unwrap();
    assert_eq!(shared.host_identifier, THIS_HOST);
    assert!(!shared.is_remote);
}

#[test]
fn stop_all_with_nothing_running() {
    let mut fx = Fixture::new();
    let launcher = ScriptedLauncher::default();

    let outcome = fx.manager(&launcher).stop_tunnel(None);

    assert_eq!(outcome.status, StopStatus::Stopped);
    assert_eq!(outcome.stopped_count, 0);
    assert!(outcome.transcript.contains("no tunnel processes found"));
}

#[test]
fn stubborn_tunnel_is_escalated_once() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "localhost:3000", THIS_HOST).with_process_id(ProcessId(100))]);
    fx.system.spawn(100, 1, "tk-core supervise --name web");
    fx.system
        .spawn(101, 100, "cloudflared tunnel --url localhost:3000");
    fx.system.set_ignores_graceful(101);
    let launcher = ScriptedLauncher::default();

    let outcome = fx.manager(&launcher).stop_tunnel(Some("web"));

    assert_eq!(outcome.status, StopStatus::Stopped);
    let to_child: Vec<SignalKind> = fx
        .system
        .signals()
        .into_iter()
        .filter(|(pid, _)| *pid == ProcessId(101))
        .map(|(_, kind)| kind)
        .collect();
    assert_eq!(to_child, vec![SignalKind::Graceful, SignalKind::Forceful]);
}

// ============================================================================
// list
// ============================================================================

#[test]
fn list_absorbs_untracked_tunnel() {
    let mut fx = Fixture::new();
    fx.system
        .spawn(500, 1, "cloudflared tunnel --url http://localhost:4000");
    let launcher = ScriptedLauncher::default();

    let listed = fx.manager(&launcher).list_tunnels();

    assert_eq!(listed.tunnels.len(), 1);
    let auto = &listed.tunnels[0];
    assert!(auto.is_auto_detected);
    assert_eq!(auto.local_address, "http://localhost:4000");
    assert_eq!(auto.status, TunnelStatus::Starting);
    assert_eq!(listed.summary.auto_detected, 1);
    assert_eq!(listed.summary.tunnel_processes, 1);

    let saved = fx.reload();
    let names: Vec<&str> = saved.entries().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["auto-4000"]);
    assert!(saved.get("auto-4000").unwrap().is_auto_detected());
}

#[test]
fn list_reports_statuses() {
    let mut fx = Fixture::new();
    let mut running = record("running", "localhost:3000", THIS_HOST).with_process_id(ProcessId(100));
    running.public_address = Some("https://r.example-tunnel.com".to_string());
    fx.seed(&[
        running,
        record("starting", "localhost:3100", THIS_HOST).with_process_id(ProcessId(110)),
        record("dead", "localhost:3200", THIS_HOST).with_process_id(ProcessId(120)),
        record("elsewhere", "localhost:3300", "otherhost"),
    ]);
    fx.system.spawn(100, 1, "tk-core supervise --name running");
    fx.system.spawn(110, 1, "tk-core supervise --name starting");
    fx.system
        .spawn(170, 1, "cloudflared tunnel run --token abc");
    let launcher = ScriptedLauncher::default();

    let listed = fx.manager(&launcher).list_tunnels();

    let status = |name: &str| {
        listed
            .tunnels
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.status)
    };
    assert_eq!(status("running"), Some(TunnelStatus::Running));
    assert_eq!(status("starting"), Some(TunnelStatus::Starting));
    assert_eq!(status("dead"), Some(TunnelStatus::ProcessNotFound));
    assert_eq!(status("elsewhere"), Some(TunnelStatus::Remote));
    assert_eq!(listed.summary.remote, 1);
    assert_eq!(listed.summary.launcher_processes, 2);
    assert_eq!(listed.summary.token_tunnels, 1);
    assert_eq!(listed.summary.tunnel_processes, 0);
    // Never deletes.
    assert_eq!(listed.summary.tracked, 4);
}

#[test]
fn list_without_process_table_skips_reconciliation() {
    let mut fx = Fixture::new();
    fx.seed(&[record("web", "localhost:3000", THIS_HOST).with_process_id(ProcessId(100))]);
    fx.system.fail_snapshots(true);
    let launcher = ScriptedLauncher::default();

    let listed = fx.manager(&launcher).list_tunnels();

    assert!(listed.reconciliation.is_none());
    assert!(!listed.summary.process_table_available);
    assert_eq!(listed.tunnels[0].status, TunnelStatus::Unknown);
}

// ============================================================================
// concurrency
// ============================================================================

/// Two invocations interleave load/mutate/save: the later save wins and
/// silently drops the earlier one's record. This documents the race; it is
/// not a guarantee of anything.
#[test]
fn last_save_wins_between_invocations() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("tunnels.json");

    let mut first = TunnelRegistry::new(&path, THIS_HOST);
    let mut second = TunnelRegistry::new(&path, THIS_HOST);
    first.load();
    second.load();

    first.set("a", record("a", "localhost:1", THIS_HOST));
    assert!(first.save());
    second.set("b", record("b", "localhost:2", THIS_HOST));
    assert!(second.save());

    let merged = fx.reload();
    assert!(merged.get("a").is_none());
    assert!(merged.get("b").is_some());
}
