//! Process inspection.
//!
//! Point-in-time views of the OS process table: pattern search, liveness
//! and parent/child relations. Everything goes through [`ProcessTable`] so
//! the termination logic can run against a scripted table in tests.

pub mod address;
pub mod ps_table;
pub mod types;

pub use address::{
    exposes_address, extract_local_address, flag_value, normalize_address, port_of,
};
pub use ps_table::{parse_ps_line, InspectError, ProcessTable, PsProcessTable};
pub use types::{CommandSignature, ProcessEntry, ProcessState};

use tk_common::ProcessId;

/// One read of the process table, excluding the calling process.
///
/// Child lookups against a snapshot stay valid after the parent dies,
/// which is what the tree killer relies on.
#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    entries: Vec<ProcessEntry>,
}

impl ProcessSnapshot {
    pub fn new(entries: Vec<ProcessEntry>) -> Self {
        let me = ProcessId::current();
        Self {
            entries: entries
                .into_iter()
                .filter(|e| e.pid != me && e.is_live())
                .collect(),
        }
    }

    pub fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessEntry> {
        self.entries.iter().find(|e| e.pid == pid)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.get(pid).is_some()
    }

    /// Direct children of `pid`.
    pub fn children_of(&self, pid: ProcessId) -> Vec<&ProcessEntry> {
        self.entries.iter().filter(|e| e.ppid == pid).collect()
    }

    /// Entries whose command line contains `pattern`, case-insensitively.
    pub fn matching(&self, pattern: &str) -> Vec<&ProcessEntry> {
        self.entries
            .iter()
            .filter(|e| e.command_contains(pattern))
            .collect()
    }

    /// Entries matching a signature.
    pub fn matching_signature(&self, signature: &CommandSignature) -> Vec<&ProcessEntry> {
        self.entries
            .iter()
            .filter(|e| signature.matches(&e.command))
            .collect()
    }
}

/// Queries over a [`ProcessTable`].
pub struct ProcessInspector<'a> {
    table: &'a dyn ProcessTable,
}

impl<'a> ProcessInspector<'a> {
    pub fn new(table: &'a dyn ProcessTable) -> Self {
        Self { table }
    }

    pub fn snapshot(&self) -> Result<ProcessSnapshot, InspectError> {
        self.table.snapshot().map(ProcessSnapshot::new)
    }

    /// All processes whose command line contains `pattern`.
    ///
    /// No match is an empty list, never an error.
    pub fn list_processes_matching(&self, pattern: &str) -> Result<Vec<ProcessEntry>, InspectError> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.matching(pattern).into_iter().cloned().collect())
    }

    pub fn is_process_alive(&self, pid: ProcessId) -> bool {
        self.table.is_alive(pid)
    }

    /// Direct children of `pid`; empty when `pid` has none or is gone.
    pub fn children_of(&self, pid: ProcessId) -> Result<Vec<ProcessEntry>, InspectError> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.children_of(pid).into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSystem;

    #[test]
    fn matching_is_case_insensitive_and_empty_when_absent() {
        let system = FakeSystem::new();
        system.spawn(100, 1, "Cloudflared Tunnel --url http://localhost:3000");
        system.spawn(101, 1, "node server.js");

        let inspector = ProcessInspector::new(&system);
        let found = inspector.list_processes_matching("cloudflared tunnel").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pid, ProcessId(100));
        assert!(inspector.list_processes_matching("ngrok").unwrap().is_empty());
    }

    #[test]
    fn children_survive_in_snapshot_after_parent_exit() {
        let system = FakeSystem::new();
        system.spawn(200, 1, "tk-core supervise --name web");
        system.spawn(201, 200, "cloudflared tunnel --url http://localhost:3000");

        let inspector = ProcessInspector::new(&system);
        let snapshot = inspector.snapshot().unwrap();
        system.exit(200);

        assert!(!inspector.is_process_alive(ProcessId(200)));
        let children = snapshot.children_of(ProcessId(200));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].pid, ProcessId(201));
    }

    #[test]
    fn unknown_pid_has_no_children() {
        let system = FakeSystem::new();
        let inspector = ProcessInspector::new(&system);
        assert!(inspector.children_of(ProcessId(999_999)).unwrap().is_empty());
        assert!(!inspector.is_process_alive(ProcessId(999_999)));
    }

    #[test]
    fn snapshot_drops_zombies() {
        let system = FakeSystem::new();
        system.spawn(300, 1, "cloudflared tunnel --url localhost:1");
        system.zombify(300);
        let inspector = ProcessInspector::new(&system);
        assert!(inspector.snapshot().unwrap().entries().is_empty());
    }
}
