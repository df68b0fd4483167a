//! The shared on-disk tunnel registry.
//!
//! One JSON file holds every known tunnel as an array of records. Each
//! invocation loads it, mutates the in-memory map and rewrites the file in
//! full. There is no locking: two invocations that load, mutate and save
//! concurrently race, and the last save wins.
//!
//! Storage failures never abort an operation. A missing file is an empty
//! registry; an unreadable or malformed file leaves the in-memory state
//! untouched; a failed save is logged and swallowed.

pub mod record;

pub use record::{TerminationHandle, TunnelOrigin, TunnelRecord};

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Host name used when the OS will not tell us ours.
const UNKNOWN_HOST: &str = "unknown-host";

/// Errors from reading or writing the registry file.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed registry {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<RegistryError> for tk_common::Error {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::Malformed { .. } => tk_common::Error::MalformedRegistry(message),
            _ => tk_common::Error::Registry(message),
        }
    }
}

/// What a load did to the in-memory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Replaced with this many records from the file.
    Loaded(usize),
    /// No file yet; the registry is now empty.
    Missing,
    /// File unreadable or malformed; state kept as it was.
    Rejected(String),
}

/// Hostname of this machine, as recorded in `hostIdentifier`.
pub fn current_host() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

/// In-memory working copy of the registry file.
#[derive(Debug, Clone)]
pub struct TunnelRegistry {
    path: PathBuf,
    host: String,
    records: BTreeMap<String, TunnelRecord>,
}

impl TunnelRegistry {
    /// An empty registry bound to `path`, owned by `host`.
    pub fn new(path: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            records: BTreeMap::new(),
        }
    }

    /// An empty registry for this machine.
    pub fn for_current_host(path: impl Into<PathBuf>) -> Self {
        Self::new(path, current_host())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Replace the in-memory state with the file's contents.
    pub fn load(&mut self) -> LoadOutcome {
        match self.try_load() {
            Ok(Some(count)) => LoadOutcome::Loaded(count),
            Ok(None) => LoadOutcome::Missing,
            Err(e) => {
                warn!(error = %e, "registry load rejected; keeping current state");
                LoadOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Like [`load`](Self::load) but surfaces the failure.
    ///
    /// `Ok(None)` means the file does not exist.
    pub fn try_load(&mut self) -> Result<Option<usize>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no registry file yet");
                self.records.clear();
                return Ok(None);
            }
            Err(source) => {
                return Err(RegistryError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let parsed: Vec<TunnelRecord> =
            serde_json::from_str(&content).map_err(|source| RegistryError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        let mut records = BTreeMap::new();
        for mut record in parsed {
            record.is_remote = record.host_identifier != self.host;
            records.insert(record.name.clone(), record);
        }
        let count = records.len();
        self.records = records;
        debug!(path = %self.path.display(), count, "registry loaded");
        Ok(Some(count))
    }

    /// Rewrite the file; failures are logged and reported as `false`.
    pub fn save(&self) -> bool {
        match self.try_save() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "registry save failed");
                false
            }
        }
    }

    /// Rewrite the file with every record, stamped with this host.
    pub fn try_save(&self) -> Result<(), RegistryError> {
        let records: Vec<TunnelRecord> = self
            .records
            .values()
            .map(|r| TunnelRecord {
                host_identifier: self.host.clone(),
                ..r.clone()
            })
            .collect();
        let json = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| RegistryError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        fs::write(&self.path, json).map_err(|source| RegistryError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), count = records.len(), "registry saved");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TunnelRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TunnelRecord> {
        self.records.get_mut(name)
    }

    /// Insert or replace the record under `name`.
    ///
    /// The stored record's `name` always equals the key.
    pub fn set(&mut self, name: &str, mut record: TunnelRecord) {
        record.name = name.to_string();
        self.records.insert(name.to_string(), record);
    }

    pub fn delete(&mut self, name: &str) -> Option<TunnelRecord> {
        self.records.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in name order.
    pub fn entries(&self) -> impl Iterator<Item = &TunnelRecord> {
        self.records.values()
    }

    /// `base` if free, else `base-2`, `base-3`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tk_common::ProcessId;

    fn registry_in(dir: &TempDir, host: &str) -> TunnelRegistry {
        TunnelRegistry::new(dir.path().join("tunnels.json"), host)
    }

    #[test]
    fn set_then_get_returns_equal_record() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        let record = TunnelRecord::new("web", "http://localhost:3000", "laptop")
            .with_process_id(ProcessId(100));

        registry.set("web", record.clone());
        assert_eq!(registry.get("web"), Some(&record));
        assert_eq!(registry.size(), 1);
        assert!(registry.delete("web").is_some());
        assert!(registry.get("web").is_none());
    }

    #[test]
    fn round_trip_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        let mut record = TunnelRecord::new("web", "http://localhost:3000", "laptop")
            .with_process_id(ProcessId(100));
        record.public_address = Some("https://abc.trycloudflare.com".to_string());
        registry.set("web", record.clone());
        registry.set(
            "auto-4000",
            TunnelRecord::new("auto-4000", "localhost:4000", "laptop")
                .with_origin(TunnelOrigin::AutoDetected),
        );
        assert!(registry.save());

        let mut reloaded = registry_in(&dir, "laptop");
        assert_eq!(reloaded.load(), LoadOutcome::Loaded(2));
        let back = reloaded.get("web").unwrap();
        assert_eq!(back.local_address, record.local_address);
        assert_eq!(back.public_address, record.public_address);
        assert_eq!(back.created_at, record.created_at);
        assert_eq!(back.process_id, record.process_id);
        assert!(!back.is_remote);
        assert!(reloaded.get("auto-4000").unwrap().is_auto_detected());
    }

    #[test]
    fn records_from_other_host_load_as_remote() {
        let dir = TempDir::new().unwrap();
        let mut theirs = registry_in(&dir, "otherhost");
        theirs.set("web", TunnelRecord::new("web", "localhost:3000", "otherhost"));
        assert!(theirs.save());

        let mut ours = registry_in(&dir, "thishost");
        ours.load();
        let record = ours.get("web").unwrap();
        assert!(record.is_remote);
        assert!(record.termination_handle().is_remote());
    }

    #[test]
    fn save_stamps_current_host() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "thishost");
        registry.set("web", TunnelRecord::new("web", "localhost:3000", "otherhost"));
        assert!(registry.save());

        let raw = fs::read_to_string(registry.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["hostIdentifier"], "thishost");
    }

    #[test]
    fn missing_file_empties_registry() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        registry.set("stale", TunnelRecord::new("stale", "localhost:1", "laptop"));
        assert_eq!(registry.load(), LoadOutcome::Missing);
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_file_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        registry.set("web", TunnelRecord::new("web", "localhost:3000", "laptop"));
        fs::write(registry.path(), "[{\"name\": \"web\", \"localAdd").unwrap();

        assert!(matches!(registry.load(), LoadOutcome::Rejected(_)));
        assert!(registry.get("web").is_some());
    }

    #[test]
    fn missing_required_field_rejects_whole_file() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        fs::write(
            registry.path(),
            r#"[
                {"name": "a", "localAddress": "localhost:1", "createdAt": "2026-01-01T00:00:00Z", "hostIdentifier": "laptop"},
                {"name": "b", "createdAt": "2026-01-01T00:00:00Z", "hostIdentifier": "laptop"}
            ]"#,
        )
        .unwrap();

        assert!(matches!(registry.load(), LoadOutcome::Rejected(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        fs::write(
            registry.path(),
            r#"[{"name": "a", "localAddress": "localhost:1", "createdAt": "2026-01-01T00:00:00Z",
                 "hostIdentifier": "laptop", "color": "blue"}]"#,
        )
        .unwrap();
        assert_eq!(registry.load(), LoadOutcome::Loaded(1));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let registry = TunnelRegistry::new(dir.path().join("a/b/tunnels.json"), "laptop");
        assert!(registry.save());
        assert!(registry.path().exists());
    }

    #[test]
    fn failed_save_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be.
        let path = dir.path().join("tunnels.json");
        fs::create_dir(&path).unwrap();
        let registry = TunnelRegistry::new(&path, "laptop");
        assert!(!registry.save());
        assert!(registry.try_save().is_err());
    }

    #[test]
    fn unique_name_appends_suffix() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry_in(&dir, "laptop");
        assert_eq!(registry.unique_name("auto-4000"), "auto-4000");
        registry.set("auto-4000", TunnelRecord::new("auto-4000", "localhost:4000", "laptop"));
        registry.set("auto-4000-2", TunnelRecord::new("auto-4000-2", "localhost:4000", "laptop"));
        assert_eq!(registry.unique_name("auto-4000"), "auto-4000-3");
    }
}
