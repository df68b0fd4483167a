//! Tunnel settings: which binary to launch and how to recognise its processes.

use crate::resolve::{resolve_settings_path, ConfigSource};
use crate::validate::{validate_settings, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Placeholder in `tunnel_args` replaced by the local address at launch.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Settings shared by the launcher, the killer, the reaper and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Schema version of the settings file.
    pub schema_version: String,

    /// Executable that establishes the tunnel.
    pub tunnel_binary: String,

    /// Arguments passed to the tunnel binary; `{url}` is the local address.
    pub tunnel_args: Vec<String>,

    /// Case-insensitive command-line substring identifying tunnel-binary processes.
    pub tunnel_signature: String,

    /// Case-insensitive command-line substring identifying our launcher processes.
    pub launcher_signature: String,

    /// Marker of long-lived credential tunnels; such processes are never bulk-reaped.
    pub token_marker: String,

    /// Regex matching the public address printed by the tunnel binary.
    pub public_url_pattern: String,

    /// Wait between the graceful and the forceful signal.
    pub grace_period_ms: u64,

    /// Registry file override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            tunnel_binary: "cloudflared".to_string(),
            tunnel_args: vec![
                "tunnel".to_string(),
                "--url".to_string(),
                URL_PLACEHOLDER.to_string(),
            ],
            tunnel_signature: "cloudflared tunnel".to_string(),
            launcher_signature: "tk-core supervise".to_string(),
            token_marker: "--token".to_string(),
            public_url_pattern: r"https://[a-z0-9-]+\.trycloudflare\.com".to_string(),
            grace_period_ms: 1_000,
            registry_path: None,
        }
    }
}

impl TunnelSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_json(&content)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }

    /// Grace period as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Tunnel-binary arguments with the local address substituted.
    pub fn args_for(&self, local_address: &str) -> Vec<String> {
        self.tunnel_args
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, local_address))
            .collect()
    }
}

/// Settings together with where they came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: TunnelSettings,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve, load and validate settings.
///
/// Absence of any settings file is normal and yields the defaults.
pub fn load_settings(cli_path: Option<&Path>) -> Result<LoadedSettings, ValidationError> {
    let resolved = resolve_settings_path(cli_path);

    let settings = match &resolved.path {
        Some(path) => {
            debug!(path = %path.display(), source = %resolved.source, "loading settings");
            TunnelSettings::from_file(path)?
        }
        None => {
            debug!("no settings file found, using defaults");
            TunnelSettings::default()
        }
    };

    validate_settings(&settings)?;

    Ok(LoadedSettings {
        settings,
        path: resolved.path,
        source: resolved.source,
    })
}
