//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI arguments → environment variables → XDG paths → defaults.

use std::path::{Path, PathBuf};

/// Where a path was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Taken from the settings file.
    Settings,

    /// Found in (or defaulted to) the XDG directories.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::Settings => write!(f, "settings file"),
            ConfigSource::XdgConfig => write!(f, "XDG directory"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// A resolved path with provenance.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPath {
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "TUNNELKEEPER_CONFIG";
pub const ENV_CONFIG_DIR: &str = "TUNNELKEEPER_CONFIG_DIR";
pub const ENV_REGISTRY_PATH: &str = "TUNNELKEEPER_REGISTRY";

/// Standard file names.
const SETTINGS_FILENAME: &str = "config.json";
const REGISTRY_FILENAME: &str = "tunnels.json";

/// Application name for XDG directories.
const APP_NAME: &str = "tunnelkeeper";

/// Resolve the settings file path.
///
/// Resolution order:
/// 1. Explicit CLI path (if it exists)
/// 2. TUNNELKEEPER_CONFIG (direct path)
/// 3. TUNNELKEEPER_CONFIG_DIR + config.json
/// 4. XDG config directory (~/.config/tunnelkeeper/config.json)
/// 5. Built-in defaults (None)
pub fn resolve_settings_path(cli_path: Option<&Path>) -> ResolvedPath {
    if let Some(path) = cli_path {
        if path.exists() {
            return ResolvedPath {
                path: Some(path.to_path_buf()),
                source: ConfigSource::CliArgument,
            };
        }
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return ResolvedPath {
                path: Some(path),
                source: ConfigSource::Environment,
            };
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(SETTINGS_FILENAME);
        if path.exists() {
            return ResolvedPath {
                path: Some(path),
                source: ConfigSource::Environment,
            };
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(SETTINGS_FILENAME);
        if path.exists() {
            return ResolvedPath {
                path: Some(path),
                source: ConfigSource::XdgConfig,
            };
        }
    }

    ResolvedPath::default()
}

/// Resolve the shared registry file path.
///
/// Unlike the settings file, the registry need not exist yet: the first save
/// creates it.
///
/// Resolution order:
/// 1. Explicit CLI path
/// 2. TUNNELKEEPER_REGISTRY
/// 3. `registry_path` from the settings file
/// 4. XDG data directory (~/.local/share/tunnelkeeper/tunnels.json)
/// 5. `./tunnels.json` when no home directory can be determined
pub fn resolve_registry_path(cli_path: Option<&Path>, settings_path: Option<&Path>) -> ResolvedPath {
    if let Some(path) = cli_path {
        return ResolvedPath {
            path: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        };
    }

    if let Ok(env_path) = std::env::var(ENV_REGISTRY_PATH) {
        if !env_path.is_empty() {
            return ResolvedPath {
                path: Some(PathBuf::from(env_path)),
                source: ConfigSource::Environment,
            };
        }
    }

    if let Some(path) = settings_path {
        return ResolvedPath {
            path: Some(path.to_path_buf()),
            source: ConfigSource::Settings,
        };
    }

    if let Some(dir) = dirs::data_dir() {
        return ResolvedPath {
            path: Some(dir.join(APP_NAME).join(REGISTRY_FILENAME)),
            source: ConfigSource::XdgConfig,
        };
    }

    ResolvedPath {
        path: Some(PathBuf::from(REGISTRY_FILENAME)),
        source: ConfigSource::BuiltinDefault,
    }
}

/// Get the XDG config directory for tunnelkeeper.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(format!("{}", ConfigSource::Settings), "settings file");
        assert_eq!(format!("{}", ConfigSource::BuiltinDefault), "builtin default");
    }

    #[test]
    fn cli_registry_path_wins_even_if_missing() {
        let path = Path::new("/nonexistent/dir/tunnels.json");
        let resolved = resolve_registry_path(Some(path), Some(Path::new("/other.json")));
        assert_eq!(resolved.path.as_deref(), Some(path));
        assert_eq!(resolved.source, ConfigSource::CliArgument);
    }

    #[test]
    fn missing_cli_settings_path_falls_through() {
        let resolved = resolve_settings_path(Some(Path::new("/nonexistent/config.json")));
        assert_ne!(resolved.source, ConfigSource::CliArgument);
    }
}
