//! tunnelkeeper configuration loading and validation.
//!
//! This crate provides:
//! - Typed settings for the tunnel binary, command-line signatures and
//!   termination timing
//! - Path resolution (CLI → env → XDG → defaults) for the settings file
//!   and the shared registry file
//! - Semantic validation of loaded settings

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_registry_path, resolve_settings_path, ConfigSource, ResolvedPath};
pub use settings::{load_settings, LoadedSettings, TunnelSettings, URL_PLACEHOLDER};
pub use validate::{validate_settings, ValidationError, ValidationResult};

/// Schema version for the settings file.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
