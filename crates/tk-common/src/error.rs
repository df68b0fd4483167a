//! Error types for tunnelkeeper.
//!
//! Every failure in the tunnel core degrades to a descriptive result for the
//! front end. This type is what crosses crate boundaries when an operation
//! cannot produce a result at all (bad configuration, unusable registry
//! path, launch failure). It carries:
//! - Stable error codes for machine parsing
//! - Category classification for exit-code mapping
//! - Remediation hints for humans
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 10,
//!   "category": "config",
//!   "message": "configuration error: tunnel_signature must not be empty",
//!   "remediation": "Fix config.json or remove it to fall back to defaults."
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tunnelkeeper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Process table inspection errors.
    Inspection,
    /// Signal delivery errors.
    Termination,
    /// Tunnel launch errors.
    Launch,
    /// Registry file errors.
    Registry,
    /// File I/O and serialization errors.
    Io,
    /// Platform compatibility errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Inspection => write!(f, "inspection"),
            ErrorCategory::Termination => write!(f, "termination"),
            ErrorCategory::Launch => write!(f, "launch"),
            ErrorCategory::Registry => write!(f, "registry"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Unified error type for tunnelkeeper.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    // Inspection errors (20-29)
    #[error("process table unavailable: {0}")]
    Inspection(String),

    // Termination errors (30-39)
    #[error("permission denied signalling process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("stop refused: tunnel '{name}' is owned by host '{host}'")]
    RemoteRefused { name: String, host: String },

    // Launch errors (40-49)
    #[error("tunnel launch failed: {0}")]
    Launch(String),

    // Registry errors (50-59)
    #[error("registry unavailable: {0}")]
    Registry(String),

    #[error("registry file malformed: {0}")]
    MalformedRegistry(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform errors (70-79)
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Inspection errors
    /// - 30-39: Termination errors
    /// - 40-49: Launch errors
    /// - 50-59: Registry errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidSettings(_) => 11,
            Error::Inspection(_) => 20,
            Error::PermissionDenied { .. } => 30,
            Error::RemoteRefused { .. } => 31,
            Error::Launch(_) => 40,
            Error::Registry(_) => 50,
            Error::MalformedRegistry(_) => 51,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::UnsupportedPlatform(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidSettings(_) => ErrorCategory::Config,
            Error::Inspection(_) => ErrorCategory::Inspection,
            Error::PermissionDenied { .. } | Error::RemoteRefused { .. } => {
                ErrorCategory::Termination
            }
            Error::Launch(_) => ErrorCategory::Launch,
            Error::Registry(_) | Error::MalformedRegistry(_) => ErrorCategory::Registry,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidSettings(_) => {
                "Fix config.json (see 'tk-core config show') or remove it to fall back to defaults."
            }
            Error::Inspection(_) => {
                "Check that 'ps' is installed and on PATH. Retry the operation."
            }
            Error::PermissionDenied { .. } => {
                "The process belongs to another user. Stop it as that user or with elevated privileges."
            }
            Error::RemoteRefused { .. } => {
                "Stop the tunnel from the host that created it."
            }
            Error::Launch(_) => {
                "Check that the tunnel binary is installed and that tunnel_binary in config.json points to it."
            }
            Error::Registry(_) => {
                "Check permissions on the registry file and its directory, or pass --registry."
            }
            Error::MalformedRegistry(_) => {
                "The registry file is unreadable JSON. Another invocation may be mid-write; retry, or delete the file."
            }
            Error::Io(_) => "Check disk space and permissions. Retry the operation.",
            Error::Json(_) => "Invalid JSON. Check syntax with 'jq . <file>'.",
            Error::UnsupportedPlatform(_) => {
                "Process control is only supported on Linux and macOS."
            }
        }
    }

    /// Structured JSON form for machine consumers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category(),
            "message": self.to_string(),
            "remediation": self.remediation(),
        })
    }
}
