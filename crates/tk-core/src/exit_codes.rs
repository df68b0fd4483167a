//! Exit codes for the tk-core CLI.
//!
//! Exit codes communicate operation outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-4: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use tk_common::{Error, ErrorCategory};

/// Exit codes for tk-core operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-4)
    // ========================================================================
    /// Success
    Ok = 0,

    /// Named tunnel not in the registry
    NotFound = 1,

    /// Some targeted processes survived SIGKILL
    PartialKill = 3,

    /// Stop refused (remote tunnel) or start rejected
    Refused = 4,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Settings file missing, unreadable or invalid
    ConfigError = 11,

    /// Process table or signals unavailable on this platform
    PlatformError = 12,

    /// Tunnel binary or supervisor could not be started
    LaunchError = 13,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Ok
    }

    /// Codes 10-19: resolvable by the user.
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Ok => "OK",
            ExitCode::NotFound => "NOT_FOUND",
            ExitCode::PartialKill => "ERR_PARTIAL",
            ExitCode::Refused => "ERR_REFUSED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::PlatformError => "ERR_PLATFORM",
            ExitCode::LaunchError => "ERR_LAUNCH",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code.as_i32()
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Launch => ExitCode::LaunchError,
            ErrorCategory::Platform | ErrorCategory::Inspection => ExitCode::PlatformError,
            ErrorCategory::Termination => ExitCode::Refused,
            ErrorCategory::Registry | ErrorCategory::Io => ExitCode::IoError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
