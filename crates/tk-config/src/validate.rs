//! Settings validation errors and semantic validation.

use crate::settings::{TunnelSettings, URL_PLACEHOLDER};
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest grace period accepted; stops block for this long.
const MAX_GRACE_PERIOD_MS: u64 = 60_000;

/// Settings validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

impl From<ValidationError> for tk_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::IoError(msg) => tk_common::Error::Config(msg),
            other => tk_common::Error::InvalidSettings(other.to_string()),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate settings semantically.
pub fn validate_settings(settings: &TunnelSettings) -> ValidationResult<()> {
    if settings.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: settings.schema_version.clone(),
        });
    }

    if settings.tunnel_binary.trim().is_empty() {
        return Err(invalid("tunnel_binary", "must not be empty"));
    }

    // Empty signatures would match every process on the machine.
    for (field, value) in [
        ("tunnel_signature", &settings.tunnel_signature),
        ("launcher_signature", &settings.launcher_signature),
        ("token_marker", &settings.token_marker),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
    }

    if !settings
        .tunnel_args
        .iter()
        .any(|arg| arg.contains(URL_PLACEHOLDER))
    {
        return Err(invalid(
            "tunnel_args",
            format!("must contain the {} placeholder", URL_PLACEHOLDER),
        ));
    }

    if let Err(e) = regex::Regex::new(&settings.public_url_pattern) {
        return Err(invalid("public_url_pattern", e.to_string()));
    }

    if settings.grace_period_ms > MAX_GRACE_PERIOD_MS {
        return Err(invalid(
            "grace_period_ms",
            format!(
                "{} exceeds the maximum of {}",
                settings.grace_period_ms, MAX_GRACE_PERIOD_MS
            ),
        ));
    }

    Ok(())
}
