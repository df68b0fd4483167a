//! tunnelkeeper common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the tk-* crates:
//! - Process identity types
//! - The unified error type and its categories
//! - Output format selection for CLI payloads

pub mod error;
pub mod id;
pub mod output;

pub use error::{Error, ErrorCategory, Result};
pub use id::ProcessId;
pub use output::OutputFormat;
