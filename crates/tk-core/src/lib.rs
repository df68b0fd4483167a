//! tunnelkeeper core library.
//!
//! Keeps a registry of tunnel processes shared between invocations and
//! reconciles it with what is actually running:
//! - [`collect`]: process table snapshots and command-line matching
//! - [`action`]: signalling, tree kills and bulk reaping
//! - [`registry`]: the on-disk tunnel registry
//! - [`reconcile`]: absorbing untracked tunnel processes
//! - [`launch`]: starting tunnels and discovering their public address
//! - [`tunnels`]: start / stop / list operations for front ends
//! - [`supervise`]: the detached owner of one tunnel binary

pub mod action;
pub mod collect;
pub mod exit_codes;
pub mod launch;
pub mod logging;
pub mod output;
pub mod reconcile;
pub mod registry;
pub mod supervise;
pub mod tunnels;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use exit_codes::ExitCode;
pub use registry::{TunnelRecord, TunnelRegistry};
pub use tunnels::{ListOutcome, StartOutcome, StopOutcome, StopStatus, TunnelManager};
