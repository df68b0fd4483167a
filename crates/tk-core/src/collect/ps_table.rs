//! Process table access via the ps command.
//!
//! A single `ps` invocation lists every process with its parent, state,
//! owner and full command line. The same column set works with procps-ng
//! on Linux and BSD ps on macOS.

use super::types::{ProcessEntry, ProcessState};
use tk_common::ProcessId;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, span, Level};

/// Default timeout for a single ps invocation.
const PS_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while reading the process table.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Failed to execute ps command: {0}")]
    CommandFailed(String),

    #[error("ps timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InspectError> for tk_common::Error {
    fn from(err: InspectError) -> Self {
        tk_common::Error::Inspection(err.to_string())
    }
}

/// Source of process table snapshots.
pub trait ProcessTable {
    /// Every process currently in the table.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, InspectError>;

    /// Whether `pid` is still running.
    ///
    /// Exited-but-unreaped (zombie) entries count as gone. Inspection
    /// failures report the process as not alive.
    fn is_alive(&self, pid: ProcessId) -> bool {
        match self.snapshot() {
            Ok(entries) => entries.iter().any(|e| e.pid == pid && e.is_live()),
            Err(e) => {
                debug!(pid = pid.0, error = %e, "liveness check failed");
                false
            }
        }
    }
}

/// Process table backed by `ps`.
#[derive(Debug, Clone)]
pub struct PsProcessTable {
    timeout: Duration,
}

impl Default for PsProcessTable {
    fn default() -> Self {
        Self {
            timeout: PS_TIMEOUT,
        }
    }
}

impl PsProcessTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTable for PsProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, InspectError> {
        let _span = span!(Level::DEBUG, "ps_snapshot").entered();
        let start = Instant::now();

        let mut child = build_ps_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| InspectError::CommandFailed(e.to_string()))?;

        let ps_pid = child.id();
        let timeout = self.timeout;
        let finished = Arc::new(AtomicBool::new(false));
        let finished_clone = finished.clone();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out_clone = timed_out.clone();

        // Watchdog: a wedged ps must not hang a stop.
        thread::spawn(move || {
            thread::sleep(timeout);
            if !finished_clone.load(Ordering::Relaxed) {
                timed_out_clone.store(true, Ordering::Relaxed);
                debug!("ps timed out, killing process {}", ps_pid);
                #[cfg(unix)]
                unsafe {
                    libc::kill(ps_pid as i32, libc::SIGKILL);
                }
            }
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InspectError::CommandFailed("Failed to capture stdout".to_string()))?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_ps_line(&line) {
                // The ps process itself always matches whatever we look for.
                Some(entry) if entry.pid.0 == ps_pid => {}
                Some(entry) => entries.push(entry),
                None => skipped += 1,
            }
        }

        // Mark as finished before waiting, so the watchdog never hits a reused PID
        finished.store(true, Ordering::Relaxed);
        let status = child.wait()?;

        if timed_out.load(Ordering::Relaxed) {
            return Err(InspectError::Timeout(timeout));
        }
        if !status.success() && entries.is_empty() {
            return Err(InspectError::CommandFailed(format!("ps exited with {}", status)));
        }

        debug!(
            process_count = entries.len(),
            skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "process table read"
        );
        Ok(entries)
    }
}

fn build_ps_command() -> Command {
    let mut cmd = Command::new("ps");
    // Trailing '=' suppresses headers on both procps-ng and BSD ps.
    cmd.args(["-A", "-ww", "-o", "pid=,ppid=,stat=,user=,args="]);
    cmd
}

/// Parse one `pid ppid stat user args...` line.
///
/// Returns `None` for rows that do not have that shape; the command line
/// keeps its words separated by single spaces.
pub fn parse_ps_line(line: &str) -> Option<ProcessEntry> {
    let mut fields = line.split_whitespace();
    let pid: u32 = fields.next()?.parse().ok()?;
    let ppid: u32 = fields.next()?.parse().ok()?;
    let state = ProcessState::from_char(fields.next()?.chars().next()?);
    let user = fields.next()?.to_string();
    let command = fields.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return None;
    }

    Some(ProcessEntry {
        pid: ProcessId(pid),
        ppid: ProcessId(ppid),
        state,
        user,
        command,
    })
}
