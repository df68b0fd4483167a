//! Process table rows and command-line signatures.

use serde::{Deserialize, Serialize};
use tk_common::ProcessId;

/// Process state from ps output.
///
/// Maps to standard Unix process states:
/// - R: Running or runnable
/// - S: Interruptible sleep (waiting for event)
/// - D: Uninterruptible sleep (usually I/O)
/// - Z: Zombie (terminated but not reaped)
/// - T: Stopped (by job control or trace)
/// - I: Idle (kernel thread, Linux)
/// - X: Dead (should never be seen)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    Idle,
    Dead,
    Unknown,
}

impl ProcessState {
    /// Parse process state from the first character of a `stat` column.
    pub fn from_char(c: char) -> Self {
        match c {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' | 'U' => ProcessState::DiskSleep,
            'Z' => ProcessState::Zombie,
            'T' | 't' => ProcessState::Stopped,
            'I' => ProcessState::Idle,
            'X' | 'x' => ProcessState::Dead,
            _ => ProcessState::Unknown,
        }
    }

    /// Whether the process has exited and is only waiting to be reaped.
    pub fn has_exited(&self) -> bool {
        matches!(self, ProcessState::Zombie | ProcessState::Dead)
    }
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    /// Process ID.
    pub pid: ProcessId,

    /// Parent process ID.
    pub ppid: ProcessId,

    /// Current process state.
    pub state: ProcessState,

    /// Owning user.
    pub user: String,

    /// Full command line.
    pub command: String,
}

impl ProcessEntry {
    /// Case-insensitive substring match on the command line.
    pub fn command_contains(&self, pattern: &str) -> bool {
        self.command
            .to_lowercase()
            .contains(&pattern.to_lowercase())
    }

    /// Whether the process is still running (zombies have already exited).
    pub fn is_live(&self) -> bool {
        !self.state.has_exited()
    }
}

/// A command-line signature: a required substring plus excluding markers.
///
/// Both sides are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSignature {
    needle: String,
    excluded: Vec<String>,
}

impl CommandSignature {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
            excluded: Vec::new(),
        }
    }

    /// Reject command lines containing `marker`.
    pub fn excluding(mut self, marker: &str) -> Self {
        self.excluded.push(marker.to_lowercase());
        self
    }

    pub fn needle(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, command: &str) -> bool {
        let command = command.to_lowercase();
        command.contains(&self.needle) && !self.excluded.iter().any(|m| command.contains(m))
    }
}
