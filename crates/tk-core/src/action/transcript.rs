//! Human-readable record of a termination run.

use super::signal::{SignalKind, TerminationAttempt};
use serde::{Deserialize, Serialize};
use std::fmt;
use tk_common::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Info,
    Attempt,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<ProcessId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
}

/// Ordered log of everything a stop or reap did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            kind: EntryKind::Info,
            message: message.into(),
            pid: None,
            signal: None,
            accepted: None,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.entries.push(TranscriptEntry {
            kind: EntryKind::Warning,
            message,
            pid: None,
            signal: None,
            accepted: None,
        });
    }

    pub fn attempt(&mut self, attempt: &TerminationAttempt) {
        self.entries.push(TranscriptEntry {
            kind: EntryKind::Attempt,
            message: format!("{} -> pid {}: {}", attempt.signal, attempt.pid, attempt.detail),
            pid: Some(attempt.pid),
            signal: Some(attempt.signal),
            accepted: Some(attempt.accepted),
        });
    }

    pub fn extend(&mut self, other: Transcript) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Warning)
    }

    /// Attempts sent to `pid`, in order.
    pub fn attempts_for(&self, pid: ProcessId) -> Vec<&TranscriptEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Attempt && e.pid == Some(pid))
            .collect()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            match entry.kind {
                EntryKind::Info => write!(f, "  {}", entry.message)?,
                EntryKind::Attempt => {
                    let mark = if entry.accepted == Some(true) { "✓" } else { "✗" };
                    write!(f, "  {} {}", mark, entry.message)?
                }
                EntryKind::Warning => write!(f, "  ⚠ {}", entry.message)?,
            }
        }
        Ok(())
    }
}
