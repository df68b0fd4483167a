//! Command payload rendering.
//!
//! JSON payloads go to stdout inside a small envelope; human output is
//! plain text built from the same outcome types.

use crate::action::ReapReport;
use crate::tunnels::{ListOutcome, StartOutcome, StopOutcome, StopStatus, TunnelStatus};
use serde::Serialize;
use std::fmt::Write as _;
use tk_common::{Error, OutputFormat};

/// Version of the JSON payload layout.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Common fields around every JSON payload.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub schema_version: &'static str,
    pub run_id: &'a str,
    pub generated_at: String,
    pub command: &'a str,
    #[serde(flatten)]
    pub payload: &'a T,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn new(command: &'a str, run_id: &'a str, payload: &'a T) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id,
            generated_at: chrono::Utc::now().to_rfc3339(),
            command,
            payload,
        }
    }
}

/// Print `payload` in the requested format.
///
/// `human` renders the text form; it is only called for human output.
pub fn emit<T, F>(format: OutputFormat, command: &str, run_id: &str, payload: &T, human: F)
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Json => {
            let envelope = Envelope::new(command, run_id, payload);
            match serde_json::to_string_pretty(&envelope) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::error!(error = %e, "failed to serialize payload"),
            }
        }
        OutputFormat::Human => print!("{}", human(payload)),
    }
}

/// Report an error on stderr.
pub fn emit_error(format: OutputFormat, run_id: &str, err: &Error) {
    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": run_id,
                "status": "error",
                "error": err.to_json(),
            });
            match serde_json::to_string_pretty(&body) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("error: {}", err),
            }
        }
        OutputFormat::Human => eprint!("{}", render_error(err)),
    }
}

// ============================================================================
// Human renderers
// ============================================================================

pub fn render_error(err: &Error) -> String {
    format!("error [{}]: {}\nhint: {}\n", err.code(), err, err.remediation())
}

pub fn render_start(outcome: &StartOutcome, public_address: Option<&str>) -> String {
    let mut out = String::new();
    if !outcome.accepted {
        let _ = writeln!(
            out,
            "Not started '{}': {}",
            outcome.name,
            outcome.reason.as_deref().unwrap_or("rejected")
        );
        return out;
    }

    let _ = writeln!(out, "Started '{}' for {}", outcome.name, outcome.local_address);
    if let Some(pid) = outcome.process_id {
        let _ = writeln!(out, "  pid: {}", pid);
    }
    match public_address {
        Some(url) => {
            let _ = writeln!(out, "  public address: {}", url);
        }
        None => {
            let _ = writeln!(out, "  public address: pending (see 'tk-core list')");
        }
    }
    out
}

pub fn render_stop(outcome: &StopOutcome) -> String {
    let headline = match outcome.status {
        StopStatus::Stopped => format!("Stopped {} tunnel(s)", outcome.stopped_count),
        StopStatus::NotFound => "Nothing to stop".to_string(),
        StopStatus::Refused => "Stop refused".to_string(),
        StopStatus::Partial => "Stop incomplete: some processes survived".to_string(),
    };
    format!("{}\n{}", headline, outcome.transcript)
}

pub fn render_reap(report: &ReapReport) -> String {
    let mut out = format!(
        "Reaped {} tunnel(s) and {} launcher(s); skipped {} token tunnel(s)\n",
        report.tunnels.len(),
        report.launchers.len(),
        report.skipped.len()
    );
    out.push_str(&report.transcript.to_string());
    out
}

fn status_label(status: TunnelStatus) -> &'static str {
    match status {
        TunnelStatus::Running => "running",
        TunnelStatus::Starting => "starting",
        TunnelStatus::ProcessNotFound => "not found",
        TunnelStatus::Remote => "remote",
        TunnelStatus::Unknown => "unknown",
    }
}

fn format_uptime(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3_600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3_600, (s % 3_600) / 60),
    }
}

pub fn render_list(outcome: &ListOutcome) -> String {
    let mut out = String::new();
    if outcome.tunnels.is_empty() {
        out.push_str("No tunnels registered\n");
    }

    for tunnel in &outcome.tunnels {
        let mut flags = Vec::new();
        if tunnel.is_auto_detected {
            flags.push("auto".to_string());
        }
        if tunnel.is_remote {
            flags.push(format!("host {}", tunnel.host_identifier));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        let _ = writeln!(
            out,
            "{:<20} {:<10} {:<24} {:<44} {}{}",
            tunnel.name,
            status_label(tunnel.status),
            tunnel.local_address,
            tunnel.public_address.as_deref().unwrap_or("-"),
            format_uptime(tunnel.uptime_secs),
            flags
        );
    }

    let s = &outcome.summary;
    if s.process_table_available {
        let _ = writeln!(
            out,
            "\n{} tracked ({} auto-detected, {} remote); live: {} tunnel(s), {} token tunnel(s), {} launcher(s)",
            s.tracked, s.auto_detected, s.remote, s.tunnel_processes, s.token_tunnels, s.launcher_processes
        );
    } else {
        let _ = writeln!(
            out,
            "\n{} tracked ({} remote); process table unavailable",
            s.tracked, s.remote
        );
    }
    if let Some(report) = &outcome.reconciliation {
        if !report.created.is_empty() {
            let _ = writeln!(out, "auto-detected: {}", report.created.join(", "));
        }
    }
    out
}
