//! Local log for the mutation journal, with optional outcome telemetry.
//!
//! Telemetry only ever carries event metadata. Paths, file content and tool
//! arguments stay on the machine.

use anyhow::Result;
use chrono::Utc;
use reqwest::blocking::Client;
use scribe_core::{EventEnvelope, EventKind, TelemetryConfig, runtime_dir};
use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
enum Level {
    Debug,
    Warn,
    Event,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Warn => "WARN",
            Level::Event => "EVENT",
        }
    }
}

pub struct Observer {
    log_path: Option<PathBuf>,
    telemetry: Option<(Client, String)>,
    verbose: AtomicBool,
}

impl Observer {
    /// Logs to `.scribe/observe.log` under `workspace`.
    pub fn new(workspace: &Path, telemetry_cfg: &TelemetryConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        let telemetry = match (telemetry_cfg.enabled, telemetry_cfg.endpoint.clone()) {
            (true, Some(endpoint)) => Some((
                Client::builder().timeout(TELEMETRY_TIMEOUT).build()?,
                endpoint,
            )),
            _ => None,
        };
        Ok(Self {
            log_path: Some(dir.join("observe.log")),
            telemetry,
            verbose: AtomicBool::new(false),
        })
    }

    /// Observer that drops everything except warnings, which still reach stderr.
    pub fn disabled() -> Self {
        Self {
            log_path: None,
            telemetry: None,
            verbose: AtomicBool::new(false),
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        self.write(Level::Event, &serde_json::to_string(event)?)?;
        if let (Some((client, endpoint)), Some(payload)) = (&self.telemetry, outcome_payload(event))
        {
            send_detached(client.clone(), endpoint.clone(), payload, self.log_path.clone());
        }
        Ok(())
    }

    /// Always goes to the log file; stderr only with `-v`.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose.load(Ordering::Relaxed) {
            eprintln!("[scribe] {msg}");
        }
        let _ = self.write(Level::Debug, msg);
    }

    pub fn warn_log(&self, msg: &str) {
        eprintln!("[scribe WARN] {msg}");
        let _ = self.write(Level::Warn, msg);
    }

    fn write(&self, level: Level, msg: &str) -> Result<()> {
        match &self.log_path {
            Some(path) => append_line(path, level, msg),
            None => Ok(()),
        }
    }
}

fn append_line(path: &Path, level: Level, msg: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} {} {msg}", Utc::now().to_rfc3339(), level.tag())?;
    Ok(())
}

/// Telemetry body for mutation and version outcomes. Tool events are never
/// sent since they carry file content.
fn outcome_payload(event: &EventEnvelope) -> Option<Value> {
    let (outcome, kind) = match &event.kind {
        EventKind::ToolProposedV1 { .. } | EventKind::ToolResultV1 { .. } => return None,
        EventKind::MutationCommittedV1 { kind, .. } => ("committed", kind.as_str()),
        EventKind::MutationRejectedV1 { kind, .. } => ("rejected", kind.as_str()),
        EventKind::MutationDeniedV1 { kind, .. } => ("denied", kind.as_str()),
        EventKind::MutationCancelledV1 { kind, .. } => ("cancelled", kind.as_str()),
        EventKind::VersionRestoredV1 { .. } => ("committed", "restore"),
        EventKind::VersionsPrunedV1 { .. } => ("pruned", "prune"),
    };
    let reason = match &event.kind {
        EventKind::MutationRejectedV1 { reason, .. } => Some(reason.as_str()),
        _ => None,
    };
    let removed = match &event.kind {
        EventKind::VersionsPrunedV1 { removed, .. } => Some(removed.len()),
        _ => None,
    };
    Some(json!({
        "name": "scribe.mutation",
        "at": Utc::now().to_rfc3339(),
        "session_id": event.session_id,
        "seq_no": event.seq_no,
        "category": event.kind.category(),
        "outcome": outcome,
        "kind": kind,
        "reason": reason,
        "removed": removed,
    }))
}

// The commit path never waits on the network; failures only reach the log.
fn send_detached(client: Client, endpoint: String, body: Value, log_path: Option<PathBuf>) {
    std::thread::spawn(move || {
        if let Err(err) = client.post(&endpoint).json(&body).send()
            && let Some(path) = log_path
        {
            let _ = append_line(&path, Level::Warn, &format!("telemetry post failed: {err}"));
        }
    });
}
