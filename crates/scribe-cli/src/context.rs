use anyhow::Result;
use scribe_core::{AppConfig, ApprovalMode};
use scribe_errors::errors;
use scribe_observe::Observer;
use scribe_tools::{
    ConfirmationBroker, Decision, FileToolHost, PendingConfirmation, spawn_responder,
};
use scribe_vault::Fingerprint;
use std::io::{IsTerminal, Write, stderr, stdin};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct GlobalFlags {
    pub json: bool,
    pub verbose: bool,
    pub yes: bool,
    pub no_input: bool,
}

impl GlobalFlags {
    fn approval_mode(&self, cfg: &AppConfig) -> ApprovalMode {
        if self.yes {
            ApprovalMode::Always
        } else {
            cfg.policy.approve_edits
        }
    }
}

pub(crate) fn load_config(cwd: &Path) -> Result<AppConfig> {
    AppConfig::ensure(cwd)
}

pub(crate) fn open_observer(cwd: &Path, cfg: &AppConfig, flags: &GlobalFlags) -> Result<Arc<Observer>> {
    let observer = Observer::new(cwd, &cfg.telemetry)?;
    observer.set_verbose(flags.verbose);
    Ok(Arc::new(observer))
}

pub(crate) fn open_host(cwd: &Path, flags: &GlobalFlags) -> Result<FileToolHost> {
    let cfg = load_config(cwd)?;
    let observer = open_observer(cwd, &cfg, flags)?;
    let broker = broker_for(flags.approval_mode(&cfg), flags.no_input);
    FileToolHost::new(cwd, &cfg, broker, observer)
}

fn broker_for(mode: ApprovalMode, no_input: bool) -> ConfirmationBroker {
    if no_input || mode != ApprovalMode::Ask || !stdin().is_terminal() {
        return ConfirmationBroker::unattended(mode);
    }
    let (broker, requests) = ConfirmationBroker::channel(mode);
    // Exits once the broker, and with it the request sender, is dropped.
    let _responder = spawn_responder(requests, prompt_on_stdin);
    broker
}

fn prompt_on_stdin(pending: &PendingConfirmation) -> Decision {
    let mut err = stderr();
    let _ = writeln!(err, "{}", pending.summary.headline());
    for line in &pending.summary.preview {
        let _ = writeln!(err, "  {line}");
    }
    let _ = write!(err, "apply? [y/N] ");
    let _ = err.flush();
    let mut line = String::new();
    match stdin().read_line(&mut line) {
        Ok(_) if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") => {
            Decision::Approved
        }
        _ => Decision::Denied,
    }
}

pub(crate) fn parse_expected(raw: Option<&str>) -> Result<Option<Fingerprint>> {
    raw.map(|raw| {
        Fingerprint::parse(raw)
            .ok_or_else(|| errors::invalid_fingerprint(raw).into_error())
    })
    .transpose()
}

pub(crate) fn parse_version_id(path: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| errors::version_not_found(path, raw).into_error())
}
