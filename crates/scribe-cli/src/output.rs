use anyhow::{Result, anyhow};
use scribe_errors::errors;
use scribe_tools::{MutationReport, MutationStatus};
use scribe_vault::Fingerprint;
use serde::Serialize;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn print_json_err<T: Serialize>(value: &T) -> Result<()> {
    eprintln!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn finish_report(report: &MutationReport, json_mode: bool) -> Result<()> {
    if json_mode {
        print_json(report)?;
    } else {
        print_report_text(report);
    }
    report_status(report)
}

pub(crate) fn print_report_text(report: &MutationReport) {
    if report.committed() {
        let sha = report
            .sha256
            .as_deref()
            .and_then(Fingerprint::parse)
            .map(|fp| fp.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {} version={} sha256={sha}",
            report.kind,
            report.path,
            report
                .version_id
                .map(|id| id.to_string())
                .unwrap_or_default()
        );
        if let Some(archived) = report.archived_version_id {
            println!("  previous content archived as {archived}");
        }
        if let Some(from) = report.restored_from {
            println!("  restored from {from}");
        }
    }
}

/// Anything short of a commit becomes an error carrying the matching exit code.
pub(crate) fn report_status(report: &MutationReport) -> Result<()> {
    match report.status {
        MutationStatus::Committed => Ok(()),
        MutationStatus::Rejected => {
            let reason = report
                .reason
                .as_ref()
                .ok_or_else(|| anyhow!("rejected without a reason"))?;
            Err(errors::rejected(&report.path, reason).into_error())
        }
        MutationStatus::Denied => Err(errors::mutation_denied(&report.path).into_error()),
        MutationStatus::Cancelled => Err(errors::cancelled(&report.path).into_error()),
    }
}
