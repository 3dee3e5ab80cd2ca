use anyhow::{Context, Result, anyhow};
use scribe_tools::EditOp;
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::context::{GlobalFlags, open_host, parse_expected};
use crate::output::{finish_report, print_json, print_report_text, report_status};
use crate::{EditArgs, RmArgs, WriteArgs};

pub(crate) fn run_fingerprint(cwd: &Path, flags: &GlobalFlags, raw: &str) -> Result<()> {
    let host = open_host(cwd, flags)?;
    let (rel, full) = host.resolve(raw)?;
    let (observation, bytes) = host.vault().observe_content(&full)?;
    if flags.json {
        print_json(&json!({
            "path": rel,
            "exists": observation.exists(),
            "sha256": observation.fingerprint,
            "version_id": observation.version_id,
            "size_bytes": bytes.as_ref().map(Vec::len),
        }))?;
    } else {
        match &observation.fingerprint {
            Some(fingerprint) => println!("{fingerprint}  {rel}"),
            None => println!("{rel}: not found"),
        }
    }
    Ok(())
}

pub(crate) fn run_write(cwd: &Path, flags: &GlobalFlags, args: WriteArgs) -> Result<()> {
    let content = match (args.content, args.from_file) {
        (Some(content), _) => content.into_bytes(),
        (None, Some(source)) => {
            fs::read(&source).with_context(|| format!("read {}", source.display()))?
        }
        (None, None) => return Err(anyhow!("write requires --content or --from-file")),
    };
    let expected = parse_expected(args.expect.as_deref())?;
    let host = open_host(cwd, flags)?;
    let report = host.write(&args.path, content, expected)?;
    finish_report(&report, flags.json)
}

pub(crate) fn run_edit(cwd: &Path, flags: &GlobalFlags, args: EditArgs) -> Result<()> {
    let host = open_host(cwd, flags)?;
    let op = EditOp::Replace {
        search: args.search,
        replace: args.replace,
        all: args.all,
    };
    let (report, replacements) = host.edit(&args.path, &[op])?;
    if flags.json {
        let mut output = serde_json::to_value(&report)?;
        output["replacements"] = json!(replacements);
        print_json(&output)?;
    } else {
        print_report_text(&report);
        if report.committed() {
            println!("  {replacements} replacement(s)");
        }
    }
    report_status(&report)
}

pub(crate) fn run_rm(cwd: &Path, flags: &GlobalFlags, args: RmArgs) -> Result<()> {
    let expected = parse_expected(args.expect.as_deref())?;
    let host = open_host(cwd, flags)?;
    let report = host.delete(&args.path, expected)?;
    finish_report(&report, flags.json)
}
