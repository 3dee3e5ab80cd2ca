use anyhow::Result;
use scribe_core::RetentionConfig;
use scribe_tools::FileToolHost;
use scribe_vault::{Fingerprint, policy_from_config};
use serde_json::json;
use std::io::Write;
use std::path::Path;

use crate::context::{GlobalFlags, load_config, open_host, parse_version_id};
use crate::output::{finish_report, print_json};
use crate::{PruneArgs, VersionsCmd};

pub(crate) fn run_versions(cwd: &Path, flags: &GlobalFlags, cmd: VersionsCmd) -> Result<()> {
    let host = open_host(cwd, flags)?;
    match cmd {
        VersionsCmd::List(args) => {
            let records = host.versions(&args.path)?;
            if flags.json {
                print_json(&json!({"path": args.path, "versions": records}))?;
            } else if records.is_empty() {
                println!("no archived versions for {}", args.path);
            } else {
                for record in &records {
                    println!(
                        "{}  {}  {:>8} bytes  sha256={}",
                        record.version_id,
                        record.archived_at.format("%Y-%m-%d %H:%M:%S"),
                        record.size_bytes,
                        record.fingerprint.short()
                    );
                }
            }
        }
        VersionsCmd::Show(args) => {
            let version_id = parse_version_id(&args.path, &args.version)?;
            let content = host.version_content(&args.path, version_id)?;
            if flags.json {
                print_json(&json!({
                    "path": args.path,
                    "version_id": version_id,
                    "sha256": Fingerprint::of(&content),
                    "size_bytes": content.len(),
                    "content": String::from_utf8_lossy(&content),
                }))?;
            } else {
                let mut out = std::io::stdout().lock();
                out.write_all(&content)?;
                out.flush()?;
            }
        }
        VersionsCmd::Restore(args) => {
            let version_id = parse_version_id(&args.path, &args.version)?;
            let report = host.restore(&args.path, version_id)?;
            finish_report(&report, flags.json)?;
        }
        VersionsCmd::Prune(args) => run_prune(cwd, &host, flags, args)?,
    }
    Ok(())
}

fn run_prune(cwd: &Path, host: &FileToolHost, flags: &GlobalFlags, args: PruneArgs) -> Result<()> {
    let configured = load_config(cwd)?.archive.retention;
    let retention = RetentionConfig {
        max_versions: args.max_versions.or(configured.max_versions),
        max_age_days: args.max_age_days.or(configured.max_age_days),
    };
    let policy = policy_from_config(&retention);
    let paths = match args.path {
        Some(path) => vec![path],
        None => host.tracked_paths()?,
    };

    let mut pruned = Vec::new();
    for path in paths {
        let removed = host.prune(&path, policy.as_ref())?;
        if !removed.is_empty() {
            pruned.push(json!({"path": path, "removed": removed}));
        }
    }
    if flags.json {
        print_json(&json!({"retention": {
            "max_versions": retention.max_versions,
            "max_age_days": retention.max_age_days,
        }, "pruned": pruned}))?;
    } else if pruned.is_empty() {
        println!("nothing to prune");
    } else {
        for entry in &pruned {
            println!(
                "{}: removed {} version(s)",
                entry["path"].as_str().unwrap_or_default(),
                entry["removed"].as_array().map(Vec::len).unwrap_or_default()
            );
        }
    }
    Ok(())
}
