use anyhow::Result;
use scribe_core::AppConfig;
use scribe_store::Store;
use std::path::Path;

use crate::context::{GlobalFlags, load_config};
use crate::output::print_json;
use crate::{ConfigCmd, LogArgs};

pub(crate) fn run_log(cwd: &Path, flags: &GlobalFlags, args: LogArgs) -> Result<()> {
    let store = Store::new(cwd)?;
    let rows = store.list_mutations(args.path.as_deref(), args.limit)?;
    if flags.json {
        print_json(&rows)?;
        return Ok(());
    }
    if rows.is_empty() {
        println!("no mutations recorded");
    }
    for row in &rows {
        let version = row
            .version_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let reason = row
            .reason
            .as_deref()
            .map(|reason| format!(" ({reason})"))
            .unwrap_or_default();
        println!(
            "{}  {:<9} {:<7} {}  {version}{reason}",
            row.recorded_at, row.status, row.kind, row.path
        );
    }
    Ok(())
}

pub(crate) fn run_config(cwd: &Path, flags: &GlobalFlags, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            let cfg = load_config(cwd)?;
            if flags.json {
                print_json(&cfg)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
                println!(
                    "# settings: {}",
                    AppConfig::project_settings_path(cwd).display()
                );
            }
        }
    }
    Ok(())
}
