use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use scribe_errors::ErrorHandler;
use std::path::PathBuf;

mod commands;
mod context;
mod output;

use commands::admin::{run_config, run_log};
use commands::files::{run_edit, run_fingerprint, run_rm, run_write};
use commands::versions::run_versions;
use context::GlobalFlags;
use output::print_json_err;

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Versioned, hash-checked file edits", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Approve every mutation without prompting.
    #[arg(long, global = true)]
    yes: bool,

    /// Non-interactive mode: deny every approval prompt.
    #[arg(long = "no-input", global = true)]
    no_input: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 fingerprint and version id of a file as it is now.
    Fingerprint(PathArg),
    /// Create or replace a file.
    Write(WriteArgs),
    /// Search and replace inside a file.
    Edit(EditArgs),
    /// Delete a file, keeping its content in the archive.
    Rm(RmArgs),
    Versions {
        #[command(subcommand)]
        command: VersionsCmd,
    },
    /// Show the mutation journal.
    Log(LogArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Args)]
struct PathArg {
    path: String,
}

#[derive(Args)]
struct WriteArgs {
    path: String,
    #[arg(long, conflicts_with = "from_file", required_unless_present = "from_file")]
    content: Option<String>,
    #[arg(long = "from-file")]
    from_file: Option<PathBuf>,
    /// Only write if the file still has this SHA-256 fingerprint.
    #[arg(long)]
    expect: Option<String>,
}

#[derive(Args)]
struct EditArgs {
    path: String,
    #[arg(long)]
    search: String,
    #[arg(long)]
    replace: String,
    /// Replace every occurrence instead of only the first.
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct RmArgs {
    path: String,
    #[arg(long)]
    expect: Option<String>,
}

#[derive(Subcommand)]
enum VersionsCmd {
    /// List archived versions of a file, oldest first.
    List(PathArg),
    /// Print the content of one archived version.
    Show(VersionArgs),
    /// Bring an archived version back as the current content.
    Restore(VersionArgs),
    /// Drop archived versions that fall outside the retention limits.
    Prune(PruneArgs),
}

#[derive(Args)]
struct VersionArgs {
    path: String,
    version: String,
}

#[derive(Args)]
struct PruneArgs {
    /// Prune one file; every tracked file when omitted.
    path: Option<String>,
    #[arg(long)]
    max_versions: Option<usize>,
    #[arg(long)]
    max_age_days: Option<u64>,
}

#[derive(Args)]
struct LogArgs {
    #[arg(long)]
    path: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Subcommand)]
enum ConfigCmd {
    Show,
}

fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;
    let verbose = cli.verbose;
    if let Err(err) = run(cli) {
        let handler = ErrorHandler::new().verbose(verbose);
        let enhanced = handler.enhance(&err);
        if json_mode {
            let _ = print_json_err(&enhanced.to_json());
        } else {
            eprint!("{}", handler.handle(&err));
        }
        std::process::exit(enhanced.error_type.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let flags = GlobalFlags {
        json: cli.json,
        verbose: cli.verbose,
        yes: cli.yes,
        no_input: cli.no_input,
    };
    match cli.command {
        Commands::Fingerprint(args) => run_fingerprint(&cwd, &flags, &args.path),
        Commands::Write(args) => run_write(&cwd, &flags, args),
        Commands::Edit(args) => run_edit(&cwd, &flags, args),
        Commands::Rm(args) => run_rm(&cwd, &flags, args),
        Commands::Versions { command } => run_versions(&cwd, &flags, command),
        Commands::Log(args) => run_log(&cwd, &flags, args),
        Commands::Config { command } => run_config(&cwd, &flags, command),
    }
}
