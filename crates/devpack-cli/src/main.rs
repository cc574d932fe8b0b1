mod command_flows;
mod dispatch;
mod logging;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "devpack")]
#[command(about = "Snapshot, roll back and prune package installations", long_about = None)]
struct Cli {
    /// Installation prefix. Defaults to DEVPACK_HOME, then ~/.devpack.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug). DEVPACK_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Rollback {
        #[command(subcommand)]
        command: RollbackCommands,
    },
    Clean {
        #[command(subcommand)]
        command: CleanCommands,
    },
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum RollbackCommands {
    /// List snapshots, newest first.
    List {
        package: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Restore a snapshot over the package installation. Defaults to the newest.
    Restore {
        package: String,
        timestamp: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CleanCommands {
    Backups(CleanBackupsArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct CleanBackupsArgs {
    package: Option<String>,
    #[arg(long, value_name = "DAYS")]
    older_than: Option<u32>,
    #[arg(long, value_name = "COUNT")]
    keep: Option<usize>,
    #[arg(long)]
    dry_run: bool,
    #[arg(short, long)]
    force: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum BackupCommands {
    Create {
        package: String,
        /// Compare SHA-256 digests of every file after copying.
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    dispatch::run_cli(cli)
}

#[cfg(test)]
mod tests;
