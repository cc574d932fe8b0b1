use anyhow::Result;

use crate::command_flows::{
    run_backup_create, run_clean_backups, run_config_show, run_rollback_list,
    run_rollback_restore, CliContext,
};
use crate::{BackupCommands, CleanCommands, Cli, Commands, ConfigCommands, RollbackCommands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let ctx = CliContext::load(cli.prefix.as_deref())?;

    match cli.command {
        Commands::Rollback { command } => match command {
            RollbackCommands::List { package, json } => {
                run_rollback_list(&ctx, package.as_deref(), json)?;
            }
            RollbackCommands::Restore { package, timestamp } => {
                run_rollback_restore(&ctx, &package, timestamp.as_deref())?;
            }
        },
        Commands::Clean { command } => match command {
            CleanCommands::Backups(args) => {
                run_clean_backups(&ctx, &args)?;
            }
        },
        Commands::Backup { command } => match command {
            BackupCommands::Create { package, verify } => {
                run_backup_create(&ctx, &package, verify)?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                run_config_show(&ctx)?;
            }
        },
    }

    Ok(())
}
