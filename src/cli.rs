//! CLI parsing and command execution
//!
//! Flags take precedence over environment variables, which take precedence
//! over the YAML config file. Defaults fill whatever is left.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::backup::{self, CloudClients};
use crate::config::{self, BackupOptions, Settings};

#[derive(Parser, Debug)]
#[command(name = "vault-raft-backup")]
#[command(about = "Backup Vault data using Raft snapshots", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default is $HOME/.vault-raft-backup.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub options: BackupOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform a backup of Vault data using Raft snapshot
    Backup,
}

/// Merge flags/environment with the config file into validated settings
pub fn resolve_settings(options: BackupOptions, file: BackupOptions) -> Result<Settings> {
    let settings = options
        .merge(file)
        .into_settings()
        .context("Invalid configuration")?;
    debug!("Resolved settings: {:?}", settings);
    Ok(settings)
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command()
            .print_help()
            .context("Failed to show help")?;
        return Ok(());
    };

    match command {
        Commands::Backup => {
            let file = config::load_config_file(cli.config.as_deref())?;
            let settings = resolve_settings(cli.options, file)?;

            let clients = CloudClients::new(settings.identity.clone());
            let receipt = backup::run_backup(&clients, &settings.vault, &settings.obs)
                .await
                .context("Backup failed")?;

            info!("Backup completed successfully: {}", receipt);
        }
    }

    Ok(())
}
