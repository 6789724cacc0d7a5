//! vault-raft-backup CLI
//!
//! This is the main entry point for the CLI application.

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use vault_raft_backup::cli;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    if let Err(err) = cli::execute(cli).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
