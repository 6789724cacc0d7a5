//! Error taxonomy for a backup run
//!
//! Every failure maps to exactly one variant. Causes are carried as
//! `anyhow::Error` chains so the binary can print the full context.

use thiserror::Error;

/// Errors produced by the clients and the orchestrator
#[derive(Debug, Error)]
pub enum BackupError {
    /// Missing or invalid required input
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One of the clients could not be constructed
    #[error("failed to initialize {client} client")]
    ClientInit {
        client: &'static str,
        source: anyhow::Error,
    },

    /// Temporary AK/SK issuance failed
    #[error("failed to create temporary AK/SK")]
    CredentialExchange(#[source] anyhow::Error),

    /// Vault rejected the AppRole login
    #[error("failed to log in to Vault with AppRole")]
    Authentication(#[source] anyhow::Error),

    /// Raft snapshot capture failed
    #[error("failed to create Raft snapshot")]
    Snapshot(#[source] anyhow::Error),

    /// Object write failed
    #[error("failed to upload snapshot to OBS")]
    Upload(#[source] anyhow::Error),
}

impl BackupError {
    pub(crate) fn client_init(client: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::ClientInit {
            client,
            source: source.into(),
        }
    }
}
