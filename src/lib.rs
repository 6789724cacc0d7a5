//! Vault Raft Backup Library
//!
//! Captures a HashiCorp Vault Raft snapshot and uploads it to OTC Object
//! Storage Service, authenticating through OTC IAM.

pub mod backends;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;

pub use backup::{run_backup, ClientFactory, CloudClients, Stage, StageError};
pub use config::{IdentityConfig, ObsConfig, Settings, VaultConfig};
pub use error::BackupError;
