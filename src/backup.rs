use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::backends::{ObjectStore, ObsClient, SnapshotSource, UploadReceipt, VaultClient};
use crate::config::{IdentityConfig, ObsConfig, VaultConfig};
use crate::error::BackupError;

/// Steps of a backup run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StorageInit,
    SecretsInit,
    Login,
    Snapshot,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::StorageInit => "storage client initialization",
            Stage::SecretsInit => "Vault client initialization",
            Stage::Login => "Vault login",
            Stage::Snapshot => "Raft snapshot",
            Stage::Upload => "snapshot upload",
        };
        f.write_str(name)
    }
}

/// A backup run that stopped at `stage`
#[derive(Debug, Error)]
#[error("{stage} failed")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: BackupError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, BackupError> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

/// Constructs the two clients a backup needs
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    async fn object_store(&self, obs: &ObsConfig) -> Result<Box<dyn ObjectStore>, BackupError>;

    async fn snapshot_source(
        &self,
        vault: &VaultConfig,
    ) -> Result<Box<dyn SnapshotSource>, BackupError>;
}

/// Production factory: OBS signed through OTC IAM, and HashiCorp Vault
pub struct CloudClients {
    identity: IdentityConfig,
}

impl CloudClients {
    pub fn new(identity: IdentityConfig) -> Self {
        Self { identity }
    }
}

#[async_trait::async_trait]
impl ClientFactory for CloudClients {
    async fn object_store(&self, obs: &ObsConfig) -> Result<Box<dyn ObjectStore>, BackupError> {
        let client = ObsClient::init(&self.identity, obs).await?;
        Ok(Box::new(client))
    }

    async fn snapshot_source(
        &self,
        vault: &VaultConfig,
    ) -> Result<Box<dyn SnapshotSource>, BackupError> {
        let client = VaultClient::new(vault)?;
        Ok(Box::new(client))
    }
}

/// Capture a Raft snapshot and upload it.
///
/// Runs storage init, Vault init, login, snapshot and upload strictly in that
/// order and stops at the first failure. Nothing is retried or rolled back.
pub async fn run_backup(
    factory: &dyn ClientFactory,
    vault: &VaultConfig,
    obs: &ObsConfig,
) -> Result<UploadReceipt, StageError> {
    let store = factory.object_store(obs).await.at(Stage::StorageInit)?;
    info!("{} client initialized", store.store_type());

    let mut source = factory
        .snapshot_source(vault)
        .await
        .at(Stage::SecretsInit)?;
    info!("{} client initialized for {}", source.source_type(), vault.address);

    source
        .login(&vault.role_id, &vault.secret_id)
        .await
        .at(Stage::Login)?;

    let snapshot = source.create_snapshot().await.at(Stage::Snapshot)?;
    info!("Snapshot captured ({} bytes)", snapshot.len());

    store
        .upload(snapshot, &obs.bucket_name, &obs.object_name)
        .await
        .at(Stage::Upload)
}
