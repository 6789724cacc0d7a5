//! Snapshot sources and object stores
//!
//! This module provides the seams the backup orchestrator works against and
//! their implementations for HashiCorp Vault and OTC OBS.

mod object_store;
mod obs;
mod obs_signer;
mod snapshot_source;
mod vault;

pub use object_store::{ObjectStore, UploadReceipt};
pub use obs::{resolve_endpoint, ObsClient, OBS_ACL};
pub use obs_signer::{http_date, ObsSigner};
pub use snapshot_source::{Snapshot, SnapshotSource};
pub use vault::VaultClient;
