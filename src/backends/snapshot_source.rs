use bytes::Bytes;

use crate::error::BackupError;

/// Raft snapshot exactly as the secrets store produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    data: Bytes,
}

impl Snapshot {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Trait for secrets stores that can produce a replicated-log snapshot
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Exchange a role credential pair for a session token kept on the client
    async fn login(&mut self, role_id: &str, secret_id: &str) -> Result<(), BackupError>;

    /// Capture a point-in-time snapshot; requires a prior successful login
    async fn create_snapshot(&self) -> Result<Snapshot, BackupError>;

    /// Get the source type name for display purposes
    fn source_type(&self) -> &'static str;
}
