use std::fmt;

use super::snapshot_source::Snapshot;
use crate::error::BackupError;

/// Provider response metadata for a finished upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    pub size: usize,
    pub etag: Option<String>,
    pub request_id: Option<String>,
    pub version_id: Option<String>,
}

impl fmt::Display for UploadReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({} bytes", self.bucket, self.key, self.size)?;
        if let Some(etag) = &self.etag {
            write!(f, ", etag {}", etag)?;
        }
        if let Some(version_id) = &self.version_id {
            write!(f, ", version {}", version_id)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, ", request {}", request_id)?;
        }
        write!(f, ")")
    }
}

/// Trait for object stores receiving the snapshot
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the snapshot as a private object; one attempt, no retry
    async fn upload(
        &self,
        snapshot: Snapshot,
        bucket: &str,
        key: &str,
    ) -> Result<UploadReceipt, BackupError>;

    /// Get the store type name for display purposes
    fn store_type(&self) -> &'static str;
}
