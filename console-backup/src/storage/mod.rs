//! Object storage for snapshot blobs.
//!
//! One call, one request, no retries. Callers decide
//! whether a failed call is worth repeating.

mod fs;
mod gcs;
mod memory;

pub use fs::FsObjectStore;
pub use gcs::{GcsObjectStore, DEFAULT_GCS_URL};
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("permission denied on {bucket}: {message}")]
    PermissionDenied { bucket: String, message: String },
    #[error("object {bucket}/{key} already exists")]
    AlreadyExists { bucket: String, key: String },
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("storage request failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn rename(&self, bucket: &str, old_key: &str, new_key: &str) -> Result<(), StorageError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape a bucket or are otherwise unusable.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part == ".." || part == ".")
        || key.contains('\0');
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("backups/discovery-backup-2024.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a/../b").is_err());
    }
}
