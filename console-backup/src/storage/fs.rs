//! Directory-backed object store: `{root}/{bucket}/{key}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{validate_key, ObjectStore, StorageError};

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

fn map_io(err: std::io::Error, bucket: &str, key: &str) -> StorageError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            bucket: bucket.to_string(),
            message: err.to_string(),
        },
        _ => StorageError::Backend(format!("{}/{}: {}", bucket, key, err)),
    }
}

/// Walk `bucket_dir` and return keys (relative, `/`-separated) under `prefix`.
fn scan_keys(bucket_dir: &Path, prefix: &str) -> Vec<String> {
    if !bucket_dir.exists() {
        return Vec::new();
    }
    let mut keys: Vec<String> = WalkDir::new(bucket_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(bucket_dir)
                .ok()
                .map(|rel| rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"))
        })
        .filter(|key| key.starts_with(prefix))
        .collect();
    keys.sort();
    keys
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| map_io(e, bucket, key))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| map_io(e, bucket, key))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_key(bucket)?;
        let bucket_dir = self.root.join(bucket);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || scan_keys(&bucket_dir, &prefix))
            .await
            .map_err(|e| StorageError::Backend(format!("listing task failed: {}", e)))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(e, bucket, key))
    }

    async fn rename(&self, bucket: &str, old_key: &str, new_key: &str) -> Result<(), StorageError> {
        let from = self.object_path(bucket, old_key)?;
        let to = self.object_path(bucket, new_key)?;
        if let Some(dir) = to.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| map_io(e, bucket, new_key))?;
        }
        tokio::fs::rename(&from, &to).await.map_err(|e| map_io(e, bucket, old_key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::remove_file(&path).await.map_err(|e| map_io(e, bucket, key))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_list_get_rename_delete() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.put("bkt", "backups/a.json", b"{\"a\":1}".to_vec()).await.unwrap();
        store.put("bkt", "backups/b.json", b"{}".to_vec()).await.unwrap();
        store.put("bkt", "other/c.json", b"{}".to_vec()).await.unwrap();

        let keys = store.list("bkt", "backups/").await.unwrap();
        assert_eq!(keys, vec!["backups/a.json".to_string(), "backups/b.json".to_string()]);
        assert_eq!(store.get("bkt", "backups/a.json").await.unwrap(), b"{\"a\":1}".to_vec());

        store.rename("bkt", "backups/a.json", "backups/renamed.json").await.unwrap();
        assert!(matches!(
            store.get("bkt", "backups/a.json").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(store.get("bkt", "backups/renamed.json").await.is_ok());

        store.delete("bkt", "backups/renamed.json").await.unwrap();
        assert_eq!(store.list("bkt", "backups/").await.unwrap(), vec!["backups/b.json".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("nothing-here", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.put("bkt", "../escape.json", vec![]).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
