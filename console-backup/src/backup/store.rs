//! Snapshot store adapter.
//!
//! Snapshots are stored as `{prefix}{type-prefix}-{ISO8601}.json` objects in a
//! single bucket. No retries here; every error goes straight to the caller.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::{BackupError, Snapshot, SnapshotType};
use crate::storage::{ObjectStore, StorageError};

/// A stored snapshot name with its type, if the name carries a known prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub snapshot_type: Option<SnapshotType>,
}

pub struct SnapshotStore {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl SnapshotStore {
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: &str, prefix: &str) -> Self {
        let prefix = match prefix.trim_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };
        Self {
            objects,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend_name(&self) -> &'static str {
        self.objects.backend_name()
    }

    /// Generated file name for a snapshot of `snapshot_type` taken at `at`.
    pub fn file_name(snapshot_type: SnapshotType, at: DateTime<Utc>) -> String {
        format!(
            "{}-{}.json",
            snapshot_type.store_prefix(),
            at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }

    fn key(&self, name: &str) -> Result<String, BackupError> {
        if name.is_empty() || name.contains('/') {
            return Err(StorageError::InvalidKey(name.to_string()).into());
        }
        Ok(format!("{}{}", self.prefix, name))
    }

    /// Store a snapshot under `name`, or under a generated name when `None`.
    /// Refuses documents that still carry a client secret.
    pub async fn put(&self, snapshot: &Snapshot, name: Option<&str>) -> Result<String, BackupError> {
        let bytes = snapshot.to_json()?;
        let name = match name {
            Some(n) => with_json_extension(n),
            None => Self::file_name(snapshot.snapshot_type, snapshot.created_at),
        };
        let key = self.key(&name)?;
        self.objects.put(&self.bucket, &key, bytes).await?;
        log::info!(
            "[Store] Saved {} ({} items) to {} {}/{}",
            name,
            snapshot.item_count(),
            self.objects.backend_name(),
            self.bucket,
            key
        );
        Ok(name)
    }

    /// Stored snapshot names, newest first, optionally limited to a name prefix.
    pub async fn list(&self, name_prefix: Option<&str>) -> Result<Vec<String>, BackupError> {
        let search = format!("{}{}", self.prefix, name_prefix.unwrap_or(""));
        let keys = self.objects.list(&self.bucket, &search).await?;
        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(&self.prefix))
            .filter(|n| !n.contains('/') && n.ends_with(".json"))
            .map(str::to_string)
            .collect();
        names.sort_by(|a, b| match (name_timestamp(a), name_timestamp(b)) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
        Ok(names)
    }

    /// Every stored snapshot with its type resolved from the name alone.
    pub async fn list_typed(&self) -> Result<Vec<StoredSnapshot>, BackupError> {
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .map(|name| StoredSnapshot {
                snapshot_type: SnapshotType::from_file_name(&name),
                name,
            })
            .collect())
    }

    /// Names grouped by type prefix. Names with no known prefix are left out.
    pub async fn list_categorized(&self) -> Result<BTreeMap<SnapshotType, Vec<String>>, BackupError> {
        Ok(Self::categorize(&self.list_typed().await?))
    }

    /// Group already listed snapshots by type, keeping their order.
    pub fn categorize(stored: &[StoredSnapshot]) -> BTreeMap<SnapshotType, Vec<String>> {
        let mut categories: BTreeMap<SnapshotType, Vec<String>> = BTreeMap::new();
        for snapshot in stored {
            match snapshot.snapshot_type {
                Some(t) => categories.entry(t).or_default().push(snapshot.name.clone()),
                None => log::debug!("[Store] Ignoring uncategorized object {}", snapshot.name),
            }
        }
        categories
    }

    pub async fn get(&self, name: &str) -> Result<Vec<u8>, BackupError> {
        let key = self.key(name)?;
        Ok(self.objects.get(&self.bucket, &key).await?)
    }

    /// Download and parse a snapshot of whatever type it declares.
    pub async fn load_any(&self, name: &str) -> Result<Snapshot, BackupError> {
        let bytes = self.get(name).await?;
        Snapshot::from_json(&bytes, Snapshot::peek_type(&bytes)?)
    }

    /// Download and parse a snapshot, checking its type tag.
    pub async fn load(&self, name: &str, expected: SnapshotType) -> Result<Snapshot, BackupError> {
        let bytes = self.get(name).await?;
        Snapshot::from_json(&bytes, expected)
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<String, BackupError> {
        let new_name = with_json_extension(new_name);
        let old_key = self.key(old_name)?;
        let new_key = self.key(&new_name)?;
        match self.objects.get(&self.bucket, &new_key).await {
            Ok(_) => {
                return Err(StorageError::AlreadyExists {
                    bucket: self.bucket.clone(),
                    key: new_key,
                }
                .into());
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.objects.rename(&self.bucket, &old_key, &new_key).await?;
        log::info!("[Store] Renamed {} to {}", old_name, new_name);
        Ok(new_name)
    }

    pub async fn delete(&self, name: &str) -> Result<(), BackupError> {
        let key = self.key(name)?;
        self.objects.delete(&self.bucket, &key).await?;
        log::info!("[Store] Deleted {}", name);
        Ok(())
    }
}

/// Creation time encoded in a generated name, `{type-prefix}-{ISO8601}.json`.
fn name_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let snapshot_type = SnapshotType::from_file_name(name)?;
    let stamp = name
        .strip_prefix(snapshot_type.store_prefix())?
        .strip_prefix('-')?
        .strip_suffix(".json")?;
    DateTime::parse_from_rfc3339(stamp).ok().map(|t| t.with_timezone(&Utc))
}

fn with_json_extension(name: &str) -> String {
    if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    }
}
