//! Backup module for the agent platform console
//!
//! Builds point-in-time snapshots of the resource graph, stores them as JSON
//! blobs, and replays selected parts of a snapshot against a live project.
//!
//! ## Snapshot format
//!
//! A snapshot is a UTF-8 JSON document whose `type` tag names which sections it
//! populates (see [`SnapshotType`]). The tag is checked before any restore; a
//! mismatch is a hard error. Resource entries keep unknown API fields, so old
//! snapshots restore fine against newer APIs and vice versa.
//!
//! OAuth client secrets are never part of a snapshot. They are stripped when
//! the builder collects Authorizations and checked again on every write.

pub mod activity;
pub mod builder;
pub mod plan;
pub mod recovery;
pub mod restore;
pub mod selection;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;

pub use activity::{ActivityEntry, ActivityLevel, ActivityLog};
pub use builder::{SnapshotBuilder, TraversalWarning};
pub use plan::{PlannedItem, RestorePhase, RestorePlan};
pub use restore::{ItemOutcome, ItemStatus, RestoreExecutor, RestoreReport};
pub use selection::{ResolverOptions, SelectionSet, SelectionState};
pub use store::{SnapshotStore, StoredSnapshot};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

use crate::api::ApiError;
use crate::resources::{CollectionEntry, Resource, ResourceKind, RestoreContext};
use crate::storage::StorageError;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// A top-level listing failed; nothing useful can be backed up.
    #[error("cannot list {} under {parent}: {source}", kind.plural())]
    FatalTraversal {
        kind: ResourceKind,
        parent: String,
        source: ApiError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The snapshot cannot be used for the requested restore.
    #[error("invalid snapshot: {0}")]
    Validation(String),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("authorization {0} still carries a client secret")]
    SecretLeak(String),
}

/// Format tag of a snapshot document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
pub enum SnapshotType {
    DiscoveryResources,
    ReasoningEngine,
    Assistant,
    Agents,
    DataStores,
    Authorizations,
}

impl SnapshotType {
    /// File name prefix used by the snapshot store.
    pub fn store_prefix(&self) -> &'static str {
        match self {
            SnapshotType::DiscoveryResources => "discovery-backup",
            SnapshotType::ReasoningEngine => "reasoning-engine-backup",
            SnapshotType::Assistant => "assistant-backup",
            SnapshotType::Agents => "agents-backup",
            SnapshotType::DataStores => "data-stores-backup",
            SnapshotType::Authorizations => "authorizations-backup",
        }
    }

    /// Categorize a stored file name by its prefix.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        SnapshotType::iter().find(|t| {
            file_name
                .strip_prefix(t.store_prefix())
                .is_some_and(|rest| rest.starts_with('-'))
        })
    }

    pub fn parse(tag: &str) -> Option<Self> {
        SnapshotType::iter().find(|t| t.as_ref() == tag)
    }

    /// Deepest level of the collection tree this type captures, if any.
    pub fn tree_depth(&self) -> Option<ResourceKind> {
        match self {
            SnapshotType::DiscoveryResources | SnapshotType::Agents => Some(ResourceKind::Agent),
            SnapshotType::Assistant => Some(ResourceKind::Assistant),
            _ => None,
        }
    }

    /// Whether snapshots of this type carry resources of `kind`.
    pub fn includes(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Collection | ResourceKind::Engine | ResourceKind::Assistant | ResourceKind::Agent => {
                self.tree_depth().is_some_and(|deepest| tree_level(kind) <= tree_level(deepest))
            }
            ResourceKind::DataStore => {
                matches!(self, SnapshotType::DiscoveryResources | SnapshotType::DataStores)
            }
            ResourceKind::Authorization => matches!(
                self,
                SnapshotType::DiscoveryResources | SnapshotType::Agents | SnapshotType::Authorizations
            ),
            ResourceKind::ReasoningEngine => {
                matches!(self, SnapshotType::DiscoveryResources | SnapshotType::ReasoningEngine)
            }
        }
    }
}

fn tree_level(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::Collection => 0,
        ResourceKind::Engine => 1,
        ResourceKind::Assistant => 2,
        ResourceKind::Agent => 3,
        _ => u8::MAX,
    }
}

/// Where a snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotSource {
    pub project: String,
    pub location: String,
    pub reasoning_engine_location: String,
}

impl From<&RestoreContext> for SnapshotSource {
    fn from(ctx: &RestoreContext) -> Self {
        Self {
            project: ctx.project.clone(),
            location: ctx.location.clone(),
            reasoning_engine_location: ctx.reasoning_engine_location.clone(),
        }
    }
}

/// Complete snapshot document.
///
/// Created once by the builder and treated as read-only afterwards; restore
/// works on filtered copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,
    #[serde(default)]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: SnapshotSource,
    #[serde(default)]
    pub collections: Vec<CollectionEntry>,
    #[serde(default)]
    pub data_stores: Vec<Resource>,
    #[serde(default)]
    pub authorizations: Vec<Resource>,
    #[serde(default)]
    pub reasoning_engines: Vec<Resource>,
}

impl Snapshot {
    pub fn new(snapshot_type: SnapshotType, source: SnapshotSource) -> Self {
        Self {
            snapshot_type,
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            source,
            collections: Vec::new(),
            data_stores: Vec::new(),
            authorizations: Vec::new(),
            reasoning_engines: Vec::new(),
        }
    }

    /// Parse a stored document, refusing anything whose `type` tag differs
    /// from `expected`.
    pub fn from_json(bytes: &[u8], expected: SnapshotType) -> Result<Self, BackupError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::Validation(format!("not a JSON document: {}", e)))?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BackupError::Validation("missing 'type' tag".to_string()))?;
        if tag != expected.as_ref() {
            return Err(BackupError::Validation(format!(
                "expected a {} snapshot, found '{}'",
                expected, tag
            )));
        }
        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| BackupError::Validation(format!("malformed {} snapshot: {}", expected, e)))?;
        if snapshot.version > SNAPSHOT_VERSION {
            log::warn!(
                "[Backup] Snapshot version {} is newer than supported version {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot)
    }

    /// Read only the `type` tag of a stored document.
    pub fn peek_type(bytes: &[u8]) -> Result<SnapshotType, BackupError> {
        #[derive(Deserialize)]
        struct Tag {
            #[serde(rename = "type")]
            tag: Option<String>,
        }
        let Tag { tag } = serde_json::from_slice(bytes)
            .map_err(|e| BackupError::Validation(format!("not a JSON document: {}", e)))?;
        let tag = tag.ok_or_else(|| BackupError::Validation("missing 'type' tag".to_string()))?;
        SnapshotType::parse(&tag).ok_or_else(|| BackupError::Validation(format!("unknown snapshot type '{}'", tag)))
    }

    /// Serialize for storage. Fails if any secret slipped through.
    pub fn to_json(&self) -> Result<Vec<u8>, BackupError> {
        self.ensure_redacted()?;
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Visit every resource with its kind and its owning resource, parents
    /// before children.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(ResourceKind, &'a Resource, Option<&'a Resource>)) {
        for collection in &self.collections {
            visit(ResourceKind::Collection, &collection.resource, None);
            for engine in &collection.engines {
                visit(ResourceKind::Engine, &engine.resource, Some(&collection.resource));
                for assistant in &engine.assistants {
                    visit(ResourceKind::Assistant, &assistant.resource, Some(&engine.resource));
                    for agent in &assistant.agents {
                        visit(ResourceKind::Agent, agent, Some(&assistant.resource));
                    }
                }
            }
        }
        for data_store in &self.data_stores {
            visit(ResourceKind::DataStore, data_store, None);
        }
        for authorization in &self.authorizations {
            visit(ResourceKind::Authorization, authorization, None);
        }
        for reasoning_engine in &self.reasoning_engines {
            visit(ResourceKind::ReasoningEngine, reasoning_engine, None);
        }
    }

    /// All resources of one kind in document order.
    pub fn resources(&self, kind: ResourceKind) -> Vec<&Resource> {
        let mut out = Vec::new();
        self.walk(|k, resource, _| {
            if k == kind {
                out.push(resource);
            }
        });
        out
    }

    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&Resource> {
        self.resources(kind).into_iter().find(|r| r.name == name)
    }

    /// Owning resource of a tree member.
    pub fn parent_of(&self, name: &str) -> Option<&Resource> {
        let mut found = None;
        self.walk(|_, resource, parent| {
            if found.is_none() && resource.name == name {
                found = parent;
            }
        });
        found
    }

    pub fn counts(&self) -> BTreeMap<ResourceKind, usize> {
        let mut counts = BTreeMap::new();
        self.walk(|kind, _, _| *counts.entry(kind).or_insert(0) += 1);
        counts
    }

    pub fn item_count(&self) -> usize {
        self.counts().values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Human summary for the end of a backup, e.g. "2 collections, 3 data stores backed up".
    pub fn summary(&self) -> String {
        let counts = self.counts();
        let parts: Vec<String> = ResourceKind::iter()
            .filter(|kind| self.snapshot_type.includes(*kind))
            .map(|kind| format!("{} {}", counts.get(&kind).copied().unwrap_or(0), kind.plural()))
            .collect();
        if parts.is_empty() {
            "Nothing backed up".to_string()
        } else {
            format!("{} backed up", parts.join(", "))
        }
    }

    /// Strip every Authorization's client secret. Returns how many were removed.
    pub fn redact_secrets(&mut self) -> usize {
        self.authorizations
            .iter_mut()
            .filter_map(|auth| auth.redact_client_secret().then_some(()))
            .count()
    }

    pub fn ensure_redacted(&self) -> Result<(), BackupError> {
        match self.authorizations.iter().find(|a| a.has_client_secret()) {
            Some(leak) => Err(BackupError::SecretLeak(leak.name.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::fixtures;
    use serde_json::json;

    #[test]
    fn test_snapshot_type_prefixes() {
        for t in SnapshotType::iter() {
            let name = format!("{}-2024-05-01T10:00:00.000Z.json", t.store_prefix());
            assert_eq!(SnapshotType::from_file_name(&name), Some(t));
        }
        assert_eq!(SnapshotType::from_file_name("random.json"), None);
        assert_eq!(SnapshotType::parse("Agents"), Some(SnapshotType::Agents));
        assert_eq!(SnapshotType::parse("agents"), None);
    }

    #[test]
    fn test_type_sections() {
        assert!(SnapshotType::Assistant.includes(ResourceKind::Assistant));
        assert!(!SnapshotType::Assistant.includes(ResourceKind::Agent));
        assert!(SnapshotType::Agents.includes(ResourceKind::Authorization));
        assert!(!SnapshotType::DataStores.includes(ResourceKind::Collection));
        assert!(SnapshotType::DiscoveryResources.includes(ResourceKind::ReasoningEngine));
    }

    #[test]
    fn test_walk_counts_and_parents() {
        let snapshot = fixtures::scenario();
        let counts = snapshot.counts();
        assert_eq!(counts[&ResourceKind::Collection], 1);
        assert_eq!(counts[&ResourceKind::Agent], 2);
        assert_eq!(counts[&ResourceKind::DataStore], 2);
        assert_eq!(
            snapshot.parent_of(fixtures::AGENT_A).map(|r| r.name.as_str()),
            Some(fixtures::ASST1)
        );
        assert!(snapshot.parent_of(fixtures::COL1).is_none());
        assert_eq!(
            snapshot.summary(),
            "1 collections, 1 engines, 1 assistants, 2 agents, 2 data stores, 1 authorizations, 1 reasoning engines backed up"
        );
    }

    #[test]
    fn test_from_json_checks_type_tag() {
        let snapshot = fixtures::scenario();
        let bytes = snapshot.to_json().unwrap();

        let parsed = Snapshot::from_json(&bytes, SnapshotType::DiscoveryResources).unwrap();
        assert_eq!(parsed, snapshot);

        let err = Snapshot::from_json(&bytes, SnapshotType::Agents).unwrap_err();
        assert!(matches!(err, BackupError::Validation(ref m) if m.contains("DiscoveryResources")));

        assert_eq!(Snapshot::peek_type(&bytes).unwrap(), SnapshotType::DiscoveryResources);
        assert!(Snapshot::peek_type(br#"{"type": "Everything"}"#).is_err());

        let untagged = serde_json::to_vec(&json!({"createdAt": "2024-01-01T00:00:00Z"})).unwrap();
        assert!(matches!(
            Snapshot::from_json(&untagged, SnapshotType::Agents),
            Err(BackupError::Validation(_))
        ));
        assert!(matches!(
            Snapshot::from_json(b"not json", SnapshotType::Agents),
            Err(BackupError::Validation(_))
        ));
    }

    #[test]
    fn test_to_json_refuses_secrets() {
        let mut snapshot = fixtures::scenario();
        snapshot.authorizations[0]
            .fields
            .insert("serverSideOauth2".into(), json!({"clientId": "c", "clientSecret": "leak"}));
        assert!(matches!(snapshot.to_json(), Err(BackupError::SecretLeak(_))));
        assert_eq!(snapshot.redact_secrets(), 1);
        assert!(snapshot.to_json().is_ok());
    }
}
