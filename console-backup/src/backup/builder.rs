//! Snapshot builder.
//!
//! Walks the live system level by level (collections, then all of their
//! engines, then all assistants, then all agents). Sibling listings within a
//! level run concurrently; a level never starts before its parent level is
//! complete. Scope-level kinds are listed alongside the tree.
//!
//! Failure policy: a top-level listing failure aborts the build. A child
//! listing failure is recorded as a [`TraversalWarning`], that node's children
//! stay empty, and the walk carries on.

use futures_util::future::join_all;
use serde::Serialize;

use super::{ActivityLog, BackupError, Snapshot, SnapshotSource, SnapshotType};
use crate::api::{ApiError, ResourceApi};
use crate::resources::{AssistantEntry, CollectionEntry, EngineEntry, Resource, ResourceKind, RestoreContext};

/// A child listing that failed during traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalWarning {
    pub kind: ResourceKind,
    pub parent: String,
    pub message: String,
}

/// Result of a build: the snapshot plus anything that went missing.
#[derive(Debug, Clone)]
pub struct BuiltSnapshot {
    pub snapshot: Snapshot,
    pub warnings: Vec<TraversalWarning>,
}

pub struct SnapshotBuilder<'a> {
    api: &'a dyn ResourceApi,
    activity: &'a ActivityLog,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(api: &'a dyn ResourceApi, activity: &'a ActivityLog) -> Self {
        Self { api, activity }
    }

    pub async fn build(&self, ctx: &RestoreContext, snapshot_type: SnapshotType) -> Result<BuiltSnapshot, BackupError> {
        self.activity
            .info(format!("Starting {} backup of {}", snapshot_type, ctx.scope()));

        let mut warnings = Vec::new();
        let (tree, data_stores, authorizations, reasoning_engines) = tokio::join!(
            self.collect_tree(ctx, snapshot_type, &mut warnings),
            self.list_scope(ctx, snapshot_type, ResourceKind::DataStore),
            self.list_scope(ctx, snapshot_type, ResourceKind::Authorization),
            self.list_scope(ctx, snapshot_type, ResourceKind::ReasoningEngine),
        );

        let mut snapshot = Snapshot::new(snapshot_type, SnapshotSource::from(ctx));
        snapshot.collections = tree?;
        snapshot.data_stores = data_stores?;
        snapshot.authorizations = authorizations?;
        snapshot.reasoning_engines = reasoning_engines?;

        // Unconditional: nothing downstream may ever see a client secret.
        let redacted = snapshot.redact_secrets();
        if redacted > 0 {
            self.activity
                .info(format!("Removed client secrets from {} authorizations", redacted));
        }
        snapshot.ensure_redacted()?;

        if warnings.is_empty() {
            self.activity.success(snapshot.summary());
        } else {
            self.activity.warn(format!(
                "{} ({} listings failed, see warnings)",
                snapshot.summary(),
                warnings.len()
            ));
        }

        Ok(BuiltSnapshot { snapshot, warnings })
    }

    async fn list_scope(
        &self,
        ctx: &RestoreContext,
        snapshot_type: SnapshotType,
        kind: ResourceKind,
    ) -> Result<Vec<Resource>, BackupError> {
        if !snapshot_type.includes(kind) {
            return Ok(Vec::new());
        }
        let parent = ctx.scope_parent(kind);
        let resources = self
            .api
            .list(kind, &parent)
            .await
            .map_err(|source| self.fatal(kind, &parent, source))?;
        self.activity
            .info(format!("Found {} {}", resources.len(), kind.plural()));
        Ok(resources)
    }

    async fn collect_tree(
        &self,
        ctx: &RestoreContext,
        snapshot_type: SnapshotType,
        warnings: &mut Vec<TraversalWarning>,
    ) -> Result<Vec<CollectionEntry>, BackupError> {
        let Some(depth) = snapshot_type.tree_depth() else {
            return Ok(Vec::new());
        };

        let scope = ctx.scope();
        let collections = self
            .api
            .list(ResourceKind::Collection, &scope)
            .await
            .map_err(|source| self.fatal(ResourceKind::Collection, &scope, source))?;

        let mut tree: Vec<CollectionEntry> = collections
            .into_iter()
            .filter(|c| ctx.accepts_collection(c.id()))
            .map(|resource| CollectionEntry {
                resource,
                engines: Vec::new(),
            })
            .collect();
        self.activity
            .info(format!("Found {} collections", tree.len()));

        let parents: Vec<String> = tree.iter().map(|c| c.resource.name.clone()).collect();
        let mut engine_lists = self
            .list_children(ResourceKind::Engine, &parents, warnings)
            .await
            .into_iter();
        for collection in tree.iter_mut() {
            collection.engines = engine_lists
                .next()
                .unwrap_or_default()
                .into_iter()
                .filter(|e| ctx.accepts_engine(e.id()))
                .map(|resource| EngineEntry {
                    resource,
                    assistants: Vec::new(),
                })
                .collect();
        }

        if depth < ResourceKind::Assistant {
            return Ok(tree);
        }

        let parents: Vec<String> = engines(&tree).map(|e| e.resource.name.clone()).collect();
        let mut assistant_lists = self
            .list_children(ResourceKind::Assistant, &parents, warnings)
            .await
            .into_iter();
        for engine in tree.iter_mut().flat_map(|c| c.engines.iter_mut()) {
            engine.assistants = assistant_lists
                .next()
                .unwrap_or_default()
                .into_iter()
                .map(|resource| AssistantEntry {
                    resource,
                    agents: Vec::new(),
                })
                .collect();
        }

        if depth < ResourceKind::Agent {
            return Ok(tree);
        }

        let parents: Vec<String> = engines(&tree)
            .flat_map(|e| e.assistants.iter())
            .map(|a| a.resource.name.clone())
            .collect();
        let mut agent_lists = self
            .list_children(ResourceKind::Agent, &parents, warnings)
            .await
            .into_iter();
        for assistant in tree
            .iter_mut()
            .flat_map(|c| c.engines.iter_mut())
            .flat_map(|e| e.assistants.iter_mut())
        {
            assistant.agents = agent_lists.next().unwrap_or_default();
        }

        Ok(tree)
    }

    /// List `kind` under every parent concurrently. Failed listings yield an
    /// empty list and a warning; results come back in `parents` order.
    async fn list_children(
        &self,
        kind: ResourceKind,
        parents: &[String],
        warnings: &mut Vec<TraversalWarning>,
    ) -> Vec<Vec<Resource>> {
        let results = join_all(parents.iter().map(|parent| self.api.list(kind, parent))).await;

        let mut total = 0;
        let lists: Vec<Vec<Resource>> = results
            .into_iter()
            .zip(parents)
            .map(|(result, parent)| match result {
                Ok(children) => {
                    total += children.len();
                    children
                }
                Err(err) => {
                    self.activity
                        .warn(format!("Could not list {} under {}: {}", kind.plural(), parent, err));
                    warnings.push(TraversalWarning {
                        kind,
                        parent: parent.clone(),
                        message: err.to_string(),
                    });
                    Vec::new()
                }
            })
            .collect();

        if !parents.is_empty() {
            self.activity.info(format!("Found {} {}", total, kind.plural()));
        }
        lists
    }

    fn fatal(&self, kind: ResourceKind, parent: &str, source: ApiError) -> BackupError {
        let err = BackupError::FatalTraversal {
            kind,
            parent: parent.to_string(),
            source,
        };
        self.activity.error(format!("Backup aborted: {}", err));
        err
    }
}

fn engines(tree: &[CollectionEntry]) -> impl Iterator<Item = &EngineEntry> {
    tree.iter().flat_map(|c| c.engines.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, MockResourceApi};
    use crate::backup::fixtures::{self, ASST1, COL1, DS_PARENT, ENG1, SCOPE};

    async fn build(api: &MockResourceApi, ctx: &RestoreContext, t: SnapshotType) -> Result<BuiltSnapshot, BackupError> {
        let activity = ActivityLog::new("[Backup]");
        SnapshotBuilder::new(api, &activity).build(ctx, t).await
    }

    #[tokio::test]
    async fn test_full_backup_matches_live_system() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);

        let built = build(&api, &fixtures::source_context(), SnapshotType::DiscoveryResources)
            .await
            .unwrap();
        assert!(built.warnings.is_empty());

        let mut expected = fixtures::scenario();
        expected.created_at = built.snapshot.created_at;
        assert_eq!(built.snapshot, expected);
    }

    #[tokio::test]
    async fn test_secrets_are_always_redacted() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);

        for t in [SnapshotType::DiscoveryResources, SnapshotType::Agents, SnapshotType::Authorizations] {
            let built = build(&api, &fixtures::source_context(), t).await.unwrap();
            assert_eq!(built.snapshot.authorizations.len(), 1);
            assert!(built.snapshot.authorizations.iter().all(|a| !a.has_client_secret()));
            assert_eq!(
                built.snapshot.authorizations[0].fields["serverSideOauth2"]["clientId"],
                "client-1"
            );
        }
    }

    #[tokio::test]
    async fn test_top_level_failure_is_fatal() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);
        api.fail_list(ResourceKind::Collection, SCOPE, ApiError::other("permission denied"));

        let err = build(&api, &fixtures::source_context(), SnapshotType::Agents)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackupError::FatalTraversal {
                kind: ResourceKind::Collection,
                ..
            }
        ));

        api.fail_list(ResourceKind::DataStore, DS_PARENT, ApiError::other("unavailable"));
        let err = build(&api, &fixtures::source_context(), SnapshotType::DataStores)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::FatalTraversal { kind: ResourceKind::DataStore, .. }));
    }

    #[tokio::test]
    async fn test_child_failure_is_a_warning() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);
        api.fail_list(ResourceKind::Assistant, ENG1, ApiError::other("backend error"));

        let built = build(&api, &fixtures::source_context(), SnapshotType::DiscoveryResources)
            .await
            .unwrap();
        assert_eq!(
            built.warnings,
            vec![TraversalWarning {
                kind: ResourceKind::Assistant,
                parent: ENG1.to_string(),
                message: "backend error".to_string(),
            }]
        );
        let engine = &built.snapshot.collections[0].engines[0];
        assert!(engine.assistants.is_empty());
        assert_eq!(built.snapshot.data_stores.len(), 2);
        assert!(!api.calls().iter().any(|c| matches!(c, ApiCall::List { kind: ResourceKind::Agent, .. })));
    }

    #[tokio::test]
    async fn test_snapshot_type_limits_traversal() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);

        let built = build(&api, &fixtures::source_context(), SnapshotType::Assistant).await.unwrap();
        let counts = built.snapshot.counts();
        assert_eq!(counts.get(&ResourceKind::Assistant), Some(&1));
        assert_eq!(counts.get(&ResourceKind::Agent), None);
        assert_eq!(counts.get(&ResourceKind::DataStore), None);
        assert!(!api.calls().contains(&ApiCall::List {
            kind: ResourceKind::Agent,
            parent: ASST1.to_string()
        }));

        let built = build(&api, &fixtures::source_context(), SnapshotType::ReasoningEngine).await.unwrap();
        assert!(built.snapshot.collections.is_empty());
        assert_eq!(built.snapshot.reasoning_engines.len(), 1);
    }

    #[tokio::test]
    async fn test_collection_filter() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);
        api.insert(
            ResourceKind::Collection,
            SCOPE,
            Resource::new("projects/src/locations/global/collections/col2", "Other"),
        );

        let ctx = fixtures::source_context().with_collection(Some("col1".to_string()));
        let built = build(&api, &ctx, SnapshotType::Agents).await.unwrap();
        assert_eq!(built.snapshot.collections.len(), 1);
        assert_eq!(built.snapshot.collections[0].resource.name, COL1);
        assert!(!api.calls().contains(&ApiCall::List {
            kind: ResourceKind::Engine,
            parent: "projects/src/locations/global/collections/col2".to_string()
        }));
    }
}
