//! Resource graph model.
//!
//! Seven resource kinds live in the agent platform. Four of them form a strict
//! ownership chain (Collection → Engine → Assistant → Agent); the other three
//! are scoped to a project/location only and are referenced by name or id:
//!
//! - an Engine references DataStores by id
//! - an Agent references at most one Authorization and at most one ReasoningEngine
//!
//! Names are the only stable identity. Everything in here is plain data; the
//! traversal and restore logic lives in [`crate::backup`].

mod entries;
mod names;

pub use entries::{
    AssistantEntry, CollectionEntry, EngineEntry, Resource, payload_authorization, set_payload_authorization,
    set_payload_client_secret, set_payload_reasoning_engine,
};
pub use names::{NameError, ResourceName, ResourceRef};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// The closed set of resource kinds handled by backup and restore.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
pub enum ResourceKind {
    Collection,
    Engine,
    Assistant,
    Agent,
    DataStore,
    Authorization,
    ReasoningEngine,
}

impl ResourceKind {
    /// Path segment that precedes an id of this kind in a resource name.
    pub fn collection_segment(&self) -> &'static str {
        match self {
            ResourceKind::Collection => "collections",
            ResourceKind::Engine => "engines",
            ResourceKind::Assistant => "assistants",
            ResourceKind::Agent => "agents",
            ResourceKind::DataStore => "dataStores",
            ResourceKind::Authorization => "authorizations",
            ResourceKind::ReasoningEngine => "reasoningEngines",
        }
    }

    pub fn from_collection_segment(segment: &str) -> Option<Self> {
        match segment {
            "collections" => Some(ResourceKind::Collection),
            "engines" => Some(ResourceKind::Engine),
            "assistants" => Some(ResourceKind::Assistant),
            "agents" => Some(ResourceKind::Agent),
            "dataStores" => Some(ResourceKind::DataStore),
            "authorizations" => Some(ResourceKind::Authorization),
            "reasoningEngines" => Some(ResourceKind::ReasoningEngine),
            _ => None,
        }
    }

    /// Query parameter carrying the caller-chosen id on create calls.
    pub fn id_param(&self) -> &'static str {
        match self {
            ResourceKind::Collection => "collectionId",
            ResourceKind::Engine => "engineId",
            ResourceKind::Assistant => "assistantId",
            ResourceKind::Agent => "agentId",
            ResourceKind::DataStore => "dataStoreId",
            ResourceKind::Authorization => "authorizationId",
            ResourceKind::ReasoningEngine => "reasoningEngineId",
        }
    }

    /// Owning kind, for the four kinds that sit in the ownership chain.
    pub fn parent_kind(&self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Engine => Some(ResourceKind::Collection),
            ResourceKind::Assistant => Some(ResourceKind::Engine),
            ResourceKind::Agent => Some(ResourceKind::Assistant),
            _ => None,
        }
    }

    /// Plural label used in summaries and log lines.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Collection => "collections",
            ResourceKind::Engine => "engines",
            ResourceKind::Assistant => "assistants",
            ResourceKind::Agent => "agents",
            ResourceKind::DataStore => "data stores",
            ResourceKind::Authorization => "authorizations",
            ResourceKind::ReasoningEngine => "reasoning engines",
        }
    }

    /// Reasoning engines are served by a different, regional API.
    pub fn is_regional(&self) -> bool {
        matches!(self, ResourceKind::ReasoningEngine)
    }
}

/// Explicit description of "where" a backup reads from or a restore writes to.
///
/// Threaded through the builder, planner and executor instead of living in
/// shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreContext {
    pub project: String,
    pub location: String,
    pub reasoning_engine_location: String,
    /// Only traverse this collection id (backup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_filter: Option<String>,
    /// Only traverse this engine id (backup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_filter: Option<String>,
}

impl RestoreContext {
    pub fn new(project: &str, location: &str, reasoning_engine_location: &str) -> Self {
        Self {
            project: project.to_string(),
            location: location.to_string(),
            reasoning_engine_location: reasoning_engine_location.to_string(),
            collection_filter: None,
            engine_filter: None,
        }
    }

    pub fn with_collection(mut self, collection_id: Option<String>) -> Self {
        self.collection_filter = collection_id;
        self
    }

    pub fn with_engine(mut self, engine_id: Option<String>) -> Self {
        self.engine_filter = engine_id;
        self
    }

    /// `projects/{p}/locations/{l}` for discovery resources.
    pub fn scope(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.location)
    }

    /// `projects/{p}/locations/{region}` for reasoning engines.
    pub fn reasoning_engine_scope(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.reasoning_engine_location)
    }

    /// Parent under which scope-level kinds are listed and created.
    ///
    /// Data stores live under the implicit `default_collection`.
    pub fn scope_parent(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::DataStore => format!("{}/collections/default_collection", self.scope()),
            ResourceKind::ReasoningEngine => self.reasoning_engine_scope(),
            _ => self.scope(),
        }
    }

    /// Project/location pair a resource of `kind` is moved to on restore.
    pub fn location_for(&self, kind: ResourceKind) -> &str {
        if kind.is_regional() {
            &self.reasoning_engine_location
        } else {
            &self.location
        }
    }

    pub fn accepts_collection(&self, collection_id: &str) -> bool {
        self.collection_filter.as_deref().is_none_or(|c| c == collection_id)
    }

    pub fn accepts_engine(&self, engine_id: &str) -> bool {
        self.engine_filter.as_deref().is_none_or(|e| e == engine_id)
    }
}
