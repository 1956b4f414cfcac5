//! Shared test data: one collection tree plus scope-level resources.

use chrono::{TimeZone, Utc};
use serde_json::json;

use super::{Snapshot, SnapshotSource, SnapshotType};
use crate::api::MockResourceApi;
use crate::resources::{AssistantEntry, CollectionEntry, EngineEntry, Resource, ResourceKind, RestoreContext};

pub const SCOPE: &str = "projects/src/locations/global";
pub const COL1: &str = "projects/src/locations/global/collections/col1";
pub const ENG1: &str = "projects/src/locations/global/collections/col1/engines/eng1";
pub const ASST1: &str = "projects/src/locations/global/collections/col1/engines/eng1/assistants/asst1";
pub const AGENT_A: &str = "projects/src/locations/global/collections/col1/engines/eng1/assistants/asst1/agents/agentA";
pub const AGENT_B: &str = "projects/src/locations/global/collections/col1/engines/eng1/assistants/asst1/agents/agentB";
pub const DS_PARENT: &str = "projects/src/locations/global/collections/default_collection";
pub const DS1: &str = "projects/src/locations/global/collections/default_collection/dataStores/ds1";
pub const DS2: &str = "projects/src/locations/global/collections/default_collection/dataStores/ds2";
pub const AUTH1: &str = "projects/src/locations/global/authorizations/auth1";
pub const RE_SCOPE: &str = "projects/src/locations/us-central1";
pub const RE1: &str = "projects/src/locations/us-central1/reasoningEngines/re1";

pub fn source_context() -> RestoreContext {
    RestoreContext::new("src", "global", "us-central1")
}

pub fn collection() -> Resource {
    Resource::new(COL1, "Collection 1")
}

pub fn engine() -> Resource {
    Resource::new(ENG1, "Engine 1")
        .with_field("dataStoreIds", json!(["ds1"]))
        .with_field("solutionType", json!("SOLUTION_TYPE_SEARCH"))
        .with_field("createTime", json!("2024-03-01T12:00:00Z"))
}

pub fn assistant() -> Resource {
    Resource::new(ASST1, "Assistant 1")
}

pub fn agent_a() -> Resource {
    Resource::new(AGENT_A, "Agent A").with_field(
        "adkAgentDefinition",
        json!({
            "authorizations": [AUTH1],
            "provisionedReasoningEngine": { "reasoningEngine": RE1 }
        }),
    )
}

pub fn agent_b() -> Resource {
    Resource::new(AGENT_B, "Agent B").with_field("description", json!("no external references"))
}

pub fn data_store(name: &str, label: &str) -> Resource {
    Resource::new(name, label).with_field("industryVertical", json!("GENERIC"))
}

/// Authorization as the live API returns it, secret included.
pub fn live_authorization() -> Resource {
    Resource::new(AUTH1, "Auth 1").with_field(
        "serverSideOauth2",
        json!({
            "clientId": "client-1",
            "clientSecret": "super-secret",
            "authorizationUri": "https://accounts.example.com/o/oauth2/auth",
            "tokenUri": "https://oauth2.example.com/token"
        }),
    )
}

pub fn reasoning_engine() -> Resource {
    Resource::new(RE1, "Runtime 1").with_field("spec", json!({"agentFramework": "google-adk"}))
}

/// Redacted DiscoveryResources snapshot of the fixture system.
pub fn scenario() -> Snapshot {
    let mut snapshot = Snapshot::new(SnapshotType::DiscoveryResources, SnapshotSource::from(&source_context()));
    snapshot.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    snapshot.collections = vec![CollectionEntry {
        resource: collection(),
        engines: vec![EngineEntry {
            resource: engine(),
            assistants: vec![AssistantEntry {
                resource: assistant(),
                agents: vec![agent_a(), agent_b()],
            }],
        }],
    }];
    snapshot.data_stores = vec![data_store(DS1, "Docs"), data_store(DS2, "Wiki")];
    let mut auth = live_authorization();
    auth.redact_client_secret();
    snapshot.authorizations = vec![auth];
    snapshot.reasoning_engines = vec![reasoning_engine()];
    snapshot
}

/// Seed a mock API with the same resources as [`scenario`], as a live system.
pub fn seed_live(api: &MockResourceApi) {
    api.insert(ResourceKind::Collection, SCOPE, collection());
    api.insert(ResourceKind::Engine, COL1, engine());
    api.insert(ResourceKind::Assistant, ENG1, assistant());
    api.insert(ResourceKind::Agent, ASST1, agent_a());
    api.insert(ResourceKind::Agent, ASST1, agent_b());
    api.insert(ResourceKind::DataStore, DS_PARENT, data_store(DS1, "Docs"));
    api.insert(ResourceKind::DataStore, DS_PARENT, data_store(DS2, "Wiki"));
    api.insert(ResourceKind::Authorization, SCOPE, live_authorization());
    api.insert(ResourceKind::ReasoningEngine, RE_SCOPE, reasoning_engine());
}
