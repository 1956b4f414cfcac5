//! Typed snapshot entries.
//!
//! Every entry keeps the API's JSON fields it does not model explicitly in a
//! flattened map, so a backup written today still carries fields a newer API
//! version adds and a restore sends them back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ResourceName, ResourceRef};

/// Fields the API computes itself and rejects (or ignores) on create.
const OUTPUT_ONLY_FIELDS: &[&str] = &[
    "name",
    "createTime",
    "updateTime",
    "etag",
    "state",
    "servingConfigDataStore",
    "defaultSchemaId",
    "contentConfig",
];

/// Where an Agent may carry its Authorization reference, newest layout first.
const AUTHORIZATION_POINTERS: &[&str] = &[
    "/authorizationConfig/toolAuthorizations",
    "/adkAgentDefinition/authorizations",
    "/authorizations",
];

const REASONING_ENGINE_POINTER: &str = "/adkAgentDefinition/provisionedReasoningEngine/reasoningEngine";

const CLIENT_SECRET_POINTER: &str = "/serverSideOauth2/clientSecret";

/// A single API resource as stored in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: Some(display_name.to_string()),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(self.name.clone(), self.display_name.clone().unwrap_or_default())
    }

    pub fn resource_name(&self) -> Result<ResourceName, super::NameError> {
        ResourceName::parse(&self.name)
    }

    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or("")
    }

    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => self.id(),
        }
    }

    /// DataStore ids an Engine is bound to.
    pub fn data_store_ids(&self) -> Vec<String> {
        self.fields
            .get("dataStoreIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    /// Authorization an Agent references, if any.
    pub fn authorization_ref(&self) -> Option<String> {
        payload_authorization(&Value::Object(self.fields.clone()))
    }

    /// ReasoningEngine an Agent delegates to, if any.
    pub fn reasoning_engine_ref(&self) -> Option<String> {
        let value = Value::Object(self.fields.clone());
        value
            .pointer(REASONING_ENGINE_POINTER)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Whether an Authorization still carries a non-empty client secret.
    pub fn has_client_secret(&self) -> bool {
        let value = Value::Object(self.fields.clone());
        value
            .pointer(CLIENT_SECRET_POINTER)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    }

    /// Drop the OAuth client secret. Returns true if one was present.
    pub fn redact_client_secret(&mut self) -> bool {
        self.fields
            .get_mut("serverSideOauth2")
            .and_then(Value::as_object_mut)
            .and_then(|oauth| oauth.remove("clientSecret"))
            .is_some()
    }

    /// JSON body for a create call: API fields minus output-only ones.
    pub fn create_payload(&self) -> Value {
        let mut body = self.fields.clone();
        for field in OUTPUT_ONLY_FIELDS {
            body.remove(*field);
        }
        if let Some(display_name) = &self.display_name {
            body.insert("displayName".to_string(), Value::String(display_name.clone()));
        }
        Value::Object(body)
    }
}

/// Authorization referenced by an Agent create payload, if any.
pub fn payload_authorization(payload: &Value) -> Option<String> {
    AUTHORIZATION_POINTERS.iter().find_map(|ptr| {
        payload
            .pointer(ptr)
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Rewrite the Authorization reference inside a create payload.
///
/// Returns false when the payload has no Authorization reference to replace.
pub fn set_payload_authorization(payload: &mut Value, authorization: &str) -> bool {
    for ptr in AUTHORIZATION_POINTERS {
        if let Some(Value::Array(arr)) = payload.pointer_mut(ptr) {
            if arr.is_empty() {
                continue;
            }
            arr[0] = Value::String(authorization.to_string());
            return true;
        }
    }
    false
}

/// Set the OAuth client secret on an Authorization create payload.
pub fn set_payload_client_secret(payload: &mut Value, secret: &str) {
    if let Value::Object(body) = payload {
        let oauth = body
            .entry("serverSideOauth2")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(oauth) = oauth {
            oauth.insert("clientSecret".to_string(), Value::String(secret.to_string()));
        }
    }
}

/// Rewrite the ReasoningEngine reference inside a create payload.
pub fn set_payload_reasoning_engine(payload: &mut Value, reasoning_engine: &str) -> bool {
    match payload.pointer_mut(REASONING_ENGINE_POINTER) {
        Some(slot) => {
            *slot = Value::String(reasoning_engine.to_string());
            true
        }
        None => false,
    }
}

/// Collection with its nested engines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    #[serde(flatten)]
    pub resource: Resource,
    #[serde(default)]
    pub engines: Vec<EngineEntry>,
}

/// Engine with its nested assistants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineEntry {
    #[serde(flatten)]
    pub resource: Resource,
    #[serde(default)]
    pub assistants: Vec<AssistantEntry>,
}

/// Assistant with its nested agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantEntry {
    #[serde(flatten)]
    pub resource: Resource,
    #[serde(default)]
    pub agents: Vec<Resource>,
}
