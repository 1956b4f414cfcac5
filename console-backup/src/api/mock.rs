//! Scripted in-process resource API.
//!
//! Holds a small live "system" (resources keyed by parent) that list/get read
//! and create writes into, plus per-call scripted failures and operation
//! sequences. Every call is recorded so tests can assert on ordering.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{ApiError, ApiErrorKind, CreateResponse, Operation, ResourceApi};
use crate::resources::{Resource, ResourceKind};

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    List { kind: ResourceKind, parent: String },
    Get { kind: ResourceKind, name: String },
    Create { kind: ResourceKind, parent: String, id: String },
    Delete { kind: ResourceKind, name: String },
    GetOperation { name: String },
}

#[derive(Default)]
struct MockState {
    /// (kind, parent) → resources listed there
    resources: BTreeMap<(ResourceKind, String), Vec<Resource>>,
    list_failures: HashMap<(ResourceKind, String), ApiError>,
    /// (kind, id) → scripted outcomes, consumed front to back
    create_script: HashMap<(ResourceKind, String), VecDeque<Result<CreateResponse, ApiError>>>,
    /// (kind, id prefix) → error for every create whose id starts with it
    create_failures: Vec<(ResourceKind, String, ApiError)>,
    /// operation name → states returned by successive polls
    operations: HashMap<String, VecDeque<Result<Operation, ApiError>>>,
    calls: Vec<ApiCall>,
}

#[derive(Clone, Default)]
pub struct MockResourceApi {
    state: Arc<Mutex<MockState>>,
}

impl MockResourceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resource as already present under `parent`.
    pub fn insert(&self, kind: ResourceKind, parent: &str, resource: Resource) {
        let mut state = self.state.lock().unwrap();
        state
            .resources
            .entry((kind, parent.to_string()))
            .or_default()
            .push(resource);
    }

    /// Make `list(kind, parent)` fail.
    pub fn fail_list(&self, kind: ResourceKind, parent: &str, error: ApiError) {
        let mut state = self.state.lock().unwrap();
        state.list_failures.insert((kind, parent.to_string()), error);
    }

    /// Queue an outcome for the next create of `(kind, id)`.
    pub fn script_create(&self, kind: ResourceKind, id: &str, outcome: Result<CreateResponse, ApiError>) {
        let mut state = self.state.lock().unwrap();
        state
            .create_script
            .entry((kind, id.to_string()))
            .or_default()
            .push_back(outcome);
    }

    /// Fail every create of `kind` whose id starts with `id_prefix`. For ids
    /// that are only known after the call, such as timestamped copies.
    pub fn fail_creates_with_prefix(&self, kind: ResourceKind, id_prefix: &str, error: ApiError) {
        let mut state = self.state.lock().unwrap();
        state.create_failures.push((kind, id_prefix.to_string(), error));
    }

    /// Queue the states an operation reports on successive polls.
    pub fn script_operation(&self, name: &str, states: Vec<Result<Operation, ApiError>>) {
        let mut state = self.state.lock().unwrap();
        state.operations.insert(name.to_string(), VecDeque::from(states));
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Ids of create calls in the order they were issued.
    pub fn created_ids(&self) -> Vec<(ResourceKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Create { kind, id, .. } => Some((kind, id)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn find(&self, name: &str) -> Option<Resource> {
        let state = self.state.lock().unwrap();
        state
            .resources
            .values()
            .flat_map(|v| v.iter())
            .find(|r| r.name == name)
            .cloned()
    }
}

#[async_trait]
impl ResourceApi for MockResourceApi {
    async fn list(&self, kind: ResourceKind, parent: &str) -> Result<Vec<Resource>, ApiError> {
        self.record(ApiCall::List {
            kind,
            parent: parent.to_string(),
        });
        let state = self.state.lock().unwrap();
        if let Some(err) = state.list_failures.get(&(kind, parent.to_string())) {
            return Err(err.clone());
        }
        Ok(state
            .resources
            .get(&(kind, parent.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Resource, ApiError> {
        self.record(ApiCall::Get {
            kind,
            name: name.to_string(),
        });
        self.find(name)
            .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound, format!("{} {} not found", kind, name)))
    }

    async fn create(
        &self,
        kind: ResourceKind,
        parent: &str,
        id: &str,
        payload: &Value,
    ) -> Result<CreateResponse, ApiError> {
        self.record(ApiCall::Create {
            kind,
            parent: parent.to_string(),
            id: id.to_string(),
        });

        let scripted = {
            let mut state = self.state.lock().unwrap();
            let queued = state
                .create_script
                .get_mut(&(kind, id.to_string()))
                .and_then(|queue| queue.pop_front());
            queued.or_else(|| {
                state
                    .create_failures
                    .iter()
                    .find(|(k, prefix, _)| *k == kind && id.starts_with(prefix.as_str()))
                    .map(|(_, _, err)| Err(err.clone()))
            })
        };
        if let Some(outcome) = scripted {
            if let Ok(CreateResponse::Created(resource)) = &outcome {
                self.insert(kind, parent, resource.clone());
            }
            return outcome;
        }

        let name = format!("{}/{}/{}", parent, kind.collection_segment(), id);
        if self.find(&name).is_some() {
            return Err(ApiError::already_exists(format!("{} {} already exists", kind, name)));
        }

        let mut body = payload.clone();
        if let Value::Object(fields) = &mut body {
            fields.insert("name".to_string(), Value::String(name.clone()));
        }
        let resource: Resource = serde_json::from_value(body).unwrap_or_else(|_| Resource {
            name,
            ..Default::default()
        });
        self.insert(kind, parent, resource.clone());
        Ok(CreateResponse::Created(resource))
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<(), ApiError> {
        self.record(ApiCall::Delete {
            kind,
            name: name.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let mut removed = false;
        for list in state.resources.values_mut() {
            let before = list.len();
            list.retain(|r| r.name != name);
            removed |= list.len() != before;
        }
        if removed {
            Ok(())
        } else {
            Err(ApiError::new(ApiErrorKind::NotFound, format!("{} {} not found", kind, name)))
        }
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, ApiError> {
        self.record(ApiCall::GetOperation { name: name.to_string() });
        let mut state = self.state.lock().unwrap();
        match state.operations.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(Operation::pending(name))),
            // the last scripted state repeats forever
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(Operation::pending(name))),
            None => Err(ApiError::new(ApiErrorKind::NotFound, format!("operation {} not found", name))),
        }
    }
}
