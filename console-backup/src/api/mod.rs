//! Resource API client interface.
//!
//! The backup core only needs list/get/create/delete per resource kind plus a
//! way to read long-running operations. [`http::RestResourceApi`] talks to the
//! real REST endpoints; [`mock::MockResourceApi`] is a scripted in-process
//! stand-in used by tests.

pub mod http;
pub mod mock;

pub use http::RestResourceApi;
pub use mock::{ApiCall, MockResourceApi};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resources::{Resource, ResourceKind};

/// Typed failure categories a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// The resource being created is already there.
    AlreadyExists,
    /// The referenced Authorization is already bound to another Agent.
    AuthorizationInUse,
    NotFound,
    PermissionDenied,
    InvalidArgument,
    /// Network failure, timeout or 5xx.
    Unavailable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::AlreadyExists, message)
    }

    pub fn authorization_in_use(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::AuthorizationInUse, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, message)
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ApiErrorKind::AlreadyExists
    }
}

/// Map an HTTP status, the REST error `status` string and its message to a kind.
///
/// This is the only place that looks at message text.
pub fn classify_error(http_status: u16, rest_status: Option<&str>, message: &str) -> ApiErrorKind {
    let lower = message.to_lowercase();
    let binding_conflict = lower.contains("authorization")
        && ["already in use", "in use by", "already used", "already bound", "already associated"]
            .iter()
            .any(|needle| lower.contains(needle));
    if binding_conflict {
        return ApiErrorKind::AuthorizationInUse;
    }

    match rest_status {
        Some("ALREADY_EXISTS") => ApiErrorKind::AlreadyExists,
        Some("NOT_FOUND") => ApiErrorKind::NotFound,
        Some("PERMISSION_DENIED") | Some("UNAUTHENTICATED") => ApiErrorKind::PermissionDenied,
        Some("INVALID_ARGUMENT") | Some("FAILED_PRECONDITION") | Some("OUT_OF_RANGE") => {
            ApiErrorKind::InvalidArgument
        }
        Some("UNAVAILABLE") | Some("DEADLINE_EXCEEDED") | Some("INTERNAL") | Some("ABORTED")
        | Some("RESOURCE_EXHAUSTED") => ApiErrorKind::Unavailable,
        // A structured status other than ALREADY_EXISTS never means the resource is there.
        Some(_) => match classify_http(http_status, message) {
            ApiErrorKind::AlreadyExists => ApiErrorKind::Other,
            kind => kind,
        },
        None => classify_http(http_status, message),
    }
}

fn classify_http(http_status: u16, message: &str) -> ApiErrorKind {
    match http_status {
        409 => ApiErrorKind::AlreadyExists,
        404 => ApiErrorKind::NotFound,
        401 | 403 => ApiErrorKind::PermissionDenied,
        400 => ApiErrorKind::InvalidArgument,
        500..=599 => ApiErrorKind::Unavailable,
        // Older endpoints only put the code in the message.
        _ if message.contains("ALREADY_EXISTS") => ApiErrorKind::AlreadyExists,
        _ => ApiErrorKind::Other,
    }
}

/// Error payload of a terminal operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// A pending asynchronous create call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Operation {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(name: &str, response: Value) -> Self {
        Self {
            name: name.to_string(),
            done: true,
            response: Some(response),
            ..Default::default()
        }
    }

    pub fn failed(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            done: true,
            error: Some(OperationStatus {
                code: 13,
                message: message.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// What a create call hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateResponse {
    Created(Resource),
    Pending(Operation),
}

#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// List every resource of `kind` directly under `parent`, following pagination.
    async fn list(&self, kind: ResourceKind, parent: &str) -> Result<Vec<Resource>, ApiError>;

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Resource, ApiError>;

    /// Create a resource of `kind` under `parent`. `id` may be ignored for
    /// kinds whose ids are assigned by the server.
    async fn create(
        &self,
        kind: ResourceKind,
        parent: &str,
        id: &str,
        payload: &Value,
    ) -> Result<CreateResponse, ApiError>;

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<(), ApiError>;

    /// Fetch the current state of a long-running operation.
    async fn get_operation(&self, name: &str) -> Result<Operation, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_structured_status() {
        assert_eq!(classify_error(409, Some("ALREADY_EXISTS"), "Engine exists"), ApiErrorKind::AlreadyExists);
        assert_eq!(classify_error(404, Some("NOT_FOUND"), "gone"), ApiErrorKind::NotFound);
        assert_eq!(classify_error(403, Some("PERMISSION_DENIED"), "nope"), ApiErrorKind::PermissionDenied);
        assert_eq!(classify_error(503, None, "try later"), ApiErrorKind::Unavailable);
    }

    #[test]
    fn test_classify_legacy_message() {
        assert_eq!(
            classify_error(200, None, "Error: ALREADY_EXISTS: collection col1"),
            ApiErrorKind::AlreadyExists
        );
        assert_eq!(classify_error(418, None, "teapot"), ApiErrorKind::Other);
        assert_eq!(classify_error(409, None, "conflict"), ApiErrorKind::AlreadyExists);
    }

    #[test]
    fn test_classify_conflict_without_already_exists_status() {
        assert_eq!(
            classify_error(409, Some("ABORTED"), "Engine eng1: concurrent modification"),
            ApiErrorKind::Unavailable
        );
        assert_eq!(classify_error(409, Some("CANCELLED"), "request cancelled"), ApiErrorKind::Other);
        assert_ne!(
            classify_error(409, Some("UNKNOWN"), "Error: ALREADY_EXISTS in message only"),
            ApiErrorKind::AlreadyExists
        );
    }

    #[test]
    fn test_classify_authorization_binding() {
        assert_eq!(
            classify_error(
                400,
                Some("FAILED_PRECONDITION"),
                "Authorization projects/p/locations/global/authorizations/a1 is already in use by another agent"
            ),
            ApiErrorKind::AuthorizationInUse
        );
        // an agent that already exists is not a binding conflict
        assert_eq!(
            classify_error(409, Some("ALREADY_EXISTS"), "Agent agentA already exists"),
            ApiErrorKind::AlreadyExists
        );
    }
}
