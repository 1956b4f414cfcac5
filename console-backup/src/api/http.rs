//! REST client for the discovery and reasoning-engine APIs.
//!
//! Discovery resources (collections, engines, assistants, agents, data stores,
//! authorizations) are served from one global endpoint; reasoning engines
//! from a regional one whose host embeds the location.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{classify_error, ApiError, ApiErrorKind, CreateResponse, Operation, ResourceApi};
use crate::resources::{Resource, ResourceKind, ResourceName};

/// Default discovery API base URL
pub const DEFAULT_DISCOVERY_URL: &str = "https://discoveryengine.googleapis.com/v1alpha";

/// Default reasoning engine API base URL; `{region}` is substituted per call
pub const DEFAULT_AIPLATFORM_URL: &str = "https://{region}-aiplatform.googleapis.com/v1beta1";

/// HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const PAGE_SIZE: u32 = 100;

/// Upper bound on pages followed for a single list call
const MAX_PAGES: usize = 500;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

pub struct RestResourceApi {
    http_client: reqwest::Client,
    discovery_url: String,
    aiplatform_url: String,
    access_token: Option<String>,
}

impl RestResourceApi {
    pub fn new(
        discovery_url: &str,
        aiplatform_url: &str,
        access_token: Option<String>,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            discovery_url: discovery_url.trim_end_matches('/').to_string(),
            aiplatform_url: aiplatform_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// Base URL that serves `path`.
    fn base_for(&self, path: &str) -> String {
        if path.contains("/reasoningEngines") || path.ends_with("reasoningEngines") {
            let region = ResourceName::parse(path)
                .ok()
                .and_then(|n| n.location().map(str::to_string))
                .or_else(|| region_from_parent(path))
                .unwrap_or_else(|| "us-central1".to_string());
            self.aiplatform_url.replace("{region}", &region)
        } else {
            self.discovery_url.clone()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_for(path), path.trim_start_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ApiError::new(ApiErrorKind::Unavailable, format!("Request failed: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::new(ApiErrorKind::Unavailable, format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let (message, rest_status) = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(env) => (env.error.message, env.error.status),
                Err(_) => (format!("HTTP {}: {}", status.as_u16(), text), None),
            };
            let kind = classify_error(status.as_u16(), rest_status.as_deref(), &message);
            log::debug!("[Api] {} -> {:?}: {}", status, kind, message);
            return Err(ApiError::new(kind, message));
        }

        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| ApiError::other(format!("Invalid JSON response: {}", e)))
    }
}

/// `projects/p/locations/us-central1` → `us-central1` for list/create parents.
fn region_from_parent(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.split('/').collect();
    parts
        .iter()
        .position(|p| *p == "locations")
        .and_then(|i| parts.get(i + 1))
        .map(|s| s.to_string())
}

/// Decide whether a create response is an LRO handle or the resource itself.
fn parse_create_response(body: Value) -> Result<CreateResponse, ApiError> {
    let is_operation = body.get("done").is_some()
        || body
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|n| n.contains("/operations/"));
    if is_operation {
        let op: Operation = serde_json::from_value(body)
            .map_err(|e| ApiError::other(format!("Invalid operation: {}", e)))?;
        Ok(CreateResponse::Pending(op))
    } else {
        let resource: Resource = serde_json::from_value(body)
            .map_err(|e| ApiError::other(format!("Invalid resource: {}", e)))?;
        Ok(CreateResponse::Created(resource))
    }
}

#[async_trait]
impl ResourceApi for RestResourceApi {
    async fn list(&self, kind: ResourceKind, parent: &str) -> Result<Vec<Resource>, ApiError> {
        let segment = kind.collection_segment();
        let url = self.url(&format!("{}/{}", parent, segment));
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut req = self.http_client.get(&url).query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let body = self.send(req).await?;

            if let Some(arr) = body.get(segment).and_then(Value::as_array) {
                for item in arr {
                    let resource: Resource = serde_json::from_value(item.clone())
                        .map_err(|e| ApiError::other(format!("Invalid {} entry: {}", kind, e)))?;
                    items.push(resource);
                }
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                return Ok(items);
            }
        }

        log::warn!("[Api] Stopped paging {} under {} after {} pages", kind.plural(), parent, MAX_PAGES);
        Ok(items)
    }

    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Resource, ApiError> {
        let body = self.send(self.http_client.get(self.url(name))).await?;
        serde_json::from_value(body).map_err(|e| ApiError::other(format!("Invalid {}: {}", kind, e)))
    }

    async fn create(
        &self,
        kind: ResourceKind,
        parent: &str,
        id: &str,
        payload: &Value,
    ) -> Result<CreateResponse, ApiError> {
        let url = self.url(&format!("{}/{}", parent, kind.collection_segment()));
        let mut req = self.http_client.post(&url).json(payload);
        // reasoning engine ids are server-assigned
        if !kind.is_regional() && !id.is_empty() {
            req = req.query(&[(kind.id_param(), id)]);
        }
        let body = self.send(req).await?;
        parse_create_response(body)
    }

    async fn delete(&self, _kind: ResourceKind, name: &str) -> Result<(), ApiError> {
        self.send(self.http_client.delete(self.url(name))).await?;
        Ok(())
    }

    async fn get_operation(&self, name: &str) -> Result<Operation, ApiError> {
        let body = self.send(self.http_client.get(self.url(name))).await?;
        serde_json::from_value(body).map_err(|e| ApiError::other(format!("Invalid operation: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> RestResourceApi {
        RestResourceApi::new(DEFAULT_DISCOVERY_URL, DEFAULT_AIPLATFORM_URL, None).unwrap()
    }

    #[test]
    fn test_regional_routing() {
        let api = client();
        assert_eq!(
            api.url("projects/p/locations/europe-west4/reasoningEngines"),
            "https://europe-west4-aiplatform.googleapis.com/v1beta1/projects/p/locations/europe-west4/reasoningEngines"
        );
        assert_eq!(
            api.url("projects/p/locations/us-central1/reasoningEngines/42/operations/7"),
            "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/p/locations/us-central1/reasoningEngines/42/operations/7"
        );
        assert_eq!(
            api.url("projects/p/locations/global/collections"),
            "https://discoveryengine.googleapis.com/v1alpha/projects/p/locations/global/collections"
        );
    }

    #[test]
    fn test_parse_create_response() {
        let op = parse_create_response(json!({
            "name": "projects/p/locations/global/collections/c/operations/create-engine-1",
            "done": false
        }))
        .unwrap();
        assert!(matches!(op, CreateResponse::Pending(ref o) if !o.done));

        let created = parse_create_response(json!({
            "name": "projects/p/locations/global/authorizations/a1",
            "displayName": "A1"
        }))
        .unwrap();
        assert!(matches!(created, CreateResponse::Created(ref r) if r.id() == "a1"));
    }
}
