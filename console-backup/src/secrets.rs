//! Client secret input.
//!
//! Snapshots never carry OAuth client secrets, so restoring an Authorization
//! needs the operator to supply one. `None` means "declined": the item is
//! skipped, never retried.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::resources::ResourceRef;

/// What the restore is asking a secret for.
#[derive(Debug, Clone)]
pub struct SecretRequest {
    /// Authorization that will be created with the secret.
    pub authorization: ResourceRef,
    /// Original Authorization when this one is a renamed copy made during
    /// conflict recovery.
    pub derived_from: Option<ResourceRef>,
    pub prompt: String,
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn request_secret(&self, request: &SecretRequest) -> Option<String>;
}

/// Canned secrets keyed by Authorization id.
///
/// A renamed copy falls back to the secret of the Authorization it was
/// derived from, which is what an operator would type in again anyway.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub fn with_secret(mut self, authorization_id: &str, secret: &str) -> Self {
        self.secrets.insert(authorization_id.to_string(), secret.to_string());
        self
    }

    fn lookup(&self, authorization_id: &str) -> Option<String> {
        self.secrets
            .get(authorization_id)
            .filter(|s| !s.is_empty())
            .cloned()
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn request_secret(&self, request: &SecretRequest) -> Option<String> {
        self.lookup(request.authorization.id()).or_else(|| {
            request
                .derived_from
                .as_ref()
                .and_then(|original| self.lookup(original.id()))
        })
    }
}

/// Declines every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecliningSecretProvider;

#[async_trait]
impl SecretProvider for DecliningSecretProvider {
    async fn request_secret(&self, request: &SecretRequest) -> Option<String> {
        log::debug!("[Secrets] Declining secret for {}", request.authorization);
        None
    }
}
