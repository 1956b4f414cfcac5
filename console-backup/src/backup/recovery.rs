//! Authorization conflict recovery.
//!
//! An Authorization can be bound to one Agent only. When an Agent create is
//! rejected because its Authorization is taken, the Agent gets a copy of that
//! Authorization under a new id and its create is retried once. Any failure
//! along the way ends recovery for that Agent; there is no second retry.

use chrono::Utc;
use serde_json::Value;

use super::restore::{ItemStatus, Pacer, RestoreExecutor};
use super::PlannedItem;
use crate::api::ApiErrorKind;
use crate::resources::{
    payload_authorization, set_payload_authorization, set_payload_client_secret, ResourceKind, ResourceName, ResourceRef,
};
use crate::secrets::SecretRequest;

/// New Authorization id derived from the original: `{id}-{yyyymmddHHMMSS}`.
pub fn derived_authorization_id(original_id: &str) -> String {
    format!("{}-{}", original_id, Utc::now().format("%Y%m%d%H%M%S"))
}

impl RestoreExecutor<'_> {
    pub(super) async fn recover_agent(&self, item: &PlannedItem, mut agent_payload: Value, pacer: &mut Pacer) -> ItemStatus {
        let Some(original) = payload_authorization(&agent_payload) else {
            return self.give_up(item, "authorization conflict reported but the agent references no authorization");
        };
        let original_name = match ResourceName::parse(&original) {
            Ok(name) => name,
            Err(e) => return self.give_up(item, &format!("cannot parse authorization reference: {}", e)),
        };

        let mut authorization = match self.api.get(ResourceKind::Authorization, &original).await {
            Ok(auth) => auth,
            Err(e) => return self.give_up(item, &format!("cannot read authorization {}: {}", original, e)),
        };
        authorization.redact_client_secret();

        let new_id = derived_authorization_id(original_name.id());
        let parent = original_name.parent_path();
        let new_name = original_name.with_id(&new_id).to_string();

        let request = SecretRequest {
            authorization: ResourceRef::new(
                new_name.clone(),
                authorization.display_name.clone().unwrap_or_default(),
            ),
            derived_from: Some(authorization.to_ref()),
            prompt: format!(
                "Agent '{}' needs its own copy of authorization '{}'. Enter the OAuth client secret for {}",
                item.label(),
                authorization.label(),
                new_id
            ),
        };
        let Some(secret) = self.secrets.request_secret(&request).await else {
            return ItemStatus::Skipped {
                reason: format!("no client secret supplied for replacement authorization {}", new_id),
            };
        };

        let mut auth_payload = authorization.create_payload();
        set_payload_client_secret(&mut auth_payload, &secret);
        pacer.wait().await;
        if let Err(e) = self
            .create(ResourceKind::Authorization, &parent, &new_id, &auth_payload)
            .await
        {
            return self.give_up(item, &format!("cannot create authorization {}: {}", new_id, e));
        }
        self.activity
            .info(format!("Created authorization {} for agent '{}'", new_id, item.label()));

        set_payload_authorization(&mut agent_payload, &new_name);
        pacer.wait().await;
        match self.create(item.kind, &item.parent, &item.id, &agent_payload).await {
            Ok(()) => ItemStatus::Recovered { authorization: new_name },
            Err(e) if e.api_kind() == Some(ApiErrorKind::AlreadyExists) => ItemStatus::AlreadyExisted,
            Err(e) => ItemStatus::Failed {
                message: format!("retry with authorization {} failed: {}", new_id, e),
            },
        }
    }

    fn give_up(&self, item: &PlannedItem, reason: &str) -> ItemStatus {
        log::warn!("[Recovery] Giving up on agent {}: {}", item.source, reason);
        ItemStatus::Failed {
            message: format!("authorization conflict recovery failed: {}", reason),
        }
    }
}
