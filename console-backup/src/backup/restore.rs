//! Restore executor.
//!
//! Replays a [`RestorePlan`] one create call at a time, phase by phase. No
//! single item failure stops a phase or the plan: every item ends up with an
//! [`ItemOutcome`] in the report, and every outcome is written to the
//! activity log as it happens.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::selection::resolve;
use super::{ActivityLog, BackupError, PlannedItem, ResolverOptions, RestorePhase, RestorePlan, SelectionSet, Snapshot, SnapshotType};
use crate::api::{ApiError, ApiErrorKind, CreateResponse, ResourceApi};
use crate::operation::{OperationPoller, PollError};
use crate::resources::{set_payload_client_secret, ResourceKind, ResourceRef, RestoreContext};
use crate::secrets::{SecretProvider, SecretRequest};

/// Default pause between create calls within a phase
pub const DEFAULT_CREATE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Created,
    /// The target already had it; counted as success.
    AlreadyExisted,
    /// Created after moving the Agent onto a fresh Authorization.
    Recovered { authorization: String },
    Skipped { reason: String },
    Failed { message: String },
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ItemStatus::Created | ItemStatus::AlreadyExisted | ItemStatus::Recovered { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub phase: RestorePhase,
    pub kind: ResourceKind,
    pub source: ResourceRef,
    pub target: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

/// Per-item outcomes of one restore, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl RestoreReport {
    pub fn created(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Created))
    }

    pub fn already_existed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::AlreadyExisted))
    }

    pub fn recovered(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Recovered { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    pub fn outcome(&self, source_name: &str) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| o.source.name == source_name)
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "Nothing to restore".to_string();
        }
        let mut parts = vec![format!("{} created", self.created())];
        if self.already_existed() > 0 {
            parts.push(format!("{} already existed", self.already_existed()));
        }
        if self.recovered() > 0 {
            parts.push(format!("{} recovered", self.recovered()));
        }
        if self.skipped() > 0 {
            parts.push(format!("{} skipped", self.skipped()));
        }
        if self.failed() > 0 {
            parts.push(format!("{} failed", self.failed()));
        }
        format!("Restore finished: {}", parts.join(", "))
    }
}

/// Why a single create call did not produce a resource.
#[derive(Debug, thiserror::Error)]
pub(super) enum CreateError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Operation(#[from] PollError),
}

impl CreateError {
    pub(super) fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            CreateError::Api(e) => Some(e.kind),
            CreateError::Operation(_) => None,
        }
    }
}

/// Spaces out create calls within a phase.
pub(super) struct Pacer {
    delay: Duration,
    armed: bool,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self { delay, armed: false }
    }

    /// Sleep if a create call already went out in this phase.
    pub(super) async fn wait(&mut self) {
        if self.armed && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.armed = true;
    }
}

pub struct RestoreExecutor<'a> {
    pub(super) api: &'a dyn ResourceApi,
    pub(super) secrets: &'a dyn SecretProvider,
    pub(super) activity: &'a ActivityLog,
    poller: OperationPoller,
    create_delay: Duration,
    cancel: Option<CancellationToken>,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(api: &'a dyn ResourceApi, secrets: &'a dyn SecretProvider, activity: &'a ActivityLog) -> Self {
        Self {
            api,
            secrets,
            activity,
            poller: OperationPoller::default(),
            create_delay: DEFAULT_CREATE_DELAY,
            cancel: None,
        }
    }

    pub fn with_poller(mut self, poller: OperationPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Checked between items; an in-flight create is never interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate, resolve and plan `raw` against `snapshot`, then execute.
    ///
    /// Anything that fails here fails before the first create call.
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
        expected: SnapshotType,
        raw: &SelectionSet,
        options: ResolverOptions,
        target: &RestoreContext,
    ) -> Result<RestoreReport, BackupError> {
        if snapshot.snapshot_type != expected {
            return Err(BackupError::Validation(format!(
                "expected a {} snapshot, found {}",
                expected, snapshot.snapshot_type
            )));
        }
        let selection = resolve(snapshot, raw, options);
        let plan = RestorePlan::build(snapshot, &selection, target)?;
        self.activity.info(format!(
            "Restoring {} of {} items from {} snapshot into {}",
            plan.len(),
            snapshot.item_count(),
            snapshot.snapshot_type,
            target.scope()
        ));
        Ok(self.execute(&plan).await)
    }

    pub async fn execute(&self, plan: &RestorePlan) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut cancel_logged = false;

        for (phase, items) in plan.phases() {
            if items.is_empty() {
                continue;
            }
            self.activity
                .info(format!("Restoring {} {}", items.len(), phase.kind().plural()));
            let mut pacer = Pacer::new(self.create_delay);

            for item in items {
                let status = if self.is_cancelled() {
                    if !cancel_logged {
                        self.activity.warn("Restore cancelled, remaining items skipped");
                        cancel_logged = true;
                    }
                    ItemStatus::Skipped {
                        reason: "cancelled".to_string(),
                    }
                } else {
                    let status = self.restore_item(item, &mut pacer).await;
                    self.log_outcome(item, &status);
                    status
                };

                report.outcomes.push(ItemOutcome {
                    phase: *phase,
                    kind: item.kind,
                    source: item.source.clone(),
                    target: item.target_name(),
                    status,
                });
            }
        }

        if report.failed() > 0 {
            self.activity.warn(report.summary());
        } else {
            self.activity.success(report.summary());
        }
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    async fn restore_item(&self, item: &PlannedItem, pacer: &mut Pacer) -> ItemStatus {
        let mut payload = item.payload.clone();

        if item.kind == ResourceKind::Authorization {
            let request = SecretRequest {
                authorization: ResourceRef::new(item.target_name(), item.label()),
                derived_from: None,
                prompt: format!("Enter the OAuth client secret for authorization '{}'", item.label()),
            };
            match self.secrets.request_secret(&request).await {
                Some(secret) => set_payload_client_secret(&mut payload, &secret),
                None => {
                    return ItemStatus::Skipped {
                        reason: "no client secret supplied".to_string(),
                    };
                }
            }
        }

        pacer.wait().await;
        match self.create(item.kind, &item.parent, &item.id, &payload).await {
            Ok(()) => ItemStatus::Created,
            Err(err) => match err.api_kind() {
                Some(ApiErrorKind::AlreadyExists) => ItemStatus::AlreadyExisted,
                Some(ApiErrorKind::AuthorizationInUse) if item.kind == ResourceKind::Agent => {
                    self.activity.warn(format!(
                        "Agent '{}' conflicts on its authorization, trying a fresh one",
                        item.label()
                    ));
                    self.recover_agent(item, payload, pacer).await
                }
                _ => ItemStatus::Failed {
                    message: err.to_string(),
                },
            },
        }
    }

    /// One create call, waiting out the operation if the API returns one.
    pub(super) async fn create(
        &self,
        kind: ResourceKind,
        parent: &str,
        id: &str,
        payload: &Value,
    ) -> Result<(), CreateError> {
        match self.api.create(kind, parent, id, payload).await? {
            CreateResponse::Created(_) => Ok(()),
            CreateResponse::Pending(operation) => {
                log::debug!("[Restore] Waiting on {} for {} {}", operation.name, kind, id);
                self.poller.wait(self.api, operation).await?;
                Ok(())
            }
        }
    }

    fn log_outcome(&self, item: &PlannedItem, status: &ItemStatus) {
        let kind = item.kind;
        let label = item.label();
        match status {
            ItemStatus::Created => self.activity.success(format!("Created {} '{}'", kind, label)),
            ItemStatus::AlreadyExisted => self
                .activity
                .info(format!("{} '{}' already exists, leaving it as is", kind, label)),
            ItemStatus::Recovered { authorization } => self.activity.success(format!(
                "Created {} '{}' using authorization {}",
                kind, label, authorization
            )),
            ItemStatus::Skipped { reason } => self
                .activity
                .warn(format!("Skipped {} '{}': {}", kind, label, reason)),
            ItemStatus::Failed { message } => self.activity.error(format!(
                "Failed to create {} '{}' ({}): {}",
                kind,
                label,
                item.target_name(),
                message
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: ItemStatus) -> ItemOutcome {
        ItemOutcome {
            phase: RestorePhase::Collections,
            kind: ResourceKind::Collection,
            source: ResourceRef::new(name, ""),
            target: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_report_summary() {
        assert_eq!(RestoreReport::default().summary(), "Nothing to restore");

        let report = RestoreReport {
            outcomes: vec![
                outcome("a", ItemStatus::Created),
                outcome("b", ItemStatus::AlreadyExisted),
                outcome("c", ItemStatus::Failed { message: "boom".into() }),
                outcome("d", ItemStatus::Skipped { reason: "cancelled".into() }),
            ],
        };
        assert_eq!(
            report.summary(),
            "Restore finished: 1 created, 1 already existed, 1 skipped, 1 failed"
        );
        assert!(report.outcome("b").unwrap().status.is_success());
        assert!(!report.outcome("c").unwrap().status.is_success());
    }

    #[test]
    fn test_outcome_serializes_flat() {
        let json = serde_json::to_value(outcome("a", ItemStatus::Failed { message: "boom".into() })).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["phase"], "Collections");
    }

    #[tokio::test]
    async fn test_pacer_only_waits_after_first_call() {
        let mut pacer = Pacer::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_millis(20));
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
