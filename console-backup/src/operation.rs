//! Long-running operation poller.
//!
//! `PENDING → (poll) → PENDING | DONE_OK | DONE_ERROR`, with a poll cap so a
//! stuck operation surfaces as [`PollError::Timeout`] instead of hanging a restore.

use std::time::Duration;

use serde_json::Value;

use crate::api::{ApiError, Operation, ResourceApi};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The operation finished with an error.
    #[error("operation {name} failed: {message}")]
    Failed { name: String, message: String },
    /// The operation was still running after the last allowed poll.
    #[error("operation {name} still pending after {polls} polls")]
    Timeout { name: String, polls: u32 },
    /// Reading the operation itself failed.
    #[error("polling operation {name}: {source}")]
    Api { name: String, source: ApiError },
}

#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    interval: Duration,
    max_polls: u32,
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 360,
        }
    }
}

impl OperationPoller {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls: max_polls.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for `operation` to reach a terminal state and return its response.
    ///
    /// An operation that is already done is resolved without any API call.
    pub async fn wait(&self, api: &dyn ResourceApi, operation: Operation) -> Result<Value, PollError> {
        let mut current = operation;
        let mut polls = 0u32;

        loop {
            if current.done {
                return resolve(current);
            }
            if polls >= self.max_polls {
                log::warn!("[Poller] Giving up on {} after {} polls", current.name, polls);
                return Err(PollError::Timeout {
                    name: current.name,
                    polls,
                });
            }

            tokio::time::sleep(self.interval).await;
            polls += 1;

            current = api.get_operation(&current.name).await.map_err(|source| PollError::Api {
                name: current.name.clone(),
                source,
            })?;
            log::debug!("[Poller] {} poll #{} done={}", current.name, polls, current.done);
        }
    }
}

fn resolve(operation: Operation) -> Result<Value, PollError> {
    if let Some(error) = operation.error {
        return Err(PollError::Failed {
            name: operation.name,
            message: error.message,
        });
    }
    Ok(operation.response.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockResourceApi;
    use serde_json::json;

    fn fast() -> OperationPoller {
        OperationPoller::new(Duration::from_millis(1), 5)
    }

    #[tokio::test]
    async fn test_done_operation_needs_no_poll() {
        let api = MockResourceApi::new();
        let value = fast()
            .wait(&api, Operation::succeeded("ops/1", json!({"name": "x"})))
            .await
            .unwrap();
        assert_eq!(value["name"], "x");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_polls_until_done() {
        let api = MockResourceApi::new();
        api.script_operation(
            "ops/1",
            vec![
                Ok(Operation::pending("ops/1")),
                Ok(Operation::pending("ops/1")),
                Ok(Operation::succeeded("ops/1", json!({"ok": true}))),
            ],
        );
        let value = fast().wait(&api, Operation::pending("ops/1")).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_is_raised() {
        let api = MockResourceApi::new();
        api.script_operation("ops/1", vec![Ok(Operation::failed("ops/1", "quota exceeded"))]);
        let err = fast().wait(&api, Operation::pending("ops/1")).await.unwrap_err();
        assert_eq!(
            err,
            PollError::Failed {
                name: "ops/1".into(),
                message: "quota exceeded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_after_max_polls() {
        let api = MockResourceApi::new();
        api.script_operation("ops/1", vec![Ok(Operation::pending("ops/1"))]);
        let err = fast().wait(&api, Operation::pending("ops/1")).await.unwrap_err();
        assert_eq!(err, PollError::Timeout { name: "ops/1".into(), polls: 5 });
        assert_eq!(api.calls().len(), 5);
    }
}
