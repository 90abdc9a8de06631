use std::time::Duration;

use tracing::{debug, info};

use crate::client::{ApiError, RepositoryClient};
use crate::rest_types::{ProblemDetails, TaskProgress, TaskStatus};

pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What was observed about a task once polling stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { entry_id: Option<i64> },
    Failed { errors: Vec<ProblemDetails> },
    Cancelled,
    /// The attempt budget ran out while the task was still non-terminal.
    /// `status` is `None` when the task never showed up in a poll response.
    Pending {
        status: Option<TaskStatus>,
        attempts: u32,
    },
}

impl TaskOutcome {
    fn from_terminal(progress: &TaskProgress) -> Option<Self> {
        match progress.status {
            TaskStatus::Completed => Some(TaskOutcome::Completed {
                entry_id: progress.result.as_ref().and_then(|r| r.entry_id),
            }),
            TaskStatus::Failed => Some(TaskOutcome::Failed {
                errors: progress.errors.clone(),
            }),
            TaskStatus::Cancelled => Some(TaskOutcome::Cancelled),
            _ => None,
        }
    }
}

pub async fn fetch_task(
    client: &RepositoryClient,
    task_id: &str,
) -> Result<Option<TaskProgress>, ApiError> {
    let response = client.list_tasks(&[task_id.to_string()]).await?;
    Ok(response.value.into_iter().find(|task| task.id == task_id))
}

/// Polls a task until it reaches a terminal status or the policy's attempt
/// budget is spent. No sleep follows the final attempt.
pub async fn wait_for_task(
    client: &RepositoryClient,
    task_id: &str,
    policy: &PollPolicy,
) -> Result<TaskOutcome, ApiError> {
    let mut last_status = None;

    for attempt in 1..=policy.max_attempts {
        debug!(task_id, attempt, "checking task status");

        if let Some(progress) = fetch_task(client, task_id).await? {
            info!(task_id, attempt, status = %progress.status, "task status");
            if let Some(outcome) = TaskOutcome::from_terminal(&progress) {
                return Ok(outcome);
            }
            last_status = Some(progress.status);
        }

        if attempt < policy.max_attempts && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Ok(TaskOutcome::Pending {
        status: last_status,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TASKS_PATH: &str = "/v2/Repositories/r-1/Tasks";

    fn client_for(server: &MockServer) -> RepositoryClient {
        RepositoryClient::new(
            Url::parse(&server.uri()).unwrap(),
            "r-1".to_string(),
            "token".to_string(),
        )
    }

    fn no_wait(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn gives_up_after_budget_while_in_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "t-1", "status": "InProgress"}]
            })))
            .expect(5)
            .mount(&server)
            .await;

        let outcome = wait_for_task(&client_for(&server), "t-1", &no_wait(5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Pending {
                status: Some(TaskStatus::InProgress),
                attempts: 5
            }
        );
    }

    #[tokio::test]
    async fn returns_entry_id_on_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "t-1", "status": "InProgress"}]
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "t-1", "status": "Completed", "result": {"entryId": 314}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = wait_for_task(&client_for(&server), "t-1", &no_wait(5))
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Completed { entry_id: Some(314) });
    }

    #[tokio::test]
    async fn completes_with_dotnet_style_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": "t-1",
                    "status": "Completed",
                    "startTime": "2024-03-05T18:33:46.1234567-05:00",
                    "result": {"entryId": 5},
                    "errors": null
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = wait_for_task(&client_for(&server), "t-1", &no_wait(5))
            .await
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Completed { entry_id: Some(5) });
    }

    #[tokio::test]
    async fn keeps_polling_a_queued_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "t-1", "status": "NotStarted"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "t-1", "status": "Failed", "errors": [{"title": "Corrupt PDF"}]}]
            })))
            .mount(&server)
            .await;

        let outcome = wait_for_task(&client_for(&server), "t-1", &no_wait(5))
            .await
            .unwrap();

        match outcome {
            TaskOutcome::Failed { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].title.as_deref(), Some("Corrupt PDF"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_task_counts_as_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = wait_for_task(&client_for(&server), "t-1", &no_wait(3))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TaskOutcome::Pending {
                status: None,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn poll_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TASKS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = wait_for_task(&client_for(&server), "t-1", &no_wait(5)).await;
        assert!(matches!(result, Err(ApiError::Status { .. })));
    }
}
