//! Status polling: drive a submitted task to a terminal status.
//!
//! ## Budgets
//!
//! Two independent budgets bound the loop:
//!
//! * `max_poll_attempts` counts every poll, pending or failed. Running out
//!   yields [`WorkerError::PollTimeout`].
//! * `max_transport_errors` counts *consecutive* network failures. A single
//!   successful poll resets it. Running out yields
//!   [`WorkerError::ServiceUnreachable`], so a dead service is reported long
//!   before the full attempt budget is spent.
//!
//! After every transport error the supervisor is consulted: if it has seen
//! the server exit, the job ends immediately with [`WorkerError::ServerLost`].

use crate::error::WorkerError;
use crate::pipeline::client::{ServiceClient, StatusReport, TaskHandle};
use crate::progress::JobProgressCallback;
use crate::supervisor::{ServerState, Supervisor};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Classification of one status response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    /// Terminal success; carries the URL the result is fetched from.
    Succeeded(String),
    /// Terminal failure; carries the status payload.
    Failed(Value),
}

impl PollOutcome {
    /// Classify a status report. Unknown or missing values are pending.
    pub fn classify(report: &StatusReport, result_location: impl FnOnce() -> String) -> Self {
        match report.status.as_str() {
            "SUCCESS" | "COMPLETED" => PollOutcome::Succeeded(result_location()),
            "FAILURE" | "FAILED" => PollOutcome::Failed(report.payload.clone()),
            _ => PollOutcome::Pending,
        }
    }
}

/// Limits of one polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_transport_errors: u32,
}

/// Poll until the task succeeds (returns the result location), fails, or a
/// budget runs out.
pub async fn poll_until_terminal(
    client: &ServiceClient,
    supervisor: &dyn Supervisor,
    task: &TaskHandle,
    budget: PollBudget,
    progress: &dyn JobProgressCallback,
    job_id: &str,
) -> Result<String, WorkerError> {
    let mut consecutive_errors = 0u32;

    for attempt in 1..=budget.max_attempts {
        match client.poll_status(task).await {
            Ok(report) => {
                consecutive_errors = 0;
                debug!(
                    task_id = %task.task_id,
                    attempt,
                    max = budget.max_attempts,
                    status = %report.status,
                    details = %report.payload,
                    "Polled task status"
                );
                progress.on_poll(job_id, attempt, budget.max_attempts, &report.status);

                match PollOutcome::classify(&report, || client.result_url(task)) {
                    PollOutcome::Succeeded(location) => {
                        info!(task_id = %task.task_id, attempt, "Conversion finished");
                        return Ok(location);
                    }
                    PollOutcome::Failed(details) => {
                        return Err(WorkerError::ConversionFailed {
                            task_id: task.task_id.clone(),
                            details,
                        });
                    }
                    PollOutcome::Pending => {}
                }
            }
            Err(WorkerError::Transport { detail, .. }) => {
                consecutive_errors += 1;
                warn!(
                    task_id = %task.task_id,
                    attempt,
                    consecutive_errors,
                    error = %detail,
                    "Status poll failed; will retry"
                );
                if supervisor.state() == ServerState::Crashed {
                    return Err(WorkerError::ServerLost {
                        task_id: task.task_id.clone(),
                    });
                }
                if consecutive_errors >= budget.max_transport_errors {
                    return Err(WorkerError::ServiceUnreachable {
                        task_id: task.task_id.clone(),
                        errors: consecutive_errors,
                        last_error: detail,
                    });
                }
            }
            Err(other) => return Err(other),
        }

        if attempt < budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    Err(WorkerError::PollTimeout {
        task_id: task.task_id.clone(),
        attempts: budget.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(v: Value) -> PollOutcome {
        PollOutcome::classify(&StatusReport::from_payload(v), || "loc".to_string())
    }

    #[test]
    fn terminal_success_values() {
        assert_eq!(
            classify(json!({"task_status": "success"})),
            PollOutcome::Succeeded("loc".into())
        );
        assert_eq!(
            classify(json!({"status": "COMPLETED"})),
            PollOutcome::Succeeded("loc".into())
        );
    }

    #[test]
    fn terminal_failure_keeps_payload() {
        let payload = json!({"task_status": "Failure", "error": "boom"});
        assert_eq!(classify(payload.clone()), PollOutcome::Failed(payload));
        assert!(matches!(
            classify(json!({"status": "failed"})),
            PollOutcome::Failed(_)
        ));
    }

    #[test]
    fn everything_else_is_pending() {
        for v in [
            json!({"task_status": "pending"}),
            json!({"task_status": "started"}),
            json!({"task_position": 2}),
            json!({"task_status": 7}),
        ] {
            assert_eq!(classify(v), PollOutcome::Pending);
        }
    }
}
