//! Submission and poll loop for a single task.
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::TaskFailure;
use crate::flux::{GenerationService, PollResponse, ResultPayload};
use crate::model::Model;
use crate::status::StatusReporter;
use crate::task::{Task, TaskState};

/// How long a task may stay pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pending polls tolerated before the task times out.
    pub max_retries: u32,
    /// Sleep between polls.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_retries: 60,
            interval: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// Longest a task can spend polling.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_retries
    }
}

pub struct PollingController {
    service: Arc<dyn GenerationService>,
    model: Model,
    policy: PollPolicy,
    status: Arc<StatusReporter>,
}

impl PollingController {
    pub fn new(
        service: Arc<dyn GenerationService>,
        model: Model,
        policy: PollPolicy,
        status: Arc<StatusReporter>,
    ) -> Self {
        Self {
            service,
            model,
            policy,
            status,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Drive `task` from `Queued` to a terminal state.
    ///
    /// Submission is attempted once. While polling, transport errors count as
    /// pending polls; only a `failed` status from the service fails the task early.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn drive(&self, task: &mut Task) -> Result<ResultPayload, TaskFailure> {
        self.status.set_status("Submitting to API...");
        let handle = match self.service.submit(self.model, &task.params).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(?err, "submission failed");
                task.fail(TaskState::Failed, err.to_string());
                return Err(TaskFailure::Submission(err));
            }
        };
        info!(%handle, "task submitted");
        task.remote_handle = Some(handle.clone());
        task.advance(TaskState::Submitted);
        task.advance(TaskState::Polling);
        self.status.set_status("Processing image...");

        loop {
            match self.service.poll(&handle).await {
                Ok(PollResponse::Ready(payload)) => {
                    info!(attempt = task.retry_count, "generation ready");
                    task.advance(TaskState::Ready);
                    return Ok(payload);
                }
                Ok(PollResponse::Failed { error }) => {
                    warn!(%error, attempt = task.retry_count, "service rejected generation");
                    task.fail(TaskState::Failed, error.clone());
                    return Err(TaskFailure::ServiceRejection(error));
                }
                Ok(PollResponse::Pending { status }) => {
                    debug!(%status, attempt = task.retry_count, "still processing");
                }
                Err(err) => {
                    warn!(?err, attempt = task.retry_count, "poll failed; counting as pending");
                }
            }

            task.retry_count += 1;
            if task.retry_count >= self.policy.max_retries {
                let failure = TaskFailure::TimeoutExceeded {
                    polls: task.retry_count,
                };
                warn!(
                    polls = task.retry_count,
                    waited_secs = self.policy.budget().as_secs(),
                    "task timed out"
                );
                task.fail(TaskState::TimedOut, failure.to_string());
                return Err(failure);
            }

            self.status.set_status(format!(
                "Task {handle} is still processing... ({}/{})",
                task.retry_count, self.policy.max_retries
            ));
            tokio::time::sleep(self.policy.interval).await;
        }
    }
}
