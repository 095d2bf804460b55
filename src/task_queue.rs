//! Single-consumer queue of generation tasks.
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::{SubmitError, TaskFailure};
use crate::model::{GenerationParams, HistoryRecord};
use crate::persistence::ResultPersistence;
use crate::polling::PollingController;
use crate::status::StatusReporter;
use crate::task::{Task, TaskId, TaskState};

/// Anything that accepts validated generation params.
///
/// Implemented by [`TaskQueue`]; the batch worker only sees this trait.
pub trait TaskSink: Send + Sync {
    fn enqueue(&self, params: GenerationParams) -> Result<TaskId, SubmitError>;
}

pub(crate) enum TaskMessage {
    Run(Task),
    Shutdown,
}

/// Producer side of the task queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<TaskMessage>,
    status: Arc<StatusReporter>,
}

impl TaskQueue {
    /// Start the worker and return the queue feeding it.
    pub fn spawn(
        controller: PollingController,
        persistence: Arc<dyn ResultPersistence>,
        status: Arc<StatusReporter>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = TaskWorker {
            rx,
            controller,
            persistence,
            status: Arc::clone(&status),
        };
        let join = tokio::spawn(worker.run());
        (Self { tx, status }, join)
    }

    /// Ask the worker to stop once everything queued before this call is done.
    pub fn shutdown(&self) {
        // the worker may already be gone
        let _ = self.tx.send(TaskMessage::Shutdown);
    }
}

impl TaskSink for TaskQueue {
    fn enqueue(&self, params: GenerationParams) -> Result<TaskId, SubmitError> {
        params.validate()?;
        let task = Task::new(params);
        let id = task.id;
        self.tx
            .send(TaskMessage::Run(task))
            .map_err(|_| SubmitError::QueueClosed)?;
        self.status.task_enqueued();
        Ok(id)
    }
}

struct TaskWorker {
    rx: mpsc::UnboundedReceiver<TaskMessage>,
    controller: PollingController,
    persistence: Arc<dyn ResultPersistence>,
    status: Arc<StatusReporter>,
}

impl TaskWorker {
    async fn run(mut self) {
        info!("starting task queue processor");
        while let Some(message) = self.rx.recv().await {
            match message {
                TaskMessage::Run(task) => {
                    let task = self.process(task).await;
                    self.status.task_finished(task.state);
                }
                TaskMessage::Shutdown => break,
            }
        }
        info!("task queue processor stopped");
    }

    /// Run one task to a terminal state. Never returns an error: every outcome
    /// is logged and written to the status slot.
    #[instrument(skip_all, fields(task_id = %task.id))]
    async fn process(&self, mut task: Task) -> Task {
        info!(prompt = %task.params.prompt_preview(), "processing task");
        self.status.set_status("Preparing generation request...");

        match self.controller.drive(&mut task).await {
            Ok(payload) => {
                let saved = match self
                    .persistence
                    .store(task.id, &payload, task.params.output_format)
                    .await
                {
                    Ok(filename) => {
                        let record = HistoryRecord {
                            filename: filename.clone(),
                            params: task.params.clone(),
                            timestamp: Utc::now(),
                        };
                        self.persistence.append_history(record).await.map(|_| filename)
                    }
                    Err(err) => Err(err),
                };
                match saved {
                    Ok(filename) => {
                        info!(%filename, "image saved");
                        self.status.set_status("Image generated successfully!");
                    }
                    Err(err) => {
                        error!(?err, "failed to save generated image");
                        self.status
                            .set_status(format!("Image generated but saving failed: {err}"));
                    }
                }
            }
            Err(TaskFailure::ServiceRejection(msg)) => {
                self.status.set_status(format!("Generation failed: {msg}"));
            }
            Err(TaskFailure::TimeoutExceeded { polls }) => {
                warn!(polls, "giving up on task");
                let handle = task
                    .remote_handle
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| task.id.to_string());
                self.status.set_status(format!("Task {handle} timed out."));
            }
            Err(failure @ TaskFailure::Submission(_)) => {
                self.status.set_status(format!("Error: {failure}"));
            }
        }

        debug_assert!(task.is_finished());
        if task.state != TaskState::Ready {
            info!(state = %task.state, error = ?task.error, "task ended without a result");
        }
        task
    }
}
