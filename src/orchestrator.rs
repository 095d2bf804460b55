//! Wiring for the two queues and their workers.
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::batch::BatchQueue;
use crate::config::Config;
use crate::error::SubmitError;
use crate::flux::{FluxClient, GenerationService};
use crate::model::{BatchJob, GenerationParams, Model};
use crate::persistence::{DiskPersistence, ResultPersistence};
use crate::polling::{PollPolicy, PollingController};
use crate::status::StatusReporter;
use crate::task::TaskId;
use crate::task_queue::{TaskQueue, TaskSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub model: Model,
    pub poll: PollPolicy,
}

impl From<&Config> for OrchestratorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            model: cfg.generation.model,
            poll: cfg.poll_policy(),
        }
    }
}

/// Owns both workers. Callers submit through it and read progress from
/// [`Orchestrator::status`].
pub struct Orchestrator {
    tasks: TaskQueue,
    batches: BatchQueue,
    status: Arc<StatusReporter>,
    task_worker: JoinHandle<()>,
    batch_worker: JoinHandle<()>,
}

impl Orchestrator {
    /// Start both workers. Must be called inside a tokio runtime.
    pub fn start(
        service: Arc<dyn GenerationService>,
        persistence: Arc<dyn ResultPersistence>,
        settings: OrchestratorSettings,
    ) -> Self {
        let status = Arc::new(StatusReporter::new());
        let controller =
            PollingController::new(service, settings.model, settings.poll, Arc::clone(&status));
        let (tasks, task_worker) =
            TaskQueue::spawn(controller, persistence, Arc::clone(&status));
        let sink: Arc<dyn TaskSink> = Arc::new(tasks.clone());
        let (batches, batch_worker) = BatchQueue::spawn(sink, Arc::clone(&status));
        info!(model = %settings.model, max_retries = settings.poll.max_retries, "orchestrator started");
        Self {
            tasks,
            batches,
            status,
            task_worker,
            batch_worker,
        }
    }

    /// Start against the real service and disk storage described by `cfg`.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = FluxClient::from_config(cfg)?;
        let http = reqwest::Client::builder()
            .user_agent("fluxgen/0.1")
            .build()
            .context("failed to build download client")?;
        let persistence = DiskPersistence::new(http, cfg.output_dir(), cfg.history_path());
        Ok(Self::start(
            Arc::new(client),
            Arc::new(persistence),
            OrchestratorSettings::from(cfg),
        ))
    }

    /// Queue a single generation. Invalid params are rejected here and never
    /// reach the queue.
    pub fn submit_generation(&self, params: GenerationParams) -> Result<TaskId, SubmitError> {
        params.validate()?;
        info!(prompt = %params.prompt_preview(), "queueing generation task");
        // set before the send so the worker's own updates are not overwritten
        self.status.set_status("Generating image...");
        self.tasks.enqueue(params)
    }

    pub fn submit_batch(&self, job: BatchJob) -> Result<(), SubmitError> {
        self.batches.enqueue(job)
    }

    pub fn status(&self) -> Arc<StatusReporter> {
        Arc::clone(&self.status)
    }

    /// Stop both workers after they finish what is already queued.
    ///
    /// The batch worker goes first so every prompt it decomposes lands in the
    /// task queue ahead of the task worker's shutdown marker.
    pub async fn shutdown(self) {
        self.batches.shutdown();
        if let Err(err) = self.batch_worker.await {
            error!(?err, "batch worker panicked");
        }
        self.tasks.shutdown();
        if let Err(err) = self.task_worker.await {
            error!(?err, "task worker panicked");
        }
        info!("orchestrator stopped");
    }

    /// Stop without draining: in-flight polls are abandoned.
    pub fn abort(self) {
        self.batch_worker.abort();
        self.task_worker.abort();
    }
}
