//! Batch queue: turns each batch job into individual tasks.
//!
//! Progress here means "handed off to the task queue", not "finished". A job is
//! `completed` as soon as every prompt has been enqueued or skipped.
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::SubmitError;
use crate::model::{BatchJob, BatchStatus};
use crate::status::StatusReporter;
use crate::task::TaskId;
use crate::task_queue::TaskSink;

/// What happened while dispatching one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub enqueued: Vec<TaskId>,
    /// Prompt indexes that failed to enqueue.
    pub failed: Vec<usize>,
    /// Prompts never attempted because an earlier one failed.
    pub skipped: usize,
}

enum BatchMessage {
    Job(BatchJob),
    Shutdown,
}

#[derive(Clone)]
pub struct BatchQueue {
    tx: mpsc::UnboundedSender<BatchMessage>,
    status: Arc<StatusReporter>,
}

impl BatchQueue {
    pub fn spawn(sink: Arc<dyn TaskSink>, status: Arc<StatusReporter>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_status = Arc::clone(&status);
        let join = tokio::spawn(async move {
            info!("batch queue processor started");
            while let Some(message) = rx.recv().await {
                match message {
                    BatchMessage::Job(mut job) => {
                        dispatch(&mut job, sink.as_ref(), &worker_status);
                    }
                    BatchMessage::Shutdown => break,
                }
            }
            info!("batch queue processor stopped");
        });
        (Self { tx, status }, join)
    }

    /// Validate and queue a job. Never waits on the worker.
    pub fn enqueue(&self, job: BatchJob) -> Result<(), SubmitError> {
        job.validate()?;
        let name = job.name.clone();
        if self.tx.is_closed() {
            return Err(SubmitError::QueueClosed);
        }
        // recorded before the send so the worker's `running` can't be overwritten
        self.status.set_batch_status(&name, BatchStatus::Pending);
        self.status.set_batch_progress(0.0, "Batch job queued");
        self.tx
            .send(BatchMessage::Job(job))
            .map_err(|_| SubmitError::QueueClosed)?;
        info!(job = %name, "batch job added to queue");
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BatchMessage::Shutdown);
    }
}

/// Hand every prompt of `job` to `sink`, in order.
///
/// A prompt whose params fail validation is logged; with `continue_on_error`
/// off, the rest of the job is skipped.
#[instrument(skip_all, fields(job = %job.name))]
pub fn dispatch(job: &mut BatchJob, sink: &dyn TaskSink, status: &StatusReporter) -> DispatchSummary {
    info!(prompts = job.prompts.len(), "processing batch job");
    job.status = BatchStatus::Running;
    status.set_batch_status(&job.name, job.status);

    let total = job.prompts.len();
    let mut summary = DispatchSummary::default();

    for (i, prompt) in job.prompts.iter().enumerate() {
        match sink.enqueue(job.item(prompt)) {
            Ok(id) => summary.enqueued.push(id),
            Err(err) => {
                error!(?err, item = i + 1, "error in batch processing");
                summary.failed.push(i);
                if !job.continue_on_error {
                    summary.skipped = total - i - 1;
                    warn!(skipped = summary.skipped, "stopping batch after failure");
                    break;
                }
            }
        }
        let done = i + 1;
        let percent = done as f32 / total as f32 * 100.0;
        status.set_batch_progress(percent, format!("Processing {done}/{total} ({percent:.1}%)"));
    }

    job.status = BatchStatus::Completed;
    status.set_batch_status(&job.name, job.status);
    let final_percent = if summary.skipped == 0 {
        100.0
    } else {
        status.current_batch_progress().percent
    };
    status.set_batch_progress(final_percent, "Batch processing completed");
    info!(
        enqueued = summary.enqueued.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped,
        "batch dispatched"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::model::GenerationParams;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl TaskSink for RecordingSink {
        fn enqueue(&self, params: GenerationParams) -> Result<TaskId, SubmitError> {
            params.validate()?;
            self.prompts.lock().unwrap().push(params.prompt);
            Ok(TaskId::new())
        }
    }

    fn job(prompts: &[&str], continue_on_error: bool) -> BatchJob {
        BatchJob::new(
            "test-batch",
            prompts.iter().map(|p| p.to_string()).collect(),
            GenerationParams::new("template"),
        )
        .continue_on_error(continue_on_error)
    }

    #[test]
    fn all_prompts_enqueued_in_order() {
        let sink = RecordingSink::default();
        let status = StatusReporter::new();
        let mut job = job(&["a", "b", "c"], true);

        let summary = dispatch(&mut job, &sink, &status);

        assert_eq!(sink.prompts(), vec!["a", "b", "c"]);
        assert_eq!(summary.enqueued.len(), 3);
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(status.batch_status("test-batch"), Some(BatchStatus::Completed));
        let progress = status.current_batch_progress();
        assert_eq!(progress.percent, 100.0);
        assert_eq!(progress.label, "Batch processing completed");
    }

    #[test]
    fn continue_on_error_skips_only_the_bad_item() {
        let sink = RecordingSink::default();
        let status = StatusReporter::new();
        let mut job = job(&["a", " ", "c"], true);

        let summary = dispatch(&mut job, &sink, &status);

        assert_eq!(sink.prompts(), vec!["a", "c"]);
        assert_eq!(summary.failed, vec![1]);
        assert_eq!(summary.skipped, 0);
        assert_eq!(job.status, BatchStatus::Completed);
    }

    #[test]
    fn stop_on_error_abandons_the_rest() {
        let sink = RecordingSink::default();
        let status = StatusReporter::new();
        let mut job = job(&["a", "", "c"], false);

        let summary = dispatch(&mut job, &sink, &status);

        assert_eq!(sink.prompts(), vec!["a"]);
        assert_eq!(summary.enqueued.len(), 1);
        assert_eq!(summary.failed, vec![1]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(job.status, BatchStatus::Completed);
        let progress = status.current_batch_progress();
        assert!((progress.percent - 100.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn progress_counts_handoffs() {
        struct Probe<'a> {
            status: &'a StatusReporter,
            seen: Mutex<Vec<f32>>,
        }
        impl TaskSink for Probe<'_> {
            fn enqueue(&self, _params: GenerationParams) -> Result<TaskId, SubmitError> {
                self.seen
                    .lock()
                    .unwrap()
                    .push(self.status.current_batch_progress().percent);
                Ok(TaskId::new())
            }
        }

        let status = StatusReporter::new();
        let probe = Probe {
            status: &status,
            seen: Mutex::new(Vec::new()),
        };
        let mut job = job(&["a", "b", "c", "d"], true);
        dispatch(&mut job, &probe, &status);

        // each hand-off observes the progress left by the previous one
        assert_eq!(*probe.seen.lock().unwrap(), vec![0.0, 25.0, 50.0, 75.0]);
    }

    #[tokio::test]
    async fn queue_rejects_invalid_jobs_before_queueing() {
        let sink: Arc<dyn TaskSink> = Arc::new(RecordingSink::default());
        let status = Arc::new(StatusReporter::new());
        let (queue, join) = BatchQueue::spawn(sink, Arc::clone(&status));

        let err = queue.enqueue(job(&[], true)).unwrap_err();
        assert!(matches!(err, SubmitError::Validation(ValidationError::EmptyBatch)));
        assert_eq!(status.batch_status("test-batch"), None);

        queue.shutdown();
        join.await.unwrap();
        assert!(matches!(
            queue.enqueue(job(&["a"], true)),
            Err(SubmitError::QueueClosed)
        ));
    }
}
