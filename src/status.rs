//! Shared, observable progress state.
//!
//! Both workers write here at every phase transition; the front end reads the
//! latest value or subscribes for changes. Backed by a single-slot
//! `tokio::sync::watch` channel, so the last write wins.
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::watch;

use crate::model::BatchStatus;
use crate::task::TaskState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchProgress {
    pub percent: f32,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub enqueued: u64,
    pub ready: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl TaskCounts {
    pub fn finished(&self) -> u64 {
        self.ready + self.failed + self.timed_out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub batch: BatchProgress,
    pub batches: BTreeMap<String, BatchStatus>,
    pub tasks: TaskCounts,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: "Ready".to_string(),
            batch: BatchProgress {
                percent: 0.0,
                label: "Ready".to_string(),
            },
            batches: BTreeMap::new(),
            tasks: TaskCounts::default(),
        }
    }
}

#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<StatusSnapshot>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        self.tx.send_modify(|s| s.status = text);
    }

    pub fn set_batch_progress(&self, percent: f32, label: impl Into<String>) {
        let label = label.into();
        self.tx.send_modify(|s| {
            s.batch = BatchProgress { percent, label };
        });
    }

    pub fn set_batch_status(&self, name: &str, status: BatchStatus) {
        self.tx.send_modify(|s| {
            s.batches.insert(name.to_string(), status);
        });
    }

    pub fn task_enqueued(&self) {
        self.tx.send_modify(|s| s.tasks.enqueued += 1);
    }

    /// Count a task that reached `state`. Non-terminal states are ignored.
    pub fn task_finished(&self, state: TaskState) {
        self.tx.send_modify(|s| match state {
            TaskState::Ready => s.tasks.ready += 1,
            TaskState::Failed => s.tasks.failed += 1,
            TaskState::TimedOut => s.tasks.timed_out += 1,
            _ => {}
        });
    }

    pub fn current_status(&self) -> String {
        self.tx.borrow().status.clone()
    }

    pub fn current_batch_progress(&self) -> BatchProgress {
        self.tx.borrow().batch.clone()
    }

    pub fn batch_status(&self, name: &str) -> Option<BatchStatus> {
        self.tx.borrow().batches.get(name).copied()
    }

    pub fn task_counts(&self) -> TaskCounts {
        self.tx.borrow().tasks
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver that wakes on every write.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}
