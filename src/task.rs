use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::GenerationParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to tell tasks apart in logs and filenames.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque id the service hands back on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Submitted,
    Polling,
    Ready,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Submitted => "submitted",
            TaskState::Polling => "polling",
            TaskState::Ready => "ready",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Failed | TaskState::TimedOut)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Submitted)
                | (Queued, Failed)
                | (Submitted, Polling)
                | (Polling, Ready)
                | (Polling, Failed)
                | (Polling, TimedOut)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation request as tracked by the task worker.
///
/// Owned by the worker for its whole life; nothing else holds a reference
/// while it runs, so no field needs a lock.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub params: GenerationParams,
    pub state: TaskState,
    pub remote_handle: Option<TaskHandle>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    transitions: Vec<TaskState>,
}

impl Task {
    pub fn new(params: GenerationParams) -> Self {
        Self {
            id: TaskId::new(),
            params,
            state: TaskState::Queued,
            remote_handle: None,
            retry_count: 0,
            created_at: Utc::now(),
            error: None,
            transitions: vec![TaskState::Queued],
        }
    }

    /// Move to `next`. Terminal states are sticky.
    pub(crate) fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            tracing::warn!(task_id = %self.id, from = %self.state, to = %next, "ignoring illegal task transition");
            return;
        }
        self.state = next;
        self.transitions.push(next);
    }

    pub(crate) fn fail(&mut self, next: TaskState, message: impl Into<String>) {
        self.error = Some(message.into());
        self.advance(next);
    }

    /// Every state this task has been in, oldest first.
    pub fn transitions(&self) -> &[TaskState] {
        &self.transitions
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_queued() {
        let task = Task::new(GenerationParams::new("x"));
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.transitions(), &[TaskState::Queued]);
        assert_eq!(task.retry_count, 0);
        assert!(task.remote_handle.is_none());
    }

    #[test]
    fn happy_path_transitions_are_recorded() {
        let mut task = Task::new(GenerationParams::new("x"));
        task.advance(TaskState::Submitted);
        task.advance(TaskState::Polling);
        task.advance(TaskState::Ready);
        assert!(task.is_finished());
        assert_eq!(
            task.transitions(),
            &[
                TaskState::Queued,
                TaskState::Submitted,
                TaskState::Polling,
                TaskState::Ready
            ]
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [TaskState::Ready, TaskState::Failed, TaskState::TimedOut] {
            assert!(terminal.is_terminal());
            for next in [
                TaskState::Queued,
                TaskState::Submitted,
                TaskState::Polling,
                TaskState::Ready,
                TaskState::Failed,
                TaskState::TimedOut,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn submission_failure_skips_polling() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Queued.can_transition_to(TaskState::TimedOut));
        assert!(!TaskState::Submitted.can_transition_to(TaskState::Ready));
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let id = TaskId::new();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
