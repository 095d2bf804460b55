#![allow(dead_code)]

use async_trait::async_trait;
use fluxgen::error::{PersistenceError, TransportError};
use fluxgen::flux::{GenerationService, PollResponse, ResultPayload};
use fluxgen::model::{GenerationParams, HistoryRecord, Model, OutputFormat};
use fluxgen::persistence::ResultPersistence;
use fluxgen::task::{TaskHandle, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type PollResult = Result<PollResponse, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(String),
    Poll(String),
}

#[derive(Default)]
struct Script {
    polls: HashMap<String, VecDeque<PollResult>>,
    failing_submits: HashSet<String>,
    calls: Vec<Call>,
}

/// Fake service keyed by prompt. The handle for prompt `p` is `h-p`; polls pop
/// scripted responses for that prompt and fall back to `ready` once exhausted.
#[derive(Clone, Default)]
pub struct ScriptedService {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, prompt: &str, responses: Vec<PollResult>) {
        self.inner
            .lock()
            .await
            .polls
            .insert(handle_for(prompt), VecDeque::from(responses));
    }

    pub async fn fail_submit(&self, prompt: &str) {
        self.inner
            .lock()
            .await
            .failing_submits
            .insert(prompt.to_string());
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn submitted_prompts(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                Call::Submit(p) => Some(p),
                Call::Poll(_) => None,
            })
            .collect()
    }

    pub async fn poll_count(&self, prompt: &str) -> usize {
        let handle = handle_for(prompt);
        self.calls()
            .await
            .iter()
            .filter(|c| matches!(c, Call::Poll(h) if *h == handle))
            .count()
    }
}

pub fn handle_for(prompt: &str) -> String {
    format!("h-{prompt}")
}

pub fn pending() -> PollResult {
    Ok(PollResponse::Pending {
        status: "Pending".into(),
    })
}

pub fn failed(error: &str) -> PollResult {
    Ok(PollResponse::Failed {
        error: error.into(),
    })
}

pub fn ready(sample: &str) -> PollResult {
    Ok(PollResponse::Ready(ResultPayload {
        sample: sample.into(),
        raw: serde_json::json!({ "sample": sample }),
    }))
}

pub fn transport_error() -> PollResult {
    Err(TransportError::Network("connection reset".into()))
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn submit(
        &self,
        _model: Model,
        params: &GenerationParams,
    ) -> Result<TaskHandle, TransportError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Submit(params.prompt.clone()));
        if inner.failing_submits.contains(&params.prompt) {
            return Err(TransportError::Timeout);
        }
        Ok(TaskHandle(handle_for(&params.prompt)))
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResponse, TransportError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call::Poll(handle.0.clone()));
        let next = inner
            .polls
            .get_mut(&handle.0)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| ready(&format!("https://cdn.example/{}.jpeg", handle.0)))
    }
}

/// Records every store / history call; can be told to fail `store`.
#[derive(Clone, Default)]
pub struct RecordingPersistence {
    stores: Arc<Mutex<Vec<(TaskId, String)>>>,
    history: Arc<Mutex<Vec<HistoryRecord>>>,
    fail_store: bool,
}

impl RecordingPersistence {
    pub fn failing() -> Self {
        Self {
            fail_store: true,
            ..Default::default()
        }
    }

    pub async fn stores(&self) -> Vec<(TaskId, String)> {
        self.stores.lock().await.clone()
    }

    pub async fn history(&self) -> Vec<HistoryRecord> {
        self.history.lock().await.clone()
    }

    pub async fn stored_prompts(&self) -> Vec<String> {
        self.history()
            .await
            .into_iter()
            .map(|r| r.params.prompt)
            .collect()
    }
}

#[async_trait]
impl ResultPersistence for RecordingPersistence {
    async fn store(
        &self,
        task_id: TaskId,
        payload: &ResultPayload,
        format: OutputFormat,
    ) -> Result<String, PersistenceError> {
        self.stores
            .lock()
            .await
            .push((task_id, payload.sample.clone()));
        if self.fail_store {
            return Err(PersistenceError::Download("404 Not Found".into()));
        }
        Ok(format!("generated_{}.{}", task_id.short(), format.as_str()))
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<(), PersistenceError> {
        self.history.lock().await.push(record);
        Ok(())
    }
}
