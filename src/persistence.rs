//! Result download and generation history.
use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::PersistenceError;
use crate::flux::ResultPayload;
use crate::model::{HistoryRecord, OutputFormat};
use crate::task::TaskId;

/// Where finished results go. Called once per `Ready` task.
#[async_trait]
pub trait ResultPersistence: Send + Sync {
    /// Save the artifact and return the file name it was stored under.
    async fn store(
        &self,
        task_id: TaskId,
        payload: &ResultPayload,
        format: OutputFormat,
    ) -> Result<String, PersistenceError>;

    async fn append_history(&self, record: HistoryRecord) -> Result<(), PersistenceError>;
}

/// `generated_20240131_142501_1a2b3c4d.jpeg`
pub fn result_filename(task_id: TaskId, format: OutputFormat, at: DateTime<Local>) -> String {
    format!(
        "generated_{}_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        task_id.short(),
        format.as_str()
    )
}

/// Read the history file. A missing or blank file is an empty history.
pub async fn load_history(path: &Path) -> Result<Vec<HistoryRecord>, PersistenceError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no history file found, starting fresh");
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Downloads results into a directory and keeps history as a JSON array.
#[derive(Debug)]
pub struct DiskPersistence {
    http: Client,
    output_dir: PathBuf,
    history_path: PathBuf,
    history_lock: Mutex<()>,
}

impl DiskPersistence {
    pub fn new(http: Client, output_dir: PathBuf, history_path: PathBuf) -> Self {
        Self {
            http,
            output_dir,
            history_path,
            history_lock: Mutex::new(()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), PersistenceError> {
        let mut res = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PersistenceError::Download(e.to_string()))?;

        let mut file = fs::File::create(dest).await?;
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|e| PersistenceError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ResultPersistence for DiskPersistence {
    #[instrument(skip_all, fields(%task_id))]
    async fn store(
        &self,
        task_id: TaskId,
        payload: &ResultPayload,
        format: OutputFormat,
    ) -> Result<String, PersistenceError> {
        fs::create_dir_all(&self.output_dir).await?;
        let filename = result_filename(task_id, format, Local::now());
        let dest = self.output_dir.join(&filename);
        info!(path = %dest.display(), "saving image");

        if let Err(err) = self.download(&payload.sample, &dest).await {
            if let Err(cleanup) = fs::remove_file(&dest).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(?cleanup, path = %dest.display(), "failed to remove partial download");
                }
            }
            return Err(err);
        }
        Ok(filename)
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<(), PersistenceError> {
        let _guard = self.history_lock.lock().await;
        let mut history = load_history(&self.history_path).await?;
        history.push(record);

        let encoded = serde_json::to_string_pretty(&history)?;
        let tmp = self.history_path.with_extension("json.tmp");
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &self.history_path).await?;
        Ok(())
    }
}
