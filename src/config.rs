//! Configuration loader and validator for the generation orchestrator.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::model::Model;
use crate::polling::PollPolicy;
use crate::preset::{self, Preset};

/// Environment variable that overrides `api.key`.
pub const API_KEY_ENV: &str = "FLUX_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub api: Api,
    pub generation: Generation,
    pub polling: Polling,
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub presets: BTreeMap<String, Preset>,
}

/// Remote service access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub key: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Where results go and which model renders them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generation {
    pub model: Model,
    pub output_dir: String,
    pub history_file: String,
}

/// Poll loop budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Polling {
    pub max_retries: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub continue_on_error: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            continue_on_error: true,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `generation.output_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.generation.output_dir)?;
        if let Some(parent) = Path::new(&self.generation.history_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_retries: self.polling.max_retries,
            interval: Duration::from_secs(self.polling.interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.generation.output_dir)
    }

    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(&self.generation.history_file)
    }

    /// Built-in presets merged with the ones from this file.
    pub fn presets(&self) -> BTreeMap<String, Preset> {
        preset::merged(&self.presets)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - `FLUX_API_KEY`, when set, replaces `api.key`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            cfg.api.key = key;
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.api.key.trim().is_empty() {
        return Err(ConfigError::Invalid("api.key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.api.base_url).is_err() {
        return Err(ConfigError::Invalid("api.base_url must be an absolute URL"));
    }
    if cfg.api.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("api.request_timeout_secs must be > 0"));
    }
    if cfg.generation.output_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.output_dir must be non-empty"));
    }
    if cfg.generation.history_file.trim().is_empty() {
        return Err(ConfigError::Invalid("generation.history_file must be non-empty"));
    }
    if cfg.polling.max_retries == 0 {
        return Err(ConfigError::Invalid("polling.max_retries must be > 0"));
    }
    // interval_secs may be 0: poll back-to-back

    for preset in cfg.presets.values() {
        let mut probe = crate::model::GenerationParams::new("probe");
        preset.apply(&mut probe);
        if probe.validate().is_err() {
            return Err(ConfigError::Invalid("presets contain out-of-range values"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration document.
pub fn example() -> &'static str {
    r#"api:
  key: "YOUR_BFL_API_KEY"
  base_url: "https://api.bfl.ml/v1/"
  request_timeout_secs: 30

generation:
  model: "flux-pro-1.1"
  output_dir: "./output"
  history_file: "./history.json"

polling:
  max_retries: 60
  interval_secs: 5

batch:
  continue_on_error: true

presets:
  Portrait:
    width: 768
    height: 1024
    safety_tolerance: 2
    guidance: 3.5
    steps: 50
"#
}
