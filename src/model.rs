use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    #[serde(rename = "flux-pro-1.1")]
    FluxPro11,
    #[serde(rename = "flux-pro")]
    FluxPro,
    #[serde(rename = "flux-dev")]
    FluxDev,
    #[serde(rename = "flux-pro-1.1-ultra")]
    FluxPro11Ultra,
}

impl Model {
    pub const ALL: [Model; 4] = [
        Model::FluxPro11,
        Model::FluxPro,
        Model::FluxDev,
        Model::FluxPro11Ultra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::FluxPro11 => "flux-pro-1.1",
            Model::FluxPro => "flux-pro",
            Model::FluxDev => "flux-dev",
            Model::FluxPro11Ultra => "flux-pro-1.1-ultra",
        }
    }

    /// The ultra endpoint takes an aspect ratio instead of explicit dimensions.
    pub fn is_ultra(&self) -> bool {
        matches!(self, Model::FluxPro11Ultra)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ValidationError::Model(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(ValidationError::OutputFormat(s.to_string())),
        }
    }
}

static ASPECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3})\s*:\s*(\d{1,3})\s*$").expect("valid aspect regex"));

/// `W:H` ratio accepted by the service, from 9:21 up to 21:9.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct AspectRatio {
    width: u32,
    height: u32,
}

impl AspectRatio {
    pub fn new(width: u32, height: u32) -> Result<Self, ValidationError> {
        let in_range = width > 0
            && height > 0
            && 21 * width >= 9 * height
            && 9 * width <= 21 * height;
        if !in_range {
            return Err(ValidationError::AspectRatio(format!("{width}:{height}")));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self { width: 16, height: 9 }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ASPECT_RE
            .captures(s)
            .ok_or_else(|| ValidationError::AspectRatio(s.to_string()))?;
        let parse = |i: usize| {
            caps[i]
                .parse::<u32>()
                .map_err(|_| ValidationError::AspectRatio(s.to_string()))
        };
        AspectRatio::new(parse(1)?, parse(2)?)
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

/// Everything the service needs to render one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub safety_tolerance: u8,
    pub guidance: f64,
    pub steps: u32,
    pub seed: Option<u64>,
    pub prompt_upsampling: bool,
    pub raw_mode: bool,
    pub aspect_ratio: AspectRatio,
    pub output_format: OutputFormat,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: 1024,
            height: 768,
            safety_tolerance: 2,
            guidance: 2.5,
            steps: 40,
            seed: None,
            prompt_upsampling: false,
            raw_mode: false,
            aspect_ratio: AspectRatio::default(),
            output_format: OutputFormat::Jpeg,
        }
    }

    /// Copy of these params with the prompt replaced.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        self.validate_settings()
    }

    /// Everything except the prompt; used for batch templates.
    pub fn validate_settings(&self) -> Result<(), ValidationError> {
        if self.width % 32 != 0 || self.height % 32 != 0 {
            return Err(ValidationError::Dimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.safety_tolerance > 3 {
            return Err(ValidationError::SafetyTolerance(self.safety_tolerance));
        }
        // written this way so NaN is rejected
        if !(self.guidance > 0.0 && self.guidance <= 20.0) {
            return Err(ValidationError::Guidance(self.guidance));
        }
        if !(1..=150).contains(&self.steps) {
            return Err(ValidationError::Steps(self.steps));
        }
        Ok(())
    }

    /// First 50 characters of the prompt, for log lines.
    pub fn prompt_preview(&self) -> String {
        let mut preview: String = self.prompt.chars().take(50).collect();
        if self.prompt.chars().count() > 50 {
            preview.push_str("...");
        }
        preview
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
        }
    }
}

/// A named list of prompts sharing one parameter template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub name: String,
    pub prompts: Vec<String>,
    pub base_params: GenerationParams,
    pub continue_on_error: bool,
    pub status: BatchStatus,
}

impl BatchJob {
    pub fn new(
        name: impl Into<String>,
        prompts: Vec<String>,
        base_params: GenerationParams,
    ) -> Self {
        Self {
            name: name.into(),
            prompts,
            base_params,
            continue_on_error: true,
            status: BatchStatus::Pending,
        }
    }

    /// Batch named after the current local time, e.g. `Batch_20240131_142501`.
    pub fn timestamped(prompts: Vec<String>, base_params: GenerationParams) -> Self {
        let name = format!("Batch_{}", Local::now().format("%Y%m%d_%H%M%S"));
        Self::new(name, prompts, base_params)
    }

    pub fn continue_on_error(mut self, value: bool) -> Self {
        self.continue_on_error = value;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompts.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyBatchName);
        }
        self.base_params.validate_settings()
    }

    /// Params for one prompt of this batch.
    pub fn item(&self, prompt: &str) -> GenerationParams {
        self.base_params.with_prompt(prompt)
    }
}

/// One saved result, appended to the history file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub filename: String,
    pub params: GenerationParams,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GenerationParams {
        GenerationParams::new("a lighthouse at dusk")
    }

    #[test]
    fn defaults_are_valid() {
        valid().validate().unwrap();
    }

    #[test]
    fn empty_or_blank_prompt_rejected() {
        let p = valid().with_prompt("");
        assert_eq!(p.validate(), Err(ValidationError::EmptyPrompt));
        let p = valid().with_prompt("   \n");
        assert_eq!(p.validate(), Err(ValidationError::EmptyPrompt));
    }

    #[test]
    fn width_boundary() {
        let mut p = valid();
        p.width = 31;
        assert!(matches!(p.validate(), Err(ValidationError::Dimensions { .. })));
        p.width = 32;
        p.validate().unwrap();
    }

    #[test]
    fn height_boundary() {
        let mut p = valid();
        p.height = 33;
        assert!(matches!(p.validate(), Err(ValidationError::Dimensions { .. })));
        p.height = 64;
        p.validate().unwrap();
    }

    #[test]
    fn safety_tolerance_boundary() {
        let mut p = valid();
        p.safety_tolerance = 0;
        p.validate().unwrap();
        p.safety_tolerance = 3;
        p.validate().unwrap();
        p.safety_tolerance = 4;
        assert_eq!(p.validate(), Err(ValidationError::SafetyTolerance(4)));
    }

    #[test]
    fn guidance_boundary() {
        let mut p = valid();
        p.guidance = 0.0;
        assert_eq!(p.validate(), Err(ValidationError::Guidance(0.0)));
        p.guidance = 0.01;
        p.validate().unwrap();
        p.guidance = 20.0;
        p.validate().unwrap();
        p.guidance = 20.01;
        assert_eq!(p.validate(), Err(ValidationError::Guidance(20.01)));
        p.guidance = f64::NAN;
        assert!(matches!(p.validate(), Err(ValidationError::Guidance(_))));
    }

    #[test]
    fn steps_boundary() {
        let mut p = valid();
        p.steps = 0;
        assert_eq!(p.validate(), Err(ValidationError::Steps(0)));
        p.steps = 1;
        p.validate().unwrap();
        p.steps = 150;
        p.validate().unwrap();
        p.steps = 151;
        assert_eq!(p.validate(), Err(ValidationError::Steps(151)));
    }

    #[test]
    fn first_violation_is_reported() {
        let mut p = valid().with_prompt("");
        p.width = 31;
        p.steps = 0;
        assert_eq!(p.validate(), Err(ValidationError::EmptyPrompt));

        let mut p = valid();
        p.safety_tolerance = 9;
        p.steps = 0;
        assert_eq!(p.validate(), Err(ValidationError::SafetyTolerance(9)));
    }

    #[test]
    fn aspect_ratio_parsing() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::default());
        assert_eq!(" 21 : 9 ".parse::<AspectRatio>().unwrap().to_string(), "21:9");
        "9:21".parse::<AspectRatio>().unwrap();
        assert!("22:9".parse::<AspectRatio>().is_err());
        assert!("0:1".parse::<AspectRatio>().is_err());
        assert!("wide".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn params_serde_uses_wire_names() {
        let json = serde_json::to_value(valid()).unwrap();
        assert_eq!(json["aspect_ratio"], "16:9");
        assert_eq!(json["output_format"], "jpeg");
        let back: GenerationParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, valid());
    }

    #[test]
    fn model_round_trips_through_str() {
        for m in Model::ALL {
            assert_eq!(m.as_str().parse::<Model>().unwrap(), m);
        }
        assert!("flux-9".parse::<Model>().is_err());
    }

    #[test]
    fn batch_validation() {
        let job = BatchJob::new("b", vec![], valid());
        assert_eq!(job.validate(), Err(ValidationError::EmptyBatch));

        let job = BatchJob::new(" ", vec!["x".into()], valid());
        assert_eq!(job.validate(), Err(ValidationError::EmptyBatchName));

        // the template prompt is ignored
        let job = BatchJob::new("b", vec!["x".into()], valid().with_prompt(""));
        job.validate().unwrap();

        let mut base = valid();
        base.steps = 0;
        let job = BatchJob::new("b", vec!["x".into()], base);
        assert_eq!(job.validate(), Err(ValidationError::Steps(0)));
    }

    #[test]
    fn timestamped_batch_name() {
        let job = BatchJob::timestamped(vec!["x".into()], valid());
        assert!(job.name.starts_with("Batch_"));
        assert_eq!(job.status, BatchStatus::Pending);
        assert!(job.continue_on_error);
    }
}
