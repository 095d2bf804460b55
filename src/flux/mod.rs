use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TransportError;
use crate::flux::model::{GetResultResponse, SubmitResponse};
use crate::model::{GenerationParams, Model};
use crate::task::TaskHandle;

pub mod model;

pub const FLUX_API_BASE: &str = "https://api.bfl.ml/v1/";

/// A finished generation as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPayload {
    /// Signed URL of the rendered image.
    pub sample: String,
    /// The full `result` object, kept for callers that want more than the URL.
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Ready(ResultPayload),
    Failed { error: String },
    Pending { status: String },
}

/// The two operations the orchestrator needs from the remote service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn submit(
        &self,
        model: Model,
        params: &GenerationParams,
    ) -> Result<TaskHandle, TransportError>;

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResponse, TransportError>;
}

#[derive(Clone)]
pub struct FluxClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for FluxClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl FluxClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(FLUX_API_BASE).context("invalid default FLUX URL")?;
        Self::with_base_url(api_key, base_url, timeout)
    }

    pub fn with_base_url(api_key: String, mut base_url: Url, timeout: Duration) -> Result<Self> {
        // Url::join drops the last segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("fluxgen/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.api.base_url).context("invalid api.base_url")?;
        Self::with_base_url(cfg.api.key.clone(), base_url, cfg.request_timeout())
    }

    pub fn build_submit_request(
        &self,
        model: Model,
        params: &GenerationParams,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(model.as_str())
            .context("invalid FLUX base URL")?;
        self.http
            .post(endpoint)
            .header("X-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&build_submit_body(model, params))
            .build()
            .context("failed to build FLUX request")
    }

    async fn read_body(res: reqwest::Response) -> Result<String, TransportError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "FLUX API error");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.text().await?)
    }
}

#[async_trait]
impl GenerationService for FluxClient {
    async fn submit(
        &self,
        model: Model,
        params: &GenerationParams,
    ) -> Result<TaskHandle, TransportError> {
        let request = self
            .build_submit_request(model, params)
            .map_err(|e| TransportError::Network(format!("{e:#}")))?;
        debug!(url = %request.url(), prompt = %params.prompt_preview(), "submitting generation");

        let res = self.http.execute(request).await?;
        let body = Self::read_body(res).await?;
        let payload: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| TransportError::Malformed(format!("{e}: {body}")))?;
        info!(handle = %payload.id, %model, "generation task created");
        Ok(TaskHandle(payload.id))
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollResponse, TransportError> {
        let mut url = self
            .base_url
            .join("get_result")
            .map_err(|e| TransportError::Network(e.to_string()))?;
        url.query_pairs_mut().append_pair("id", &handle.0);

        let res = self
            .http
            .get(url)
            .header("X-Key", &self.api_key)
            .send()
            .await?;
        let body = Self::read_body(res).await?;
        debug!(%handle, %body, "poll response");
        let payload: GetResultResponse = serde_json::from_str(&body)
            .map_err(|e| TransportError::Malformed(format!("{e}: {body}")))?;
        interpret_result(payload)
    }
}

/// JSON body for a submission. The ultra model takes an aspect ratio and raw
/// flag in place of explicit dimensions and sampler settings.
pub fn build_submit_body(model: Model, params: &GenerationParams) -> Value {
    let mut body = Map::new();
    body.insert("prompt".into(), json!(params.prompt));
    if model.is_ultra() {
        body.insert("aspect_ratio".into(), json!(params.aspect_ratio.to_string()));
        body.insert("raw".into(), json!(params.raw_mode));
    } else {
        body.insert("width".into(), json!(params.width));
        body.insert("height".into(), json!(params.height));
        body.insert("guidance".into(), json!(params.guidance));
        body.insert("steps".into(), json!(params.steps));
    }
    body.insert("safety_tolerance".into(), json!(params.safety_tolerance));
    body.insert("prompt_upsampling".into(), json!(params.prompt_upsampling));
    body.insert("output_format".into(), json!(params.output_format.as_str()));
    if let Some(seed) = params.seed {
        body.insert("seed".into(), json!(seed));
    }
    Value::Object(body)
}

/// Map a `get_result` body onto ready / failed / pending.
///
/// A `Ready` body without `result.sample` is malformed and surfaces as a
/// transport error, which the poll loop retries.
pub fn interpret_result(resp: GetResultResponse) -> Result<PollResponse, TransportError> {
    match resp.status.as_str() {
        "Ready" => {
            let raw = resp.result.unwrap_or(Value::Null);
            let sample = raw
                .get("sample")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TransportError::Malformed("Ready result without a sample URL".to_string())
                })?
                .to_string();
            Ok(PollResponse::Ready(ResultPayload { sample, raw }))
        }
        "Failed" | "Error" | "Request Moderated" | "Content Moderated" => {
            let error = resp
                .error
                .or_else(|| resp.details.as_ref().map(describe_details))
                .unwrap_or_else(|| match resp.status.as_str() {
                    "Failed" | "Error" => "Unknown error".to_string(),
                    moderated => moderated.to_string(),
                });
            Ok(PollResponse::Failed { error })
        }
        _ => Ok(PollResponse::Pending {
            status: resp.status,
        }),
    }
}

fn describe_details(details: &Value) -> String {
    match details {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
