use thiserror::Error;

/// A parameter constraint that did not hold. Only the first violation is reported.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("width and height must be multiples of 32 (got {width}x{height})")]
    Dimensions { width: u32, height: u32 },
    #[error("safety tolerance must be between 0 and 3 (got {0})")]
    SafetyTolerance(u8),
    #[error("guidance must be greater than 0 and at most 20 (got {0})")]
    Guidance(f64),
    #[error("steps must be between 1 and 150 (got {0})")]
    Steps(u32),
    #[error("invalid aspect ratio '{0}': expected W:H between 9:21 and 21:9")]
    AspectRatio(String),
    #[error("unknown output format '{0}'")]
    OutputFormat(String),
    #[error("unknown model '{0}'")]
    Model(String),
    #[error("batch job must have a name")]
    EmptyBatchName,
    #[error("batch job must contain at least one prompt")]
    EmptyBatch,
}

/// Failure talking to the generation service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to generation service timed out")]
    Timeout,
    #[error("failed to reach generation service: {0}")]
    Network(String),
    #[error("generation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response from generation service: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Why a task ended in `Failed` or `TimedOut`.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("submission failed: {0}")]
    Submission(#[source] TransportError),
    #[error("generation failed: {0}")]
    ServiceRejection(String),
    #[error("no result after {polls} polls")]
    TimeoutExceeded { polls: u32 },
}

/// Storing a finished result failed. The task stays `Ready`.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to download result: {0}")]
    Download(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Returned by the caller-facing entry points.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("queue worker has shut down")]
    QueueClosed,
}
