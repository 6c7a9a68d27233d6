// Error types for the autoscaler core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutoscalerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("provider throttled the request")]
    ProviderThrottled,

    #[error("shard busy, retry later")]
    ShardBusy,

    #[error("operation exhausted its retry budget")]
    OperationExhausted,

    #[error("shard not found: {0}")]
    NotFound(String),

    #[error("topology invariant violated: {0}")]
    Inconsistent(String),

    #[error("already at minimum shard count")]
    AlreadyAtMinimum,

    #[error("fatal engine setup failure: {0}")]
    Fatal(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for AutoscalerError {
    fn from(err: anyhow::Error) -> Self {
        AutoscalerError::Other(err.to_string())
    }
}

impl From<&str> for AutoscalerError {
    fn from(err: &str) -> Self {
        AutoscalerError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AutoscalerError>;
