use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageWatchError {
    #[error("Invalid problem event: {payload}")]
    Protocol { payload: String },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        detail: Option<String>,
    },

    /// Any other HTTP or in-band problem status. Problem events may carry
    /// codes outside the HTTP range, hence `i64`. `request` is the method and
    /// URL of the failed call, absent for in-band problems.
    #[error("API request failed with status {status}: {message}")]
    Api {
        status: i64,
        message: String,
        body: Option<serde_json::Value>,
        request: Option<String>,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Log stream timed out after {0:?}")]
    StreamTimeout(Duration),

    #[error("Pipeline stage '{stage}' did not complete within {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    #[error("Poll interval must be greater than zero, got {0:?}")]
    InvalidPollInterval(Duration),

    #[error("Invalid profile name '{0}': must match ^[A-Za-z0-9_-]+$")]
    InvalidProfileName(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl StageWatchError {
    /// True for both the stream read timeout and the stage completion timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StreamTimeout(_) | Self::StageTimeout { .. })
    }

    /// HTTP-style status carried by the error, if any.
    pub fn status(&self) -> Option<i64> {
        match self {
            Self::Validation { .. } => Some(400),
            Self::Api { status, .. } => Some(*status),
            Self::Authentication(_) => Some(401),
            Self::Authorization(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::RateLimited { .. } => Some(429),
            Self::Network(e) => e.status().map(|s| i64::from(s.as_u16())),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StageWatchError>;
