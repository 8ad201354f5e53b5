use std::time::Duration;
use thiserror::Error;

/// Failures that originate in the request throttle itself.
///
/// A work item's own failure never appears here: it is handed back to the
/// caller in the caller's error type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThrottleError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Throttle saturated: queue capacity of {capacity} reached")]
    Saturated { capacity: usize },

    #[error("Timed out after {0:?} waiting for dispatch")]
    Timeout(Duration),

    #[error("Work item panicked: {0}")]
    WorkPanicked(String),

    #[error("Throttle scheduler is no longer running")]
    Closed,
}

pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// Errors returned by the tracker API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Tracker API error {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the tool layer.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Errors raised while writing client integration files.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Existing file {path} is not a JSON object: {reason}")]
    InvalidFile {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("Cannot determine the home directory; pass --output explicitly")]
    NoHomeDirectory,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}
