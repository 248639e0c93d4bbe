//! Provisioning engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{0} not found in PATH. Install it and try again")]
    ToolNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Command failed: {command}\n{message}")]
    CommandFailed { command: String, message: String },

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Unexpected response from {source_name}: {message}")]
    InvalidResponse {
        source_name: String,
        message: String,
    },

    #[error("Missing from s3://{bucket}: {}", .keys.join(", "))]
    MissingObjects { bucket: String, keys: Vec<String> },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
