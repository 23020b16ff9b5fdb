// src/infra/errors.rs - Error types for climatechat

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    // Transport errors (some retriable)
    #[error("Request to '{endpoint}' failed: {message}")]
    Transport {
        endpoint: String,
        message: String,
        retriable: bool,
    },

    #[error("'{endpoint}' returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Response body from '{endpoint}' could not be read: {message}")]
    Body { endpoint: String, message: String },

    // Rejections that happen before any network call
    #[error("A response is still in progress; wait for it or stop it first")]
    Busy,

    #[error("Nothing to send: type a message or attach a file")]
    EmptyMessage,

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    pub fn is_retriable(&self) -> bool {
        match self {
            ChatError::Transport { retriable, .. } => *retriable,
            ChatError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(endpoint: &str, e: reqwest::Error) -> Self {
        ChatError::Transport {
            endpoint: endpoint.to_string(),
            retriable: e.is_timeout() || e.is_connect(),
            message: e.to_string(),
        }
    }
}

/// Validation failures for files staged before a send. The `Display` text
/// is shown inline to the user as-is.
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("'{name}' is {size_label}, which exceeds the {limit_label} limit")]
    TooLarge {
        name: String,
        size_label: String,
        limit_label: String,
    },

    #[error("'{name}' is not an accepted file type (allowed: {allowed})")]
    UnsupportedType { name: String, allowed: String },

    #[error("'{name}' could not be read: {source}")]
    Unreadable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No staged file with id '{0}'")]
    NotStaged(String),
}
