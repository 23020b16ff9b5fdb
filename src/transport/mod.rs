// src/transport/mod.rs - Chat backend transport layer

pub mod http;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::chat::message::{AttachmentRef, Message};
use crate::infra::errors::ChatError;

pub use http::HttpTransport;

/// Raw response body, one item per network read.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChatError>> + Send>>;

/// Receives upload progress as a percentage in `0..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Core trait for anything that can carry a chat turn to the backend.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Start a chat turn. Resolves once response headers are in; the body
    /// is read through [`ChatResponse::body`].
    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, ChatError>;

    /// Upload a staged file ahead of the chat turn that references it.
    /// Returns the server-side file reference.
    async fn upload(&self, file: UploadRequest, progress: ProgressFn) -> Result<String, ChatError>;

    /// Stored messages of a session, oldest first.
    async fn history(&self, session_id: &str) -> Result<Vec<Message>, ChatError>;
}

/// Body of a chat turn request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Empty for a session the server has not named yet.
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

pub struct ChatResponse {
    /// Session id announced in response headers, if any.
    pub session_id: Option<String>,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("session_id", &self.session_id)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}
