// src/transport/http.rs - reqwest-backed chat transport

use async_trait::async_trait;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::Value;

use super::{ChatRequest, ChatResponse, ChatTransport, ProgressFn, UploadRequest};
use crate::chat::message::Message;
use crate::infra::config::{EndpointConfig, IdentityConfig};
use crate::infra::errors::ChatError;

const SESSION_HEADER: &str = "x-session-id";
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: EndpointConfig,
    identity: IdentityConfig,
}

/// History endpoints answer with either a bare list or `{ "messages": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    List(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

impl HttpTransport {
    pub fn new(endpoint: EndpointConfig, identity: IdentityConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(endpoint.connect_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            identity,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url.trim_end_matches('/'), path)
    }

    fn history_url(&self, session_id: &str) -> String {
        let encoded = utf8_percent_encode(session_id, NON_ALPHANUMERIC).to_string();
        self.url(&self.endpoint.history_path.replace("{session_id}", &encoded))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.identity.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Turn a non-2xx response into `ChatError::Status`.
    async fn check_status(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChatError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: crate::util::truncate_str(&body, 500).to_string(),
        })
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 99;
    }
    // Reaching 100 is reserved for the server's acknowledgement.
    ((sent * 100 / total) as u8).min(99)
}

/// Pull the file reference out of an upload response.
fn file_ref_of(v: &Value) -> Option<String> {
    ["fileRef", "fileId", "file_id", "id", "url"]
        .iter()
        .find_map(|key| v.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let endpoint = self.endpoint.chat_path.clone();
        let mut request = request;
        if request.user_id.is_none() {
            request.user_id = self.identity.user_id.clone();
        }

        tracing::debug!(
            session = %request.session_id,
            attachments = request.attachments.len(),
            "sending chat turn"
        );
        let response = self
            .authorize(self.client.post(self.url(&endpoint)))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::from_reqwest(&endpoint, e))?;
        let response = Self::check_status(&endpoint, response).await?;

        let session_id = header_str(&response, SESSION_HEADER);
        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE.as_str());

        let body = response.bytes_stream().map(move |read| {
            read.map(|bytes| bytes.to_vec()).map_err(|e| ChatError::Body {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })
        });

        Ok(ChatResponse {
            session_id,
            content_type,
            body: Box::pin(body),
        })
    }

    async fn upload(&self, file: UploadRequest, progress: ProgressFn) -> Result<String, ChatError> {
        let endpoint = self.endpoint.upload_path.clone();
        let bytes = tokio::fs::read(&file.path).await?;
        let total = bytes.len();
        let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_BYTES).map(<[u8]>::to_vec).collect();

        let report = progress.clone();
        let body = async_stream::stream! {
            let mut sent = 0usize;
            for chunk in chunks {
                sent += chunk.len();
                report(percent(sent, total));
                yield Ok::<_, std::io::Error>(chunk);
            }
        };

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body),
            total as u64,
        )
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| ChatError::from_reqwest(&endpoint, e))?;

        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(user_id) = &self.identity.user_id {
            form = form.text("userId", user_id.clone());
        }

        progress(0);
        let response = self
            .authorize(self.client.post(self.url(&endpoint)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatError::from_reqwest(&endpoint, e))?;
        let response = Self::check_status(&endpoint, response).await?;

        let v: Value = response.json().await.map_err(|e| ChatError::Body {
            endpoint: endpoint.clone(),
            message: format!("Failed to parse upload response: {e}"),
        })?;
        let file_ref = file_ref_of(&v).ok_or_else(|| ChatError::Body {
            endpoint: endpoint.clone(),
            message: "upload response carried no file reference".into(),
        })?;

        progress(100);
        tracing::info!(name = %file.name, %file_ref, "uploaded attachment");
        Ok(file_ref)
    }

    async fn history(&self, session_id: &str) -> Result<Vec<Message>, ChatError> {
        let url = self.history_url(session_id);
        let endpoint = self.endpoint.history_path.clone();
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ChatError::from_reqwest(&endpoint, e))?;
        let response = Self::check_status(&endpoint, response).await?;

        let body: HistoryBody = response.json().await.map_err(|e| ChatError::Body {
            endpoint: endpoint.clone(),
            message: format!("Failed to parse history: {e}"),
        })?;
        let messages = match body {
            HistoryBody::List(messages) | HistoryBody::Wrapped { messages } => messages,
        };
        tracing::debug!(session_id, count = messages.len(), "loaded history");
        Ok(messages)
    }
}
