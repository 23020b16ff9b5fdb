// src/chat/message.rs - Chat message model and partial updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a message within one session.
pub type MessageId = String;

/// Generate a fresh message id. Uniqueness is all that matters here.
pub fn new_message_id(role: Role) -> MessageId {
    format!("{}-{}", role.as_str(), uuid::Uuid::new_v4().simple())
}

/// Id for replayed messages that arrive without one.
fn generated_id() -> MessageId {
    format!("msg-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citation attached to an assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A file referenced by a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size_label: String,
    /// Server-side reference returned by the upload endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "generated_id")]
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now", alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub error: bool,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(role),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            sources: None,
            attachments: Vec::new(),
            error: false,
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self {
            attachments,
            ..Self::new(Role::User, content)
        }
    }

    /// Empty assistant message that will receive streamed content.
    pub fn assistant_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, "")
        }
    }

    /// A finished assistant message flagged as an error.
    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            error: true,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// How a patch changes message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPatch {
    Append(String),
    Replace(String),
}

/// Partial update applied through [`MessageStore::update_by_id`](super::store::MessageStore::update_by_id).
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<ContentPatch>,
    pub is_streaming: Option<bool>,
    pub sources: Option<Vec<Source>>,
    pub error: Option<bool>,
}

impl MessagePatch {
    pub fn append(text: impl Into<String>) -> Self {
        Self {
            content: Some(ContentPatch::Append(text.into())),
            ..Default::default()
        }
    }

    /// Terminal patch: optional final content and sources, streaming off.
    pub fn finish(content: Option<String>, sources: Option<Vec<Source>>) -> Self {
        Self {
            content: content.map(ContentPatch::Replace),
            is_streaming: Some(false),
            sources,
            error: None,
        }
    }

    /// Terminal patch that overwrites content with a user-facing error text.
    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            content: Some(ContentPatch::Replace(text.into())),
            is_streaming: Some(false),
            sources: None,
            error: Some(true),
        }
    }

    /// Stop streaming and keep whatever content arrived so far.
    pub fn freeze() -> Self {
        Self {
            is_streaming: Some(false),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_role_prefixed() {
        let a = new_message_id(Role::User);
        let b = new_message_id(Role::User);
        assert_ne!(a, b);
        assert!(a.starts_with("user-"));
        assert!(new_message_id(Role::Assistant).starts_with("assistant-"));
    }

    #[test]
    fn test_placeholder_is_streaming_and_empty() {
        let m = Message::assistant_placeholder();
        assert_eq!(m.role, Role::Assistant);
        assert!(m.is_streaming);
        assert!(m.content.is_empty());
        assert!(!m.error);
    }

    #[test]
    fn test_user_message_carries_attachments() {
        let att = AttachmentRef {
            name: "cv.pdf".into(),
            mime_type: "application/pdf".into(),
            size_label: "120.0 KB".into(),
            file_ref: Some("file_1".into()),
        };
        let m = Message::user("review my cv", vec![att.clone()]);
        assert_eq!(m.attachments, vec![att]);
        assert!(!m.is_streaming);
    }

    #[test]
    fn test_history_json_deserializes_with_defaults() {
        let json = r#"{"id":"m1","role":"assistant","content":"Solar installer roles are growing.",
            "sources":[{"title":"IEA report","url":"https://iea.org","type":"report"}]}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert!(!m.is_streaming);
        assert!(!m.error);
        let sources = m.sources.unwrap();
        assert_eq!(sources[0].kind.as_deref(), Some("report"));
    }

    #[test]
    fn test_patch_constructors() {
        assert_eq!(
            MessagePatch::append("x").content,
            Some(ContentPatch::Append("x".into()))
        );
        assert!(MessagePatch::freeze().content.is_none());
        let f = MessagePatch::fail("oops");
        assert_eq!(f.error, Some(true));
        assert_eq!(f.is_streaming, Some(false));
        let done = MessagePatch::finish(None, None);
        assert!(done.content.is_none() && done.sources.is_none());
        assert_eq!(done.is_streaming, Some(false));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
    }
}
