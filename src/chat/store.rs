// src/chat/store.rs - Ordered message arena with a single streaming slot
//
// All mutation goes through `append`, `update_by_id` and `replace_all`, so
// the store alone keeps the invariants: insertion order is display order,
// at most one message streams at a time, and a message that stopped
// streaming never changes again.

use std::collections::HashMap;

use thiserror::Error;

use super::message::{ContentPatch, Message, MessageId, MessagePatch};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Message '{0}' is already streaming")]
    AlreadyStreaming(MessageId),

    #[error("Duplicate message id '{0}'")]
    DuplicateId(MessageId),
}

/// Result of [`MessageStore::update_by_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    NotFound,
    /// The message already reached a terminal state; the patch was dropped.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    streaming: Option<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        if self.index.contains_key(&message.id) {
            return Err(StoreError::DuplicateId(message.id));
        }
        if message.is_streaming {
            if let Some(active) = &self.streaming {
                return Err(StoreError::AlreadyStreaming(active.clone()));
            }
            self.streaming = Some(message.id.clone());
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        Ok(())
    }

    /// Apply `patch` to the message with `id`. Only a streaming message
    /// accepts patches; once it stops streaming it is frozen for good.
    pub fn update_by_id(&mut self, id: &str, patch: MessagePatch) -> UpdateOutcome {
        let Some(&pos) = self.index.get(id) else {
            return UpdateOutcome::NotFound;
        };
        let message = &mut self.messages[pos];
        if !message.is_streaming {
            tracing::debug!(id, "dropping patch for settled message");
            return UpdateOutcome::Ignored;
        }

        match patch.content {
            Some(ContentPatch::Append(text)) => message.content.push_str(&text),
            Some(ContentPatch::Replace(text)) => message.content = text,
            None => {}
        }
        if let Some(sources) = patch.sources {
            message.sources = Some(sources);
        }
        if patch.error == Some(true) {
            message.error = true;
            message.is_streaming = false;
        }
        // Restarting a stream is not a thing; only `false` is honoured.
        if patch.is_streaming == Some(false) {
            message.is_streaming = false;
        }
        if !message.is_streaming {
            self.streaming = None;
        }
        UpdateOutcome::Applied
    }

    /// Swap in a replayed history. Replayed messages are settled.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.index.clear();
        self.streaming = None;
        for mut message in messages {
            message.is_streaming = false;
            if self.index.contains_key(&message.id) {
                tracing::warn!(id = %message.id, "history contains a duplicate message id");
                message.id = super::message::new_message_id(message.role);
            }
            self.index.insert(message.id.clone(), self.messages.len());
            self.messages.push(message);
        }
    }

    pub fn clear(&mut self) {
        self.replace_all(Vec::new());
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn streaming_id(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
