// src/chat/session.rs - Session coordinator: one chat turn at a time
//
// Owns the stream status and the session id. A turn moves
//   ready --submit--> processing --first byte--> streaming --terminal|abort--> ready
// and every failure inside a turn ends up as a message, never as an `Err`.
// State sits behind one mutex that is never held across an await, so the
// store has a single writer sequenced by the turn in flight.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use serde::Serialize;

use super::abort::{AbortController, AbortToken};
use super::decoder::{ChunkDecoder, StreamUpdate, RETRY_MESSAGE};
use super::message::{AttachmentRef, Message, MessageId, MessagePatch};
use super::store::{MessageStore, UpdateOutcome};
use crate::infra::errors::ChatError;
use crate::transport::{ByteStream, ChatRequest, ChatTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Ready,
    Processing,
    Streaming,
}

/// Notifications for whatever is rendering the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(StreamStatus),
    /// The server named a fresh session. Fired once per session.
    SessionAssigned(String),
    MessageAdded(Message),
    ContentAppended { id: MessageId, delta: String },
    /// Final state of the turn's assistant message.
    MessageSettled(Message),
    HistoryReplaced { session_id: String, count: usize },
    Cleared,
}

pub type SessionObserver = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// How a submitted turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { message_id: MessageId },
    /// An error-flagged assistant message was recorded.
    Failed { message_id: MessageId },
    /// Stopped by the user. `None` if no response had started yet.
    Aborted { message_id: Option<MessageId> },
}

impl TurnOutcome {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed { message_id } | TurnOutcome::Failed { message_id } => {
                Some(message_id)
            }
            TurnOutcome::Aborted { message_id } => message_id.as_deref(),
        }
    }
}

struct SessionState {
    store: MessageStore,
    status: StreamStatus,
    session_id: Option<String>,
}

impl SessionState {
    fn set_status(&mut self, status: StreamStatus, events: &mut Vec<SessionEvent>) {
        if self.status != status {
            self.status = status;
            events.push(SessionEvent::Status(status));
        }
    }

    /// Take the first id the server hands us for a fresh session.
    fn adopt_session(&mut self, id: String, events: &mut Vec<SessionEvent>) {
        match &self.session_id {
            None => {
                tracing::info!(session_id = %id, "session assigned");
                self.session_id = Some(id.clone());
                events.push(SessionEvent::SessionAssigned(id));
            }
            Some(current) if *current != id => {
                tracing::debug!(%current, offered = %id, "keeping existing session id");
            }
            Some(_) => {}
        }
    }
}

enum StreamEnd {
    Settled,
    Aborted,
}

/// Returns the session to `ready` when a turn's future is dropped before
/// it settles, freezing whatever message was streaming.
struct TurnGuard<'a> {
    coordinator: &'a SessionCoordinator,
    armed: bool,
}

impl<'a> TurnGuard<'a> {
    fn arm(coordinator: &'a SessionCoordinator) -> Self {
        Self {
            coordinator,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::info!("turn dropped before it settled");
        self.coordinator.with_state(|st, ev| {
            if let Some(id) = st.store.streaming_id().map(str::to_string) {
                st.store.update_by_id(&id, MessagePatch::freeze());
                if let Some(message) = st.store.get(&id) {
                    ev.push(SessionEvent::MessageSettled(message.clone()));
                }
            }
            st.set_status(StreamStatus::Ready, ev);
        });
    }
}

pub struct SessionCoordinator {
    transport: Arc<dyn ChatTransport>,
    state: Mutex<SessionState>,
    abort: AbortController,
    observer: Option<SessionObserver>,
}

impl SessionCoordinator {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState {
                store: MessageStore::new(),
                status: StreamStatus::Ready,
                session_id: None,
            }),
            abort: AbortController::new(),
            observer: None,
        }
    }

    /// Continue a session the caller already knows the id of.
    pub fn with_session_id(self, session_id: impl Into<String>) -> Self {
        self.lock().session_id = Some(session_id.into());
        self
    }

    pub fn with_observer(mut self, observer: SessionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    pub fn status(&self) -> StreamStatus {
        self.lock().status
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Snapshot of the conversation in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().store.messages().to_vec()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock().store.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic elsewhere must not wedge the conversation.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` under the state lock, then emit the events it queued.
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState, &mut Vec<SessionEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut events)
        };
        if let Some(observer) = &self.observer {
            for event in &events {
                observer(event);
            }
        }
        result
    }

    /// Send one user turn and stream the answer into the store.
    ///
    /// Returns `Err` only when the turn is rejected up front (busy, empty).
    /// Transport and decoding problems are recorded as messages.
    pub async fn submit(
        &self,
        text: &str,
        attachments: Vec<AttachmentRef>,
    ) -> Result<TurnOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (request, token) = self.with_state(|st, ev| {
            if st.status != StreamStatus::Ready {
                return Err(ChatError::Busy);
            }
            let user = Message::user(text, attachments.clone());
            st.store
                .append(user.clone())
                .map_err(|e| ChatError::Other(e.into()))?;
            ev.push(SessionEvent::MessageAdded(user));
            st.set_status(StreamStatus::Processing, ev);
            let request = ChatRequest {
                message: text.to_string(),
                session_id: st.session_id.clone().unwrap_or_default(),
                user_id: None,
                attachments,
            };
            Ok((request, self.abort.issue()))
        })?;
        let mut guard = TurnGuard::arm(self);

        let sent = tokio::select! {
            biased;
            _ = token.aborted() => None,
            result = self.transport.send(request) => Some(result),
        };

        let response = match sent {
            None => {
                guard.disarm();
                tracing::info!("turn stopped before the response started");
                self.with_state(|st, ev| st.set_status(StreamStatus::Ready, ev));
                return Ok(TurnOutcome::Aborted { message_id: None });
            }
            Some(Err(e)) => {
                guard.disarm();
                tracing::warn!("chat request failed: {e}");
                let message = Message::assistant_error(RETRY_MESSAGE);
                let message_id = message.id.clone();
                self.with_state(|st, ev| {
                    if st.store.append(message.clone()).is_ok() {
                        ev.push(SessionEvent::MessageAdded(message));
                    }
                    st.set_status(StreamStatus::Ready, ev);
                });
                return Ok(TurnOutcome::Failed { message_id });
            }
            Some(Ok(response)) => response,
        };

        tracing::debug!(content_type = ?response.content_type, "response started");
        let placeholder = Message::assistant_placeholder();
        let message_id = placeholder.id.clone();
        let appended = self.with_state(|st, ev| {
            if let Some(id) = response.session_id.clone() {
                st.adopt_session(id, ev);
            }
            let appended = st.store.append(placeholder.clone());
            if appended.is_ok() {
                ev.push(SessionEvent::MessageAdded(placeholder));
            } else {
                st.set_status(StreamStatus::Ready, ev);
            }
            appended
        });
        if let Err(e) = appended {
            guard.disarm();
            return Err(ChatError::Other(e.into()));
        }

        let end = self.read_body(&message_id, response.body, &token).await;
        guard.disarm();
        Ok(self.settle(&message_id, end))
    }

    async fn read_body(&self, id: &str, mut body: ByteStream, token: &AbortToken) -> StreamEnd {
        let mut decoder = ChunkDecoder::new();
        let mut first_read = true;
        loop {
            if !token.is_current() {
                return StreamEnd::Aborted;
            }
            let read = tokio::select! {
                biased;
                _ = token.aborted() => return StreamEnd::Aborted,
                read = body.next() => read,
            };
            let updates = match read {
                Some(Ok(bytes)) => {
                    if first_read {
                        first_read = false;
                        self.with_state(|st, ev| st.set_status(StreamStatus::Streaming, ev));
                    }
                    decoder.feed(&bytes)
                }
                Some(Err(e)) => {
                    tracing::warn!("response body failed: {e}");
                    decoder.fail()
                }
                None => decoder.finish(),
            };
            self.apply_updates(id, updates);
            if decoder.is_terminated() {
                // Whatever else the server sends is not read.
                return StreamEnd::Settled;
            }
        }
    }

    fn apply_updates(&self, id: &str, updates: Vec<StreamUpdate>) {
        if updates.is_empty() {
            return;
        }
        self.with_state(|st, ev| {
            for update in updates {
                if let StreamUpdate::SessionAssigned(session_id) = update {
                    st.adopt_session(session_id, ev);
                    continue;
                }
                let Some(patch) = update.to_patch() else {
                    continue;
                };
                let outcome = st.store.update_by_id(id, patch);
                if let (UpdateOutcome::Applied, StreamUpdate::Append(delta)) = (outcome, update) {
                    ev.push(SessionEvent::ContentAppended {
                        id: id.to_string(),
                        delta,
                    });
                }
            }
        });
    }

    fn settle(&self, id: &str, end: StreamEnd) -> TurnOutcome {
        self.with_state(|st, ev| {
            if let StreamEnd::Aborted = end {
                tracing::info!(id, "response stopped by user");
                st.store.update_by_id(id, MessagePatch::freeze());
            }
            let failed = match st.store.get(id) {
                Some(message) => {
                    ev.push(SessionEvent::MessageSettled(message.clone()));
                    message.error
                }
                None => false,
            };
            st.set_status(StreamStatus::Ready, ev);

            let message_id = id.to_string();
            match end {
                StreamEnd::Aborted => TurnOutcome::Aborted {
                    message_id: Some(message_id),
                },
                StreamEnd::Settled if failed => TurnOutcome::Failed { message_id },
                StreamEnd::Settled => TurnOutcome::Completed { message_id },
            }
        })
    }

    /// Stop the turn in flight. Returns `false` when there was none.
    pub fn stop(&self) -> bool {
        if self.status() == StreamStatus::Ready {
            return false;
        }
        self.abort.abort();
        true
    }

    /// Replace the conversation with the stored history of `session_id`.
    pub async fn load_session(&self, session_id: &str) -> Result<usize, ChatError> {
        self.with_state(|st, ev| {
            if st.status != StreamStatus::Ready {
                return Err(ChatError::Busy);
            }
            st.set_status(StreamStatus::Processing, ev);
            Ok(())
        })?;

        let history = self.transport.history(session_id).await;

        self.with_state(|st, ev| {
            st.set_status(StreamStatus::Ready, ev);
            let messages = history?;
            let count = messages.len();
            st.store.replace_all(messages);
            st.session_id = Some(session_id.to_string());
            ev.push(SessionEvent::HistoryReplaced {
                session_id: session_id.to_string(),
                count,
            });
            Ok(count)
        })
    }

    /// Start over with an empty, unnamed session.
    pub fn reset(&self) -> Result<(), ChatError> {
        self.with_state(|st, ev| {
            if st.status != StreamStatus::Ready {
                return Err(ChatError::Busy);
            }
            st.store.clear();
            st.session_id = None;
            ev.push(SessionEvent::Cleared);
            Ok(())
        })
    }
}
