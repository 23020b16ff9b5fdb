// src/chat/mod.rs - Chat core: messages, decoding, cancellation, sessions

pub mod abort;
pub mod attachments;
pub mod decoder;
pub mod message;
pub mod session;
pub mod store;

pub use message::{AttachmentRef, Message, MessageId, Role, Source};
pub use session::{SessionCoordinator, SessionEvent, StreamStatus, TurnOutcome};
