// src/chat/abort.rs - Generation-counted cancellation for in-flight turns
//
// Every send takes a token stamped with the current generation. Issuing a
// new token or calling `abort` bumps the generation, so older tokens stop
// being current. The read loop checks its own token, never a shared
// "current request" slot.

use tokio::sync::watch;

#[derive(Debug)]
pub struct AbortController {
    generation: watch::Sender<u64>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Hand out a token for a new request, invalidating any previous one.
    pub fn issue(&self) -> AbortToken {
        self.generation.send_modify(|g| *g += 1);
        let receiver = self.generation.subscribe();
        let generation = *receiver.borrow();
        AbortToken {
            generation,
            receiver,
        }
    }

    /// Invalidate the outstanding token, if any.
    pub fn abort(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

#[derive(Debug, Clone)]
pub struct AbortToken {
    generation: u64,
    receiver: watch::Receiver<u64>,
}

impl AbortToken {
    pub fn is_current(&self) -> bool {
        *self.receiver.borrow() == self.generation
    }

    /// Resolves once this token is no longer current.
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        let generation = self.generation;
        // A dropped controller also ends the wait.
        let _ = receiver.wait_for(|g| *g != generation).await;
    }
}
