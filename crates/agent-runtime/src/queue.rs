use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::content::Content;
use crate::error::RuntimeError;

type Slot = Option<mpsc::UnboundedSender<Content>>;

/// Sending half of a live session. Clones share the same channel, so closing
/// any clone closes the queue for all of them.
#[derive(Debug, Clone)]
pub struct LiveRequestQueue {
    sender: Arc<Mutex<Slot>>,
}

/// Receiving half, owned by the runtime.
#[derive(Debug)]
pub struct LiveRequestReceiver {
    inner: mpsc::UnboundedReceiver<Content>,
}

impl LiveRequestQueue {
    pub fn new() -> (Self, LiveRequestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            LiveRequestReceiver { inner: rx },
        )
    }

    pub fn send_content(&self, content: Content) -> Result<(), RuntimeError> {
        match self.slot().as_ref() {
            Some(tx) => tx.send(content).map_err(|_| RuntimeError::QueueClosed),
            None => Err(RuntimeError::QueueClosed),
        }
    }

    /// Closes the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.slot().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        match self.slot().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // Nothing panics while holding the lock, but never propagate poison.
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LiveRequestReceiver {
    /// Next queued content, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<Content> {
        self.inner.recv().await
    }

    /// Queued content if any is ready right now.
    pub fn try_recv(&mut self) -> Option<Content> {
        self.inner.try_recv().ok()
    }
}
