//! Transcript subscribers.
//!
//! Each registered handler sits behind a reentrant live-gate. Delivery holds
//! the gate for the duration of the call and `unsubscribe` takes it before
//! flipping the flag, so once `unsubscribe` returns the handler is never
//! entered again. Reentrancy lets a handler unsubscribe itself.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::broadcast;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// A transcript fragment or final transcript delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    pub text: String,
    /// `true` for incremental updates, `false` for the final transcript.
    pub partial: bool,
}

impl TranscriptEvent {
    pub fn new(speaker: Speaker, text: impl Into<String>, partial: bool) -> Self {
        Self {
            speaker,
            text: text.into(),
            partial,
        }
    }
}

type Handler = Box<dyn Fn(&TranscriptEvent) + Send + Sync>;

struct Entry {
    id: u64,
    speaker: Speaker,
    live: ReentrantMutex<Cell<bool>>,
    handler: Handler,
}

pub(crate) struct Subscribers {
    entries: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<TranscriptEvent>,
}

impl Subscribers {
    pub(crate) fn new(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    pub(crate) fn subscribe<F>(self: &Arc<Self>, speaker: Speaker, handler: F) -> Subscription
    where
        F: Fn(&TranscriptEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Arc::new(Entry {
            id,
            speaker,
            live: ReentrantMutex::new(Cell::new(true)),
            handler: Box::new(handler),
        }));
        tracing::debug!(id, ?speaker, "transcript subscriber registered");
        Subscription {
            id,
            subscribers: Arc::downgrade(self),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn stream(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.stream.subscribe()
    }

    /// Deliver to every live subscriber of the event's speaker, then to the
    /// broadcast stream. Returns the number of handlers called.
    pub(crate) fn deliver(&self, event: &TranscriptEvent) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let targets: Vec<Arc<Entry>> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.speaker == event.speaker)
            .cloned()
            .collect();

        let mut called = 0;
        for entry in targets {
            let live = entry.live.lock();
            if live.get() {
                (entry.handler)(event);
                called += 1;
            }
        }

        // No receivers is fine.
        let _ = self.stream.send(event.clone());
        called
    }

    fn remove(&self, id: u64) {
        let entry = {
            let mut entries = self.entries.lock();
            let index = entries.iter().position(|entry| entry.id == id);
            index.map(|index| entries.remove(index))
        };
        if let Some(entry) = entry {
            // Waits out an in-flight delivery on another thread.
            entry.live.lock().set(false);
            tracing::debug!(id, "transcript subscriber removed");
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Handle returned by `on_user_message` / `on_assistant_message`.
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
    active: AtomicBool,
}

impl Subscription {
    /// Stop delivery to this handler. Idempotent; safe to call from inside
    /// the handler itself.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(subscribers) = self.subscribers.upgrade() {
                subscribers.remove(self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.subscribers.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
