//! In-memory event bus for tests/dev.

use std::collections::HashMap;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use crate::bus::{EventBus, Subscription};
use crate::message::BusMessage;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

/// Anything the in-memory bus can deduplicate.
pub trait Deduplicated {
    fn dedup_id(&self) -> Option<&str>;
}

impl Deduplicated for BusMessage {
    fn dedup_id(&self) -> Option<&str> {
        self.dedup_id()
    }
}

const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Fan-out to every live subscriber, in publish order
/// - A repeated dedup id is dropped while it is inside the dedup window;
///   older ids are pruned on publish
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    seen: Mutex<HashMap<String, Instant>>,
    dedup_window: Duration,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Accept `dedup_id` unless it was published inside the window.
    fn admit(&self, dedup_id: &str) -> Result<bool, InMemoryBusError> {
        let now = Instant::now();
        let mut seen = self.seen.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        seen.retain(|_, at| now.duration_since(*at) < self.dedup_window);

        if seen.contains_key(dedup_id) {
            return Ok(false);
        }
        seen.insert(dedup_id.to_string(), now);
        Ok(true)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Deduplicated + Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        if let Some(dedup) = message.dedup_id() {
            if !self.admit(dedup)? {
                tracing::debug!(dedup_id = dedup, "duplicate publish suppressed");
                return Ok(());
            }
        }

        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}
