//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is a pub/sub mechanism for distributing change notifications:
//! outbound author changes to the posts service, inbound post changes to the
//! counter reconciler.
//!
//! ## Delivery
//!
//! - **At-least-once**: a message may be delivered more than once; consumers
//!   decide whether to deduplicate.
//! - **Settlement**: a bus that tracks acknowledgements waits for the consumer to
//!   [`Subscription::settle`] each message before acknowledging it upstream; a
//!   message settled as [`Settlement::Failed`] is redelivered later.
//! - **Ordering**: only guaranteed among messages sharing a group id, and only
//!   when the implementation preserves publish order.
//! - **No persistence assumptions**: durability is the implementation's business.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

/// How the consumer finished with the most recently received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Applied (or deliberately dropped); safe to acknowledge.
    Done,
    /// Not applied; leave it for redelivery.
    Failed,
}

/// A subscription to a message stream.
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(message) => process(message)?,
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Bus closed
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    settlements: Option<Sender<Settlement>>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            settlements: None,
        }
    }

    /// A subscription whose bus expects one settlement per received message.
    pub fn with_settlements(receiver: Receiver<M>, settlements: Sender<Settlement>) -> Self {
        Self {
            receiver,
            settlements: Some(settlements),
        }
    }

    /// Whether the bus redelivers messages settled as failed.
    pub fn redelivers(&self) -> bool {
        self.settlements.is_some()
    }

    /// Report the outcome of the last received message. No-op for buses that
    /// do not track acknowledgements.
    pub fn settle(&self, settlement: Settlement) {
        if let Some(tx) = &self.settlements {
            let _ = tx.send(settlement);
        }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic pub/sub bus.
///
/// `publish()` failures are surfaced to the caller: a notification that never
/// left the process means the receiving side silently misses a consistency
/// signal, so callers must not swallow them.
///
/// Implementations must be safe to share across threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
