//! Counter reconciler: applies post-side changes to `Author.total_posts`.
//!
//! ```text
//! CREATE → +1    DELETE → -1    UPDATE → 0 (still a store round trip)
//! ```
//!
//! A post referencing an unknown author matches zero records. That is a benign
//! outcome (stale event, or an author outside this service's shard) and is not
//! retried. A store failure is returned to the caller; redelivery belongs to
//! the consumer worker and the bus.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use authors_core::{AuthorId, Operation, Post};
use authors_events::{BusMessage, DecodeError, InboundChange};

use crate::author_store::{AuthorStore, StoreError};
use crate::idempotency::ProcessedMessages;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("undecodable change notification: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a single delivery did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        author_id: AuthorId,
        delta: i64,
        total_posts: i64,
    },
    /// No author with this id exists here.
    UnknownAuthor { author_id: AuthorId },
    /// The post carries no author reference.
    Unattributed,
    /// This message was already applied.
    Duplicate,
}

pub struct CounterReconciler<S> {
    store: S,
    processed: Option<Arc<dyn ProcessedMessages>>,
}

impl<S> CounterReconciler<S>
where
    S: AuthorStore,
{
    pub fn new(store: S) -> Self {
        Self { store, processed: None }
    }

    /// Deduplicate bus deliveries through a claim-check store.
    pub fn with_idempotency(mut self, processed: Arc<dyn ProcessedMessages>) -> Self {
        self.processed = Some(processed);
        self
    }

    /// Apply the delta for one post change.
    ///
    /// This path performs no deduplication: calling it twice with a CREATE
    /// counts twice. Use [`Self::handle_message`] for bus deliveries.
    pub async fn handle(&self, operation: Operation, post: &Post) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(author_id) = post.author.clone() else {
            warn!(post_id = %post.id, %operation, "post change without author reference ignored");
            return Ok(ReconcileOutcome::Unattributed);
        };

        let delta = operation.delta();
        match self.store.increment_total_posts(&author_id, delta).await? {
            Some(total_posts) => {
                info!(
                    author_id = %author_id,
                    post_id = %post.id,
                    %operation,
                    delta,
                    total_posts,
                    "author post counter reconciled"
                );
                Ok(ReconcileOutcome::Applied {
                    author_id,
                    delta,
                    total_posts,
                })
            }
            None => {
                debug!(author_id = %author_id, post_id = %post.id, %operation, "post change for unknown author");
                Ok(ReconcileOutcome::UnknownAuthor { author_id })
            }
        }
    }

    /// Decode a bus delivery and apply it at most once per idempotency key.
    pub async fn handle_message(&self, message: &BusMessage) -> Result<ReconcileOutcome, ReconcileError> {
        let change = InboundChange::decode(message)?;

        let Some(processed) = &self.processed else {
            return self.handle(change.operation, &change.post).await;
        };

        if !processed.claim(&change.idempotency_key).await? {
            debug!(key = %change.idempotency_key, "duplicate post change delivery dropped");
            return Ok(ReconcileOutcome::Duplicate);
        }

        match self.handle(change.operation, &change.post).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(release_err) = processed.release(&change.idempotency_key).await {
                    warn!(key = %change.idempotency_key, error = %release_err, "failed to release claim");
                }
                Err(err)
            }
        }
    }
}
