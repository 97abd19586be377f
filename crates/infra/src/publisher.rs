//! Outbound author change notifications.
//!
//! One publish call produces exactly one bus message:
//!
//! ```text
//! body        = JSON array of the authors in the batch
//! attributes  = { operation: String("CREATE" | "UPDATE" | "DELETE") }
//! group_id    = dedup_id = one fresh correlation id per call
//! ```
//!
//! Sharing one correlation id across the batch makes the batch a single
//! ordered, deduplicated notification.

use uuid::Uuid;

use authors_core::{Author, Operation};
use authors_events::{BusMessage, EventBus, MessageAttribute, OPERATION_ATTRIBUTE};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize author batch: {0}")]
    Serialize(String),

    #[error("bus rejected change notification: {0}")]
    Transport(String),
}

/// Announces author changes to sibling services.
///
/// Failures must reach the caller of the create/update/delete flow: a lost
/// notification leaves the other side permanently out of sync.
pub trait AuthorChangePublisher: Send + Sync {
    fn publish(&self, authors: &[Author], operation: Operation) -> Result<(), PublishError>;
}

/// Publisher backed by any [`EventBus`] carrying [`BusMessage`]s.
#[derive(Debug)]
pub struct BusChangePublisher<B> {
    bus: B,
}

impl<B> BusChangePublisher<B>
where
    B: EventBus<BusMessage>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Build the message for one publish call without sending it.
    pub fn build_message(authors: &[Author], operation: Operation) -> Result<BusMessage, PublishError> {
        // Enrichment views are request-local; never ship them.
        let batch: Vec<Author> = authors.iter().cloned().map(Author::without_posts).collect();
        let body = serde_json::to_string(&batch).map_err(|e| PublishError::Serialize(e.to_string()))?;

        let correlation_id = Uuid::now_v7().to_string();
        Ok(BusMessage::new(body)
            .with_ordering(correlation_id.clone(), correlation_id)
            .with_attribute(OPERATION_ATTRIBUTE, MessageAttribute::string(operation.as_str())))
    }
}

impl<B> AuthorChangePublisher for BusChangePublisher<B>
where
    B: EventBus<BusMessage>,
{
    #[tracing::instrument(skip(self, authors), fields(batch = authors.len(), operation = %operation), err)]
    fn publish(&self, authors: &[Author], operation: Operation) -> Result<(), PublishError> {
        let message = Self::build_message(authors, operation)?;
        let correlation_id = message.group_id().unwrap_or_default().to_string();

        self.bus
            .publish(message)
            .map_err(|e| PublishError::Transport(format!("{e:?}")))?;

        tracing::info!(correlation_id = %correlation_id, "author change published");
        Ok(())
    }
}
