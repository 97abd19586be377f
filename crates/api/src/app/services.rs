use std::sync::Arc;

use thiserror::Error;

use authors_core::{Author, Operation};
use authors_events::{BusMessage, InMemoryEventBus};
use authors_infra::{
    author_store::{AuthorStore, InMemoryAuthorStore, StoreError},
    blob_store::{BlobStore, LocalBlobStore},
    config::ServiceConfig,
    idempotency::{InMemoryProcessedMessages, ProcessedMessages},
    posts::{transport_from_config, PostsGateway, TransportError},
    publisher::{AuthorChangePublisher, BusChangePublisher, PublishError},
    reconciler::CounterReconciler,
    workers::{ConsumerWorker, WorkerHandle},
};

#[cfg(feature = "redis")]
use authors_infra::{
    author_store::PostgresAuthorStore,
    config::PersistenceConfig,
    event_bus::{RedisStreamsError, RedisStreamsEventBus},
    idempotency::PostgresProcessedMessages,
};
#[cfg(feature = "redis")]
use sqlx::PgPool;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Bus(#[from] RedisStreamsError),
}

/// Outbound (author changes) and inbound (post changes) buses.
#[derive(Clone)]
pub enum BusBackend {
    InMemory {
        outbound: Arc<InMemoryEventBus<BusMessage>>,
        inbound: Arc<InMemoryEventBus<BusMessage>>,
    },
    #[cfg(feature = "redis")]
    Redis {
        outbound: Arc<RedisStreamsEventBus>,
        inbound: Arc<RedisStreamsEventBus>,
    },
}

/// Everything a request handler or the consumer needs, wired once per process.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn AuthorStore>,
    pub publisher: Arc<dyn AuthorChangePublisher>,
    pub gateway: PostsGateway,
    pub blobs: Arc<dyn BlobStore>,
    pub reconciler: Arc<CounterReconciler<Arc<dyn AuthorStore>>>,
    pub bus: BusBackend,
}

impl AppServices {
    pub async fn build(config: &ServiceConfig) -> Result<Self, ServicesError> {
        match &config.persistence {
            None => Self::in_memory(config).await,
            Some(persistence) => {
                #[cfg(feature = "redis")]
                {
                    Self::persistent(config, persistence).await
                }
                #[cfg(not(feature = "redis"))]
                {
                    let _ = persistence;
                    tracing::warn!(
                        "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
                    );
                    Self::in_memory(config).await
                }
            }
        }
    }

    async fn in_memory(config: &ServiceConfig) -> Result<Self, ServicesError> {
        let store: Arc<dyn AuthorStore> = Arc::new(InMemoryAuthorStore::new());
        let outbound: Arc<InMemoryEventBus<BusMessage>> =
            Arc::new(InMemoryEventBus::new().with_dedup_window(config.bus.dedup_window));
        let inbound: Arc<InMemoryEventBus<BusMessage>> =
            Arc::new(InMemoryEventBus::new().with_dedup_window(config.bus.dedup_window));
        let processed: Arc<dyn ProcessedMessages> = Arc::new(InMemoryProcessedMessages::new(config.idempotency_ttl));

        Ok(Self {
            publisher: Arc::new(BusChangePublisher::new(outbound.clone())),
            gateway: PostsGateway::new(transport_from_config(&config.posts_transport, config.posts_timeout).await?),
            blobs: Arc::new(LocalBlobStore::new(config.blobs.root.clone(), config.blobs.public_url.clone())),
            reconciler: Arc::new(CounterReconciler::new(store.clone()).with_idempotency(processed)),
            store,
            bus: BusBackend::InMemory { outbound, inbound },
        })
    }

    #[cfg(feature = "redis")]
    async fn persistent(config: &ServiceConfig, persistence: &PersistenceConfig) -> Result<Self, ServicesError> {
        let pool = PgPool::connect(&persistence.database_url).await?;

        let postgres_store = PostgresAuthorStore::new(pool.clone());
        postgres_store.ensure_schema().await?;
        let store: Arc<dyn AuthorStore> = Arc::new(postgres_store);
        let processed: Arc<dyn ProcessedMessages> =
            Arc::new(PostgresProcessedMessages::new(pool, config.idempotency_ttl));

        let outbound = Arc::new(
            RedisStreamsEventBus::new(&persistence.redis_url, &config.bus.authors_topic, &config.bus.consumer_group)?
                .with_dedup_window(config.bus.dedup_window),
        );
        let inbound = Arc::new(RedisStreamsEventBus::new(
            &persistence.redis_url,
            &config.bus.posts_queue,
            &config.bus.consumer_group,
        )?);
        inbound.ensure_consumer_group(&config.bus.consumer_group)?;

        Ok(Self {
            publisher: Arc::new(BusChangePublisher::new(outbound.clone())),
            gateway: PostsGateway::new(transport_from_config(&config.posts_transport, config.posts_timeout).await?),
            blobs: Arc::new(LocalBlobStore::new(config.blobs.root.clone(), config.blobs.public_url.clone())),
            reconciler: Arc::new(CounterReconciler::new(store.clone()).with_idempotency(processed)),
            store,
            bus: BusBackend::Redis { outbound, inbound },
        })
    }

    /// Start the background consumer that applies post changes to `total_posts`.
    pub fn spawn_consumer(&self, runtime: tokio::runtime::Handle) -> std::io::Result<WorkerHandle> {
        match &self.bus {
            BusBackend::InMemory { inbound, .. } => {
                ConsumerWorker::spawn_reconciler(inbound.clone(), self.reconciler.clone(), runtime)
            }
            #[cfg(feature = "redis")]
            BusBackend::Redis { inbound, .. } => {
                ConsumerWorker::spawn_reconciler(inbound.clone(), self.reconciler.clone(), runtime)
            }
        }
    }

    /// Announce an author change. Bus publishing is blocking IO, so it runs off
    /// the async workers.
    pub async fn publish(&self, authors: Vec<Author>, operation: Operation) -> Result<(), PublishError> {
        let publisher = self.publisher.clone();
        tokio::task::spawn_blocking(move || publisher.publish(&authors, operation))
            .await
            .map_err(|e| PublishError::Transport(format!("publish task failed: {e}")))?
    }
}
