//! Infrastructure layer: stores, bus adapters, config, sibling-service clients.

pub mod author_store;
pub mod blob_store;
pub mod config;
pub mod event_bus;
pub mod idempotency;
pub mod posts;
pub mod publisher;
pub mod reconciler;
pub mod workers;

mod integration_tests;
