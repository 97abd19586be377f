//! Author aggregate storage.
//!
//! The store owns the persisted author record, including `total_posts`. The
//! counter is only ever changed through [`AuthorStore::increment_total_posts`],
//! which every implementation executes as one atomic operation (never
//! read-modify-write), so concurrent deltas for the same author are not lost.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use authors_core::{Author, AuthorFilter, AuthorId, AuthorPatch, NewAuthor};

pub use in_memory::InMemoryAuthorStore;
pub use postgres::PostgresAuthorStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt author row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Database(value.to_string())
    }
}

#[async_trait]
pub trait AuthorStore: Send + Sync {
    /// Persist a new author. The returned record carries `total_posts = 0`.
    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError>;

    async fn get(&self, id: &AuthorId) -> Result<Option<Author>, StoreError>;

    /// List authors in creation order, restricted by `filter`.
    async fn list(&self, filter: &AuthorFilter) -> Result<Vec<Author>, StoreError>;

    /// Update descriptive fields. `None` when no record matched.
    async fn update(&self, id: &AuthorId, patch: AuthorPatch) -> Result<Option<Author>, StoreError>;

    /// Remove a record, returning it. `None` when no record matched.
    async fn delete(&self, id: &AuthorId) -> Result<Option<Author>, StoreError>;

    /// Atomically add `delta` to the author's counter.
    ///
    /// Returns the post-update value, or `None` when no record matched.
    async fn increment_total_posts(&self, id: &AuthorId, delta: i64) -> Result<Option<i64>, StoreError>;
}

#[async_trait]
impl<S> AuthorStore for Arc<S>
where
    S: AuthorStore + ?Sized,
{
    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError> {
        (**self).insert(new).await
    }

    async fn get(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        (**self).get(id).await
    }

    async fn list(&self, filter: &AuthorFilter) -> Result<Vec<Author>, StoreError> {
        (**self).list(filter).await
    }

    async fn update(&self, id: &AuthorId, patch: AuthorPatch) -> Result<Option<Author>, StoreError> {
        (**self).update(id, patch).await
    }

    async fn delete(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        (**self).delete(id).await
    }

    async fn increment_total_posts(&self, id: &AuthorId, delta: i64) -> Result<Option<i64>, StoreError> {
        (**self).increment_total_posts(id, delta).await
    }
}
