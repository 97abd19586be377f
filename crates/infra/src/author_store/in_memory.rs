use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use authors_core::{Author, AuthorFilter, AuthorId, AuthorPatch, NewAuthor};

use super::{AuthorStore, StoreError};

/// In-memory author store for tests/dev.
///
/// Records are kept in creation order. Counter increments happen under the
/// write lock, which makes them atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryAuthorStore {
    inner: RwLock<Vec<Author>>,
}

impl InMemoryAuthorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully-formed record (tests, fixtures). Enrichment data is dropped.
    pub fn seed(&self, author: Author) -> Result<(), StoreError> {
        let mut authors = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        authors.retain(|a| a.id != author.id);
        authors.push(author.without_posts());
        Ok(())
    }
}

#[async_trait]
impl AuthorStore for InMemoryAuthorStore {
    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError> {
        let author = Author::create(AuthorId::new(), new, Utc::now());
        let mut authors = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        authors.push(author.clone());
        Ok(author)
    }

    async fn get(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        let authors = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(authors.iter().find(|a| &a.id == id).cloned())
    }

    async fn list(&self, filter: &AuthorFilter) -> Result<Vec<Author>, StoreError> {
        let authors = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(authors.iter().filter(|a| filter.matches(&a.id)).cloned().collect())
    }

    async fn update(&self, id: &AuthorId, patch: AuthorPatch) -> Result<Option<Author>, StoreError> {
        let mut authors = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(authors.iter_mut().find(|a| &a.id == id).map(|author| {
            author.apply_patch(patch, Utc::now());
            author.clone()
        }))
    }

    async fn delete(&self, id: &AuthorId) -> Result<Option<Author>, StoreError> {
        let mut authors = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(authors
            .iter()
            .position(|a| &a.id == id)
            .map(|idx| authors.remove(idx)))
    }

    async fn increment_total_posts(&self, id: &AuthorId, delta: i64) -> Result<Option<i64>, StoreError> {
        let mut authors = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(authors.iter_mut().find(|a| &a.id == id).map(|author| {
            author.total_posts += delta;
            author.total_posts
        }))
    }
}
