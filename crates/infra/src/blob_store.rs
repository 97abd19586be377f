//! Blob storage boundary for author images.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob name: {0:?}")]
    InvalidKey(String),

    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replace every whitespace run in `original_name` with a single hyphen.
///
/// Only the final path component is kept so a name can never escape the
/// storage root.
pub fn sanitize_key(original_name: &str) -> Result<String, BlobError> {
    let file_name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let key = file_name.split_whitespace().collect::<Vec<_>>().join("-");
    if key.is_empty() || key == "." || key == ".." {
        return Err(BlobError::InvalidKey(original_name.to_string()));
    }
    Ok(key)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and return the public URL of the stored object.
    async fn store(&self, bytes: Vec<u8>, content_type: &str, original_name: &str) -> Result<String, BlobError>;

    /// Delete the object behind a URL returned by [`BlobStore::store`].
    /// Removing an object that is already gone succeeds.
    async fn remove(&self, url: &str) -> Result<(), BlobError>;
}

/// Filesystem-backed store; objects are served from `public_url`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), key)
    }

    fn key_for(&self, url: &str) -> Result<String, BlobError> {
        let key = url
            .strip_prefix(self.public_url.trim_end_matches('/'))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| BlobError::InvalidKey(url.to_string()))?;
        if sanitize_key(key)? != key {
            return Err(BlobError::InvalidKey(url.to_string()));
        }
        Ok(key.to_string())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn store(&self, bytes: Vec<u8>, content_type: &str, original_name: &str) -> Result<String, BlobError> {
        let key = sanitize_key(original_name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&key), bytes).await?;
        debug!(key = %key, "blob stored");
        Ok(self.url_for(&key))
    }

    #[instrument(skip(self), err)]
    async fn remove(&self, url: &str) -> Result<(), BlobError> {
        let key = self.key_for(url)?;
        match tokio::fs::remove_file(self.root.join(&key)).await {
            Ok(()) => {
                debug!(key = %key, "blob removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
