use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AuthorId;
use crate::post::Post;

/// Author aggregate.
///
/// `total_posts` is a derived, eventually-consistent projection of how many
/// posts reference this author in the posts service. It starts at zero and only
/// changes through counter deltas applied by the reconciler.
///
/// `posts` is a transient, per-request view attached by enrichment. Stores
/// never persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub last_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Accepted on input, never written back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub total_posts: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<Vec<Post>>,
}

impl Author {
    /// Materialize a freshly created author.
    pub fn create(id: AuthorId, new: NewAuthor, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            last_name: new.last_name,
            image: new.image,
            email: new.email,
            password: new.password,
            total_posts: 0,
            created_at: now,
            updated_at: now,
            posts: None,
        }
    }

    /// Apply a partial update. The counter is not touched.
    pub fn apply_patch(&mut self, patch: AuthorPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(last_name) = patch.last_name {
            self.last_name = last_name;
        }
        if let Some(email) = patch.email {
            self.email = Some(email);
        }
        if let Some(image) = patch.image {
            self.image = Some(image);
        }
        self.updated_at = now;
    }

    /// Copy without the transient enrichment view.
    pub fn without_posts(mut self) -> Self {
        self.posts = None;
        self
    }
}

/// Input for creating an author.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewAuthor {
    pub name: String,
    pub last_name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl NewAuthor {
    pub fn new(name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name must not be empty"));
        }
        if self.last_name.trim().is_empty() {
            return Err(DomainError::validation("last_name must not be empty"));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

/// Partial update of an author's descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl AuthorPatch {
    pub fn validate(&self) -> DomainResult<()> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err(DomainError::validation("name must not be empty"));
        }
        if matches!(&self.last_name, Some(n) if n.trim().is_empty()) {
            return Err(DomainError::validation("last_name must not be empty"));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> DomainResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DomainError::validation("email is malformed")),
    }
}
