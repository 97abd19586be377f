use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AuthorId, PostId};

/// Post as published by the posts service.
///
/// Read-only here: this service never persists posts. It receives them inside
/// change notifications (to adjust counters) and inside query responses (to
/// enrich author listings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "_id", alias = "id")]
    pub id: PostId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub body: String,

    /// Owning author. Posts without an author match no one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl Post {
    /// Whether this post belongs to `author_id`.
    pub fn is_by(&self, author_id: &AuthorId) -> bool {
        self.author.as_ref() == Some(author_id)
    }
}
