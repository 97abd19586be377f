//! Cross-service posts query gateway.
//!
//! Reads may ask for `relations=posts`; the gateway then fetches the posts of
//! every listed author from the posts service in a single round trip and
//! attaches them to the matching authors. Enrichment is best effort: any
//! transport failure or malformed response is logged and the authors are
//! returned exactly as they came in.
//!
//! The transport is chosen once, at startup, from configuration:
//!
//! ```text
//! production  → DirectInvokeTransport (synthetic gateway request, direct function call;
//!                                      SDK client, or an emulator when FUNCTION_INVOKE_URL is set)
//! otherwise   → HttpTransport         (GET <base_url>?authors=a1,a2)
//! ```

pub mod direct_invoke;
pub mod http;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use authors_core::{Author, AuthorId, Post, Relations};

use crate::config::PostsTransportConfig;

pub use direct_invoke::{DirectInvokeTransport, FunctionInvoker, HttpFunctionInvoker, LambdaInvoker, SyntheticRequest};
pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("posts query timed out after {0:?}")]
    Timeout(Duration),

    #[error("posts query failed: {0}")]
    Request(String),

    #[error("posts service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed json in {context}: {message}")]
    MalformedJson { context: &'static str, message: String },

    #[error("posts response is missing `{0}`")]
    MissingField(&'static str),
}

impl TransportError {
    pub(crate) fn malformed(context: &'static str, err: impl ToString) -> Self {
        Self::MalformedJson {
            context,
            message: err.to_string(),
        }
    }
}

/// `{ "posts": [...] }` as returned by the posts service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostsEnvelope {
    pub posts: Vec<Post>,
}

impl PostsEnvelope {
    /// Validate a decoded JSON document: `posts` must be present and well-formed.
    pub fn from_json(value: JsonValue) -> Result<Self, TransportError> {
        let posts = value
            .get("posts")
            .cloned()
            .ok_or(TransportError::MissingField("posts"))?;
        let posts: Vec<Post> =
            serde_json::from_value(posts).map_err(|e| TransportError::malformed("posts", e))?;
        Ok(Self { posts })
    }
}

/// Capability: fetch the posts of a set of authors from the posts service.
#[async_trait]
pub trait PostsQueryTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn posts_by_authors(&self, author_ids: &[AuthorId]) -> Result<PostsEnvelope, TransportError>;
}

/// Comma-joined id list as sent to the posts service.
pub fn join_author_ids(author_ids: &[AuthorId]) -> String {
    author_ids.iter().map(AuthorId::as_str).collect::<Vec<_>>().join(",")
}

/// Build the transport described by configuration.
pub async fn transport_from_config(
    config: &PostsTransportConfig,
    timeout: Duration,
) -> Result<Arc<dyn PostsQueryTransport>, TransportError> {
    Ok(match config {
        PostsTransportConfig::Http { base_url } => Arc::new(HttpTransport::new(base_url.clone(), timeout)?),
        PostsTransportConfig::DirectInvoke {
            invoke_url: Some(invoke_url),
            function_name,
        } => Arc::new(DirectInvokeTransport::new(
            HttpFunctionInvoker::new(invoke_url.clone(), timeout)?,
            function_name.clone(),
            timeout,
        )),
        PostsTransportConfig::DirectInvoke {
            invoke_url: None,
            function_name,
        } => Arc::new(DirectInvokeTransport::new(
            LambdaInvoker::from_env().await,
            function_name.clone(),
            timeout,
        )),
    })
}

#[derive(Clone)]
pub struct PostsGateway {
    transport: Arc<dyn PostsQueryTransport>,
}

impl PostsGateway {
    pub fn new(transport: Arc<dyn PostsQueryTransport>) -> Self {
        Self { transport }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Attach posts to `authors` when `relations` asks for them.
    ///
    /// Never fails: on any transport error the input is returned unchanged.
    pub async fn enrich(&self, authors: Vec<Author>, relations: &Relations) -> Vec<Author> {
        if !relations.includes_posts() || authors.is_empty() {
            return authors;
        }

        let mut seen = HashSet::new();
        let ids: Vec<AuthorId> = authors
            .iter()
            .filter(|a| seen.insert(a.id.clone()))
            .map(|a| a.id.clone())
            .collect();

        match self.transport.posts_by_authors(&ids).await {
            Ok(envelope) => {
                debug!(
                    transport = self.transport.name(),
                    authors = ids.len(),
                    posts = envelope.posts.len(),
                    "posts enrichment fetched"
                );
                attach_posts(authors, envelope.posts)
            }
            Err(err) => {
                warn!(
                    transport = self.transport.name(),
                    authors = ids.len(),
                    error = %err,
                    "posts enrichment failed; serving authors without posts"
                );
                authors
            }
        }
    }
}

/// Attach to every author the posts whose `author` equals its id.
///
/// Author order is preserved, each author appears once, and posts keep the
/// order in which the posts service returned them. Authors without matches
/// get an empty list.
pub fn attach_posts(authors: Vec<Author>, posts: Vec<Post>) -> Vec<Author> {
    let mut by_author: HashMap<AuthorId, Vec<Post>> = HashMap::new();
    for post in posts {
        if let Some(author_id) = post.author.clone() {
            by_author.entry(author_id).or_default().push(post);
        }
    }

    authors
        .into_iter()
        .map(|mut author| {
            author.posts = Some(by_author.get(&author.id).cloned().unwrap_or_default());
            author
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use authors_core::{NewAuthor, PostId};
    use chrono::Utc;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn author(id: &str) -> Author {
        Author::create(AuthorId::from(id), NewAuthor::new("N", "L"), Utc::now())
    }

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: PostId::from(id),
            title: format!("title {id}"),
            body: String::new(),
            author: Some(AuthorId::from(author)),
            created_at: None,
            last_update: None,
        }
    }

    struct FixedTransport {
        response: Result<Vec<Post>, ()>,
        calls: Mutex<Vec<Vec<AuthorId>>>,
    }

    impl FixedTransport {
        fn ok(posts: Vec<Post>) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(posts),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PostsQueryTransport for FixedTransport {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn posts_by_authors(&self, author_ids: &[AuthorId]) -> Result<PostsEnvelope, TransportError> {
            self.calls.lock().unwrap().push(author_ids.to_vec());
            match &self.response {
                Ok(posts) => Ok(PostsEnvelope { posts: posts.clone() }),
                Err(()) => Err(TransportError::Request("connection refused".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn without_posts_relation_input_is_returned_untouched() {
        let transport = FixedTransport::ok(vec![post("p1", "1")]);
        let gateway = PostsGateway::new(transport.clone());
        let authors = vec![author("1"), author("2")];

        let out = gateway.enrich(authors.clone(), &Relations::none()).await;
        assert_eq!(out, authors);
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_transport_degrades_to_plain_authors() {
        let gateway = PostsGateway::new(FixedTransport::failing());
        let authors = vec![author("1"), author("2")];

        let out = gateway.enrich(authors.clone(), &Relations::parse(Some("posts"))).await;
        assert_eq!(out, authors);
        assert!(out.iter().all(|a| a.posts.is_none()));
    }

    #[tokio::test]
    async fn distinct_ids_are_queried_once() {
        let transport = FixedTransport::ok(vec![]);
        let gateway = PostsGateway::new(transport.clone());

        gateway
            .enrich(vec![author("1"), author("2"), author("1")], &Relations::parse(Some("posts")))
            .await;

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![AuthorId::from("1"), AuthorId::from("2")]);
    }

    #[tokio::test]
    async fn posts_are_grouped_onto_their_authors() {
        let gateway = PostsGateway::new(FixedTransport::ok(vec![
            post("p1", "2"),
            post("p2", "1"),
            post("p3", "2"),
            post("p4", "stranger"),
        ]));

        let out = gateway
            .enrich(vec![author("1"), author("2"), author("3")], &Relations::parse(Some("posts")))
            .await;

        let ids = |a: &Author| {
            a.posts
                .as_ref()
                .unwrap()
                .iter()
                .map(|p| p.id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&out[0]), vec!["p2"]);
        assert_eq!(ids(&out[1]), vec!["p1", "p3"]);
        assert!(ids(&out[2]).is_empty());
    }

    #[test]
    fn envelope_requires_posts_field() {
        assert!(matches!(
            PostsEnvelope::from_json(serde_json::json!({ "items": [] })),
            Err(TransportError::MissingField("posts"))
        ));
        assert!(matches!(
            PostsEnvelope::from_json(serde_json::json!({ "posts": "nope" })),
            Err(TransportError::MalformedJson { context: "posts", .. })
        ));
        assert_eq!(
            PostsEnvelope::from_json(serde_json::json!({ "posts": [] })).unwrap().posts,
            Vec::<Post>::new()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: each input author appears once, in order, with exactly the
        /// returned posts that reference it.
        #[test]
        fn attach_is_an_order_preserving_partition(
            author_ids in prop::collection::vec(0u8..6, 0..8),
            post_authors in prop::collection::vec(0u8..8, 0..20),
        ) {
            let authors: Vec<Author> = author_ids.iter().map(|i| author(&i.to_string())).collect();
            let posts: Vec<Post> = post_authors
                .iter()
                .enumerate()
                .map(|(n, a)| post(&format!("p{n}"), &a.to_string()))
                .collect();

            let out = attach_posts(authors.clone(), posts.clone());

            prop_assert_eq!(out.len(), authors.len());
            for (before, after) in authors.iter().zip(out.iter()) {
                prop_assert_eq!(&before.id, &after.id);
                let expected: Vec<Post> = posts.iter().filter(|p| p.is_by(&before.id)).cloned().collect();
                prop_assert_eq!(after.posts.as_ref().unwrap(), &expected);
            }
        }
    }
}
