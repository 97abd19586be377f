//! Plain HTTP transport: `GET <base_url>?authors=a1,a2`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use authors_core::AuthorId;

use super::{join_author_ids, PostsEnvelope, PostsQueryTransport, TransportError};

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("building http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            timeout,
            client,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl PostsQueryTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, author_ids), fields(base_url = %self.base_url, authors = author_ids.len()), err)]
    async fn posts_by_authors(&self, author_ids: &[AuthorId]) -> Result<PostsEnvelope, TransportError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("authors", join_author_ids(author_ids))])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).to_string(),
            });
        }

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| TransportError::malformed("response", e))?;
        PostsEnvelope::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/posts")
    }

    fn ids(raw: &[&str]) -> Vec<AuthorId> {
        raw.iter().map(|s| AuthorId::from(*s)).collect()
    }

    #[tokio::test]
    async fn sends_comma_joined_authors_and_decodes_posts() {
        let app = Router::new().route(
            "/posts",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let authors = q.get("authors").cloned().unwrap_or_default();
                let posts: Vec<_> = authors
                    .split(',')
                    .map(|a| json!({ "_id": format!("p-{a}"), "title": "t", "author": a }))
                    .collect();
                axum::Json(json!({ "posts": posts }))
            }),
        );
        let transport = HttpTransport::new(spawn(app).await, Duration::from_secs(2)).unwrap();

        let envelope = transport.posts_by_authors(&ids(&["a1", "a2"])).await.unwrap();
        let got: Vec<_> = envelope.posts.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(got, vec!["p-a1", "p-a2"]);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let app = Router::new().route(
            "/posts",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down").into_response() }),
        );
        let transport = HttpTransport::new(spawn(app).await, Duration::from_secs(2)).unwrap();

        let err = transport.posts_by_authors(&ids(&["a1"])).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn missing_posts_field_is_an_error() {
        let app = Router::new().route("/posts", get(|| async { axum::Json(json!({ "items": [] })) }));
        let transport = HttpTransport::new(spawn(app).await, Duration::from_secs(2)).unwrap();

        let err = transport.posts_by_authors(&ids(&["a1"])).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingField("posts")));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let app = Router::new().route(
            "/posts",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::Json(json!({ "posts": [] }))
            }),
        );
        let transport = HttpTransport::new(spawn(app).await, Duration::from_millis(100)).unwrap();

        let err = transport.posts_by_authors(&ids(&["a1"])).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_request_error() {
        let transport = HttpTransport::new("http://127.0.0.1:1/posts", Duration::from_secs(1)).unwrap();
        let err = transport.posts_by_authors(&ids(&["a1"])).await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }
}
