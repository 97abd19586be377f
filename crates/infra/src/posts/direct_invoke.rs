//! Direct function invocation transport.
//!
//! Instead of going through a network gateway, the posts function is invoked
//! directly with a hand-built request shaped like the one a gateway would have
//! produced. The function answers with an HTTP-response-shaped object whose
//! `body` is itself a JSON string, so the response is decoded twice.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use authors_core::AuthorId;

use super::{join_author_ids, PostsEnvelope, PostsQueryTransport, TransportError};

const PAYLOAD_VERSION: &str = "2.0";
const ROUTE_KEY: &str = "GET /posts";
const RAW_PATH: &str = "/posts";

/// Gateway-style request handed to the posts function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticRequest {
    pub version: String,
    pub route_key: String,
    pub raw_path: String,
    pub raw_query_string: String,
    pub query_string_parameters: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub request_context: RequestContext,
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub http: HttpContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpContext {
    pub method: String,
    pub path: String,
    pub protocol: String,
}

impl SyntheticRequest {
    pub fn for_query(raw_query_string: &str) -> Self {
        Self {
            version: PAYLOAD_VERSION.to_string(),
            route_key: ROUTE_KEY.to_string(),
            raw_path: RAW_PATH.to_string(),
            raw_query_string: raw_query_string.to_string(),
            query_string_parameters: parse_query_string(raw_query_string),
            headers: BTreeMap::new(),
            request_context: RequestContext {
                http: HttpContext {
                    method: "GET".to_string(),
                    path: format!("{RAW_PATH}?{raw_query_string}"),
                    protocol: "HTTP/1.1".to_string(),
                },
            },
            is_base64_encoded: false,
        }
    }
}

/// Split on `&`, then on the first `=`. Values are kept verbatim.
pub fn parse_query_string(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Outer response produced by the posts function.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyntheticResponse {
    #[serde(default)]
    status_code: Option<u16>,
    body: Option<JsonValue>,
}

/// Decode a raw invocation result: bytes, then outer JSON, then the `body` string.
pub fn decode_response(payload: &[u8]) -> Result<PostsEnvelope, TransportError> {
    let text = std::str::from_utf8(payload).map_err(|e| TransportError::malformed("payload", e))?;
    let outer: SyntheticResponse =
        serde_json::from_str(text).map_err(|e| TransportError::malformed("payload", e))?;

    if let Some(status) = outer.status_code.filter(|s| *s >= 400) {
        return Err(TransportError::Status {
            status,
            body: outer.body.map(|b| b.to_string()).unwrap_or_default(),
        });
    }

    let inner = match outer.body.ok_or(TransportError::MissingField("body"))? {
        JsonValue::String(body) => {
            serde_json::from_str(&body).map_err(|e| TransportError::malformed("body", e))?
        }
        other => other,
    };

    PostsEnvelope::from_json(inner)
}

/// Synchronous request/response call to a named remote function.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Check the outcome of a request/response invocation and hand back its payload.
///
/// A non-2xx status is a transport failure; a function error (the function ran
/// and threw) is reported even though the status is 200.
pub fn invocation_result(
    function_name: &str,
    status: u16,
    function_error: Option<&str>,
    payload: &[u8],
) -> Result<Vec<u8>, TransportError> {
    if !(200..300).contains(&status) {
        return Err(TransportError::Status {
            status,
            body: String::from_utf8_lossy(payload).to_string(),
        });
    }
    if let Some(kind) = function_error {
        return Err(TransportError::Request(format!("{function_name} raised {kind}")));
    }
    Ok(payload.to_vec())
}

/// Cloud invoker: signed `Invoke` calls through the SDK client.
#[derive(Clone, Debug)]
pub struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
}

impl LambdaInvoker {
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }

    /// Region and credentials from the default provider chain.
    pub async fn from_env() -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_lambda::Client::new(&shared))
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| TransportError::Request(format!("invoking {function_name}: {}", DisplayErrorContext(&e))))?;

        let status = u16::try_from(output.status_code()).unwrap_or(0);
        let payload: &[u8] = output.payload().map(|blob| blob.as_ref()).unwrap_or_default();
        invocation_result(function_name, status, output.function_error(), payload)
    }
}

/// Unsigned invoker speaking the function runtime's invoke REST API:
/// `POST {endpoint}/2015-03-31/functions/{name}/invocations`.
///
/// Only local emulators accept unsigned calls; use [`LambdaInvoker`] against
/// the real runtime.
#[derive(Clone)]
pub struct HttpFunctionInvoker {
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpFunctionInvoker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("building invoke client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            timeout,
            client,
        })
    }

    fn invocation_url(&self, function_name: &str) -> String {
        format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.endpoint.trim_end_matches('/'),
            function_name
        )
    }

    fn classify(&self, function_name: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(format!("invoking {function_name}: {err}"))
        }
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionInvoker {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(self.invocation_url(function_name))
            .header("X-Amz-Invocation-Type", "RequestResponse")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.classify(function_name, e))?;

        let status = response.status();
        let function_error = response
            .headers()
            .get("X-Amz-Function-Error")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| self.classify(function_name, e))?;

        invocation_result(function_name, status.as_u16(), function_error.as_deref(), &body)
    }
}

pub struct DirectInvokeTransport<I> {
    invoker: I,
    function_name: String,
    timeout: Duration,
}

impl<I: FunctionInvoker> DirectInvokeTransport<I> {
    pub fn new(invoker: I, function_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            invoker,
            function_name: function_name.into(),
            timeout,
        }
    }

    /// Invoke with an already-built query string.
    pub async fn invoke_query(&self, raw_query_string: &str) -> Result<PostsEnvelope, TransportError> {
        let request = SyntheticRequest::for_query(raw_query_string);
        let payload = serde_json::to_vec(&request).map_err(|e| TransportError::malformed("request", e))?;

        let raw = tokio::time::timeout(self.timeout, self.invoker.invoke(&self.function_name, payload))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        decode_response(&raw)
    }
}

#[async_trait]
impl<I: FunctionInvoker> PostsQueryTransport for DirectInvokeTransport<I> {
    fn name(&self) -> &'static str {
        "direct-invoke"
    }

    #[instrument(skip(self, author_ids), fields(function = %self.function_name, authors = author_ids.len()), err)]
    async fn posts_by_authors(&self, author_ids: &[AuthorId]) -> Result<PostsEnvelope, TransportError> {
        self.invoke_query(&format!("authors={}", join_author_ids(author_ids))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::Path;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records the request and answers like the posts function would.
    #[derive(Default)]
    struct EchoInvoker {
        seen: Mutex<Vec<(String, SyntheticRequest)>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl FunctionInvoker for Arc<EchoInvoker> {
        async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let request: SyntheticRequest = serde_json::from_slice(&payload).unwrap();
            let authors = request.query_string_parameters.get("authors").cloned().unwrap_or_default();
            self.seen.lock().unwrap().push((function_name.to_string(), request));

            let posts: Vec<_> = authors
                .split(',')
                .map(|a| json!({ "_id": format!("p-{a}"), "title": "t", "author": a }))
                .collect();
            let body = json!({ "posts": posts }).to_string();
            Ok(json!({ "statusCode": 200, "body": body }).to_string().into_bytes())
        }
    }

    #[test]
    fn synthetic_request_carries_the_query_verbatim_and_parsed() {
        let request = SyntheticRequest::for_query("authors=a1,a2");

        assert_eq!(request.raw_query_string, "authors=a1,a2");
        assert_eq!(
            request.query_string_parameters,
            BTreeMap::from([("authors".to_string(), "a1,a2".to_string())])
        );
        assert_eq!(request.request_context.http.path, "/posts?authors=a1,a2");
        assert_eq!(request.request_context.http.method, "GET");
        assert!(request.headers.is_empty());

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["rawQueryString"], "authors=a1,a2");
        assert_eq!(wire["routeKey"], "GET /posts");
        assert_eq!(wire["isBase64Encoded"], false);
    }

    #[test]
    fn query_string_parsing_handles_bare_keys_and_repeats() {
        let parsed = parse_query_string("a=1&flag&&b=x=y");
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
        assert_eq!(parsed.get("b").map(String::as_str), Some("x=y"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn response_body_is_decoded_twice() {
        let raw = json!({
            "statusCode": 200,
            "body": json!({ "posts": [{ "_id": "p1", "title": "t", "author": "a1" }] }).to_string()
        })
        .to_string();

        let envelope = decode_response(raw.as_bytes()).unwrap();
        assert_eq!(envelope.posts.len(), 1);
        assert_eq!(envelope.posts[0].id.as_str(), "p1");
    }

    #[test]
    fn response_errors_are_distinguished() {
        assert!(matches!(
            decode_response(b"\xff\xfe"),
            Err(TransportError::MalformedJson { context: "payload", .. })
        ));
        assert!(matches!(
            decode_response(b"not json"),
            Err(TransportError::MalformedJson { context: "payload", .. })
        ));
        assert!(matches!(
            decode_response(br#"{"statusCode":200}"#),
            Err(TransportError::MissingField("body"))
        ));
        assert!(matches!(
            decode_response(br#"{"statusCode":200,"body":"{oops"}"#),
            Err(TransportError::MalformedJson { context: "body", .. })
        ));
        assert!(matches!(
            decode_response(br#"{"statusCode":200,"body":"{\"items\":[]}"}"#),
            Err(TransportError::MissingField("posts"))
        ));
        assert!(matches!(
            decode_response(br#"{"statusCode":500,"body":"boom"}"#),
            Err(TransportError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn transport_invokes_named_function_with_authors_query() {
        let invoker = Arc::new(EchoInvoker::default());
        let transport = DirectInvokeTransport::new(invoker.clone(), "posts-service", Duration::from_secs(1));

        let envelope = transport
            .posts_by_authors(&[AuthorId::from("a1"), AuthorId::from("a2")])
            .await
            .unwrap();
        assert_eq!(envelope.posts.len(), 2);

        let seen = invoker.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "posts-service");
        assert_eq!(seen[0].1.raw_query_string, "authors=a1,a2");
    }

    #[tokio::test]
    async fn slow_invocation_times_out() {
        let invoker = Arc::new(EchoInvoker {
            delay: Some(Duration::from_secs(5)),
            ..EchoInvoker::default()
        });
        let transport = DirectInvokeTransport::new(invoker, "posts-service", Duration::from_millis(50));

        let err = transport.posts_by_authors(&[AuthorId::from("a1")]).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn invocation_result_separates_status_and_function_errors() {
        assert_eq!(invocation_result("posts", 200, None, b"{}").unwrap(), b"{}".to_vec());
        assert!(matches!(
            invocation_result("posts", 403, None, b"missing signature"),
            Err(TransportError::Status { status: 403, ref body }) if body == "missing signature"
        ));
        assert!(matches!(
            invocation_result("posts", 200, Some("Unhandled"), b"{}"),
            Err(TransportError::Request(ref message)) if message.contains("Unhandled")
        ));
    }

    #[tokio::test]
    async fn http_invoker_reports_client_timeouts_as_timeouts() {
        let app = Router::new().route(
            "/2015-03-31/functions/:name/invocations",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::Json(json!({ "statusCode": 200, "body": "{}" }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let invoker = HttpFunctionInvoker::new(format!("http://{addr}"), Duration::from_millis(100)).unwrap();
        let err = invoker.invoke("posts-service", b"{}".to_vec()).await.unwrap_err();

        assert!(matches!(err, TransportError::Timeout(t) if t == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn http_invoker_posts_to_the_invocations_endpoint() {
        let app = Router::new().route(
            "/2015-03-31/functions/:name/invocations",
            post(|Path(name): Path<String>, payload: Bytes| async move {
                let request: SyntheticRequest = serde_json::from_slice(&payload).unwrap();
                let body = json!({
                    "posts": [{ "_id": format!("{name}-1"), "title": "t", "author": request.query_string_parameters["authors"] }]
                })
                .to_string();
                axum::Json(json!({ "statusCode": 200, "body": body }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let invoker = HttpFunctionInvoker::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let transport = DirectInvokeTransport::new(invoker, "posts-service", Duration::from_secs(2));

        let envelope = transport.posts_by_authors(&[AuthorId::from("a1")]).await.unwrap();
        assert_eq!(envelope.posts[0].id.as_str(), "posts-service-1");
        assert_eq!(envelope.posts[0].author, Some(AuthorId::from("a1")));
    }
}
