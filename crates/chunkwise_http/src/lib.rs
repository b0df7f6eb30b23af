//! # Chunkwise HTTP
//!
//! `chunkwise_http` exposes a [`chunkwise_core::UploadCoordinator`] over HTTP:
//!
//! * `PUT /upload/:upload_id/chunk/:chunk_id` with an `X-Chunk-Hash` header and the raw chunk
//!   as the body
//! * `GET /health` for liveness
//! * `GET /ready` for readiness of every backend the coordinator depends on
//!
//! ## Example `main.rs`
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use chunkwise_core::memory::{MemoryChunkStore, MemoryNotifier, MemorySessionStore};
//! use chunkwise_core::UploadCoordinator;
//! use chunkwise_http::{Chunkwise, HttpConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = UploadCoordinator::new(
//!         Arc::new(MemoryChunkStore::default()),
//!         Arc::new(MemorySessionStore::default()),
//!         Arc::new(MemoryNotifier::default()),
//!     );
//!     let router = Chunkwise::new(coordinator, HttpConfig::default()).router()?;
//!
//!     axum::Server::bind(&"0.0.0.0:13030".parse()?)
//!         .serve(router.into_make_service())
//!         .await?;
//!     Ok(())
//! }
//! ```
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{self, MakeSpan, TraceLayer};
use tracing::Span;
use uuid::Uuid;

mod deadline;
mod errors;
pub use errors::{Error, ErrorCode, Result};
pub mod headers;
mod uploads;

use chunkwise_core::UploadCoordinator;

/// HTTP surface settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Time budget of a single request; when it runs out the request's backend calls are
    /// cancelled.
    pub request_timeout_secs: u64,
    pub max_chunk_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_chunk_bytes: 8 * 1024 * 1024,
            cors_origins: vec![String::from("http://localhost:3000")],
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone)]
struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn ready(State(chunkwise): State<Chunkwise>) -> Response {
    let readiness = chunkwise
        .coordinator
        .readiness(&CancellationToken::new())
        .await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}

/// Shared state of every route: the coordinator and the HTTP settings.
#[derive(Clone)]
pub struct Chunkwise {
    coordinator: UploadCoordinator,
    config: HttpConfig,
}

impl Chunkwise {
    pub fn new(coordinator: UploadCoordinator, config: HttpConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    fn cors(&self) -> Result<CorsLayer> {
        let origins = self
            .config
            .cors_origins
            .iter()
            .map(|o| HeaderValue::from_str(o))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::ORIGIN,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::AUTHORIZATION,
                headers::X_CHUNK_HASH.clone(),
            ])
            .allow_credentials(true))
    }

    /// Return an [`axum::Router`] serving the upload, health and readiness routes.
    pub fn router(&self) -> Result<axum::Router> {
        let app = Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .merge(uploads::router())
            .with_state(self.clone())
            .layer(DefaultBodyLimit::max(self.config.max_chunk_bytes))
            .layer(self.cors()?)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(RequestSpan)
                    .on_response(trace::DefaultOnResponse::new())
                    .on_request(trace::DefaultOnRequest::new()),
            )
            .layer(SetResponseHeaderLayer::if_not_present(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ));

        Ok(app)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use axum::body::Body;
    use chunkwise_core::memory::{MemoryChunkStore, MemoryError, MemoryNotifier, MemorySessionStore};
    use chunkwise_core::{ChunkDigest, RetryPolicy, RetryProfiles, UploadId, UploadStatus};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    struct Harness {
        router: Router,
        sessions: Arc<MemorySessionStore>,
        chunks: Arc<MemoryChunkStore>,
        notifier: Arc<MemoryNotifier>,
    }

    fn harness(config: HttpConfig) -> Harness {
        let retry = RetryProfiles {
            data: RetryPolicy::new(2, 1),
            probe: RetryPolicy::new(1, 1),
        };
        let chunks = Arc::new(MemoryChunkStore::new(retry));
        let sessions = Arc::new(MemorySessionStore::new(retry));
        let notifier = Arc::new(MemoryNotifier::new(retry));
        let coordinator =
            UploadCoordinator::new(chunks.clone(), sessions.clone(), notifier.clone());
        Harness {
            router: Chunkwise::new(coordinator, config).router().unwrap(),
            sessions,
            chunks,
            notifier,
        }
    }

    fn id(s: &str) -> UploadId {
        UploadId::try_from(s).unwrap()
    }

    fn put_chunk(upload_id: &str, chunk_id: &str, body: &'static [u8], hash: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::PUT)
            .uri(format!("/upload/{upload_id}/chunk/{chunk_id}"));
        if let Some(hash) = hash {
            builder = builder.header("x-chunk-hash", hash);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn hash(body: &[u8]) -> Option<String> {
        Some(ChunkDigest::from_bytes(body).to_string())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn error_code(body: &Value) -> &str {
        body["errors"][0]["code"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn upload_completes_session() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 3);

        for (chunk_id, body) in [("2", &b"ccc"[..]), ("0", &b"aaa"[..]), ("1", &b"bbb"[..])] {
            let (status, json) = send(&h.router, put_chunk("demo", chunk_id, body, hash(body))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["upload_id"], "demo");
            assert_eq!(json["chunk_id"], chunk_id);
            assert_eq!(json["chunk_key"], format!("uploads/demo/chunk_{chunk_id}"));
        }

        assert_eq!(h.notifier.delivered(), vec![id("demo")]);
        assert_eq!(
            h.sessions.snapshot(&id("demo")).unwrap().status,
            UploadStatus::Completed
        );
    }

    #[tokio::test]
    async fn missing_hash_is_bad_request() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);

        let (status, json) = send(&h.router, put_chunk("demo", "0", b"aaa", None)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&json), "INVALID_REQUEST");
        assert!(h.chunks.is_empty());
    }

    #[tokio::test]
    async fn hash_mismatch_is_integrity_error() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);

        let (status, json) = send(&h.router, put_chunk("demo", "0", b"aaa", hash(b"bbb"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&json), "INTEGRITY_ERROR");
        assert_eq!(h.chunks.write_attempts(), 0);
    }

    #[tokio::test]
    async fn unknown_session_is_forbidden() {
        let h = harness(HttpConfig::default());

        let (status, json) = send(&h.router, put_chunk("ghost", "0", b"aaa", hash(b"aaa"))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_code(&json), "SESSION_UNKNOWN");
        assert_eq!(h.chunks.write_attempts(), 0);
    }

    #[tokio::test]
    async fn out_of_range_chunk_is_bad_request() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);

        let (status, json) = send(&h.router, put_chunk("demo", "1", b"aaa", hash(b"aaa"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&json), "CHUNK_OUT_OF_RANGE");
    }

    #[tokio::test]
    async fn backend_failure_is_server_error() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);
        h.chunks
            .fail_next_write(MemoryError::Permanent(String::from("access denied")));

        let (status, json) = send(&h.router, put_chunk("demo", "0", b"aaa", hash(b"aaa"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_code(&json), "BACKEND_ERROR");
        assert!(!json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("access denied"));
    }

    #[tokio::test]
    async fn notification_failure_has_its_own_code() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);
        h.notifier
            .fail_next_send(MemoryError::Permanent(String::from("no such queue")));

        let (status, json) = send(&h.router, put_chunk("demo", "0", b"aaa", hash(b"aaa"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_code(&json), "NOTIFICATION_FAILED");
        assert_eq!(h.chunks.len(), 1);
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let h = harness(HttpConfig {
            max_chunk_bytes: 4,
            ..Default::default()
        });
        h.sessions.register_session(id("demo"), 1);

        let (status, json) = send(&h.router, put_chunk("demo", "0", b"too large", hash(b"too large"))).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(error_code(&json), "PAYLOAD_TOO_LARGE");
        assert!(h.chunks.is_empty());
    }

    #[tokio::test]
    async fn unreadable_hash_is_not_reported_missing() {
        let h = harness(HttpConfig::default());
        h.sessions.register_session(id("demo"), 1);
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/upload/demo/chunk/0")
            .header("x-chunk-hash", HeaderValue::from_bytes(b"\xffabc").unwrap())
            .body(Body::from(&b"aaa"[..]))
            .unwrap();

        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&json), "INVALID_REQUEST");
        assert_eq!(
            json["errors"][0]["message"],
            "malformed X-Chunk-Hash header"
        );
        assert_eq!(h.chunks.write_attempts(), 0);
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let h = harness(HttpConfig::default());
        h.chunks.set_ready(false);

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let (status, json) = send(
            &h.router,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn readiness_reflects_components() {
        let h = harness(HttpConfig::default());
        let ready = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let (status, json) = send(&h.router, ready()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ready"], true);
        assert_eq!(json["components"].as_array().unwrap().len(), 3);

        h.sessions.set_ready(false);
        let (status, json) = send(&h.router, ready()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["ready"], false);
        let sessions = json["components"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "memory[sessions]")
            .unwrap();
        assert_ne!(sessions["status"], "ok");
    }

    #[rstest::rstest]
    #[case::allowed("http://localhost:3000", true)]
    #[case::other("http://evil.example", false)]
    #[tokio::test]
    async fn cors_preflight(#[case] origin: &str, #[case] allowed: bool) {
        let h = harness(HttpConfig::default());
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/upload/demo/chunk/0")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-chunk-hash")
            .body(Body::empty())
            .unwrap();

        let response = h.router.clone().oneshot(request).await.unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_some(),
            allowed
        );
    }
}
