//! HTTP listener

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use resident_config::ListenerConfig;
use resident_ipc::RequestFrame;
use resident_resilience::{ShutdownCoordinator, ShutdownSignal};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::{bind, error_frame, Listener};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::request;

/// Headers that describe the worker connection rather than the payload
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

#[derive(Clone)]
struct HttpState {
    dispatcher: Dispatcher,
    max_body_bytes: usize,
    read_timeout: Duration,
    request_timeout: Duration,
}

/// Any method and path is forwarded to a worker, except the health path
pub fn router(config: &ListenerConfig, dispatcher: Dispatcher, request_timeout: Duration) -> Router {
    let state = HttpState {
        dispatcher,
        max_body_bytes: config.max_body_bytes,
        read_timeout: config.read_timeout,
        request_timeout,
    };

    let mut app = Router::new();
    if let Some(path) = &config.health_path {
        app = app.route(path, get(health));
    }

    app.fallback(forward).with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            // Shared by every route, unlike a per-route limit
            .layer(GlobalConcurrencyLimitLayer::new(config.max_connections))
            // Bounds the whole exchange: reading the body, then the dispatch deadline
            .layer(TimeoutLayer::new(config.read_timeout + request_timeout)),
    )
}

async fn forward(State(state): State<HttpState>, request: Request) -> Response {
    let received_at = Instant::now();
    let (parts, body) = request.into_parts();

    let body = match tokio::time::timeout(
        state.read_timeout,
        axum::body::to_bytes(body, state.max_body_bytes),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!("Rejecting request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "payload too large").into_response();
        }
        Err(_) => return (StatusCode::REQUEST_TIMEOUT, "request body timed out").into_response(),
    };

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut frame = RequestFrame::new(parts.method.as_str(), target).with_body(body.to_vec());
    for (name, value) in parts.headers.iter() {
        match value.to_str() {
            Ok(value) => frame = frame.with_header(name.as_str(), value),
            Err(_) => debug!(header = %name, "Dropping non-text header"),
        }
    }

    let request = request::Request::with_deadline(frame, received_at, received_at + state.request_timeout);
    let request_id = request.id;

    match state.dispatcher.handle(request).await {
        Ok(response) => render(response),
        Err(e) => {
            debug!(%request_id, "Dispatch failed: {}", e);
            let mut response = render_frame(error_frame(&e));
            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert("x-request-id", value);
            }
            response
        }
    }
}

fn render(response: request::Response) -> Response {
    let mut rendered = render_frame(response.frame);
    if let Ok(value) = HeaderValue::from_str(&response.request_id.to_string()) {
        rendered.headers_mut().insert("x-request-id", value);
    }
    rendered
}

fn render_frame(frame: resident_ipc::ResponseFrame) -> Response {
    let status = StatusCode::from_u16(frame.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(frame.body));
    *response.status_mut() = status;

    for (name, value) in frame.headers.iter() {
        if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(header = %name, "Worker returned an invalid header"),
        }
    }
    response
}

async fn health(State(state): State<HttpState>) -> Response {
    let snapshot = state.dispatcher.pool().snapshot();
    let (status, label) = if snapshot.shutting_down {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else if snapshot.degraded {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "version": env!("CARGO_PKG_VERSION"),
            "pool": snapshot,
        })),
    )
        .into_response()
}

/// HTTP transport backed by axum
pub struct HttpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl HttpListener {
    pub async fn bind(
        config: &ListenerConfig,
        dispatcher: Dispatcher,
        request_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let (listener, local_addr) = bind(&config.bind_address).await?;
        Ok(Self {
            listener,
            local_addr,
            router: router(config, dispatcher, request_timeout),
        })
    }
}

#[async_trait]
impl Listener for HttpListener {
    fn name(&self) -> &'static str {
        "http"
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn serve(self: Box<Self>, shutdown: ShutdownCoordinator) -> Result<(), ServerError> {
        let HttpListener {
            listener,
            local_addr,
            router,
        } = *self;

        info!("HTTP listener on {}", local_addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait_for(ShutdownSignal::Graceful).await })
            .await?;
        info!("HTTP listener on {} stopped", local_addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::watch::WatchTable;
    use resident_config::PoolConfig;
    use resident_pool::testing::FakeSpawner;
    use resident_pool::WorkerPool;
    use std::sync::Arc;

    struct Harness {
        base: String,
        pool: WorkerPool,
        shutdown: ShutdownCoordinator,
        server: tokio::task::JoinHandle<Result<(), ServerError>>,
    }

    async fn harness(request_timeout: Duration) -> Harness {
        let pool = WorkerPool::new(
            PoolConfig {
                workers: 2,
                stop_timeout: Duration::from_millis(100),
                ..PoolConfig::default()
            },
            Arc::new(FakeSpawner::new()),
        );
        pool.reconcile();
        assert!(pool.wait_for_ready(2, Duration::from_secs(2)).await);

        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_body_bytes: 1024,
            ..ListenerConfig::http_default()
        };
        let dispatcher = Dispatcher::new(pool.clone(), WatchTable::new(), Duration::from_secs(1));
        let listener = HttpListener::bind(&config, dispatcher, request_timeout).await.unwrap();
        let base = format!("http://{}", listener.local_addr());

        let shutdown = ShutdownCoordinator::new();
        let server = tokio::spawn(Box::new(listener).serve(shutdown.clone()));
        Harness {
            base,
            pool,
            shutdown,
            server,
        }
    }

    #[tokio::test]
    async fn test_request_forwarded_to_worker() {
        let h = harness(Duration::from_secs(5)).await;
        let response = reqwest::Client::new()
            .post(format!("{}/echo?x=1", h.base))
            .header("x-custom", "value")
            .body("hello")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key("x-worker"));
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_dispatch() {
        let h = harness(Duration::from_secs(5)).await;
        let response = reqwest::Client::new()
            .post(format!("{}/echo", h.base))
            .body(vec![b'x'; 4096])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 413);
        let served: u64 = h.pool.snapshot().workers.iter().map(|w| w.requests_served).sum();
        assert_eq!(served, 0);
    }

    #[tokio::test]
    async fn test_health_reports_pool() {
        let h = harness(Duration::from_secs(5)).await;
        let response = reqwest::get(format!("{}/_resident/health", h.base)).await.unwrap();
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pool"]["desired"], 2);
        assert_eq!(body["pool"]["workers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_errors_map_to_status_codes() {
        let h = harness(Duration::from_millis(100)).await;
        let client = reqwest::Client::new();

        let crashed = client.get(format!("{}/crash", h.base)).send().await.unwrap();
        assert_eq!(crashed.status(), 500);

        let failed = client.get(format!("{}/fail", h.base)).send().await.unwrap();
        assert_eq!(failed.status(), 500);

        let slow = client.get(format!("{}/sleep/400", h.base)).send().await.unwrap();
        assert_eq!(slow.status(), 504);

        h.pool.begin_shutdown();
        let refused = client.get(format!("{}/echo", h.base)).send().await.unwrap();
        assert_eq!(refused.status(), 503);
    }

    #[test]
    fn test_render_keeps_each_set_cookie() {
        let mut frame = resident_ipc::ResponseFrame::new(200)
            .with_header("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT")
            .with_header("Set-Cookie", "b=2")
            .with_header("Connection", "close");
        frame.headers.append("Vary", "Accept");

        let response = render_frame(frame);
        let cookies: Vec<&str> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT", "b=2"]);
        assert!(!response.headers().contains_key("connection"));
        assert_eq!(response.headers().get("vary").unwrap(), "Accept");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_signal() {
        let h = harness(Duration::from_secs(5)).await;
        h.shutdown.signal(ShutdownSignal::Graceful);
        let result = tokio::time::timeout(Duration::from_secs(2), h.server).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
