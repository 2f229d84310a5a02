//! A tiny in-process HTTP target for exercising load scenarios: the same
//! endpoint surface a typical web service health-checks and lists resources
//! on, plus a deliberately slow route.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_ROOT: &str = "/";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_READY: &str = "/ready";
pub const PATH_USERS: &str = "/api/users";
pub const PATH_SLOW: &str = "/slow";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }
}

async fn handle_root(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    Json(json!({ "service": "rampr-testserver", "version": env!("CARGO_PKG_VERSION") }))
}

async fn handle_health(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    Json(json!({ "status": "healthy" }))
}

async fn handle_ready(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    Json(json!({ "status": "ready" }))
}

async fn handle_users(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    Json(json!({
        "users": [
            { "id": 1, "name": "alice" },
            { "id": 2, "name": "bob" },
        ]
    }))
}

async fn handle_slow(State(stats): State<TestServerStats>) -> impl IntoResponse {
    stats.inc_requests_total();
    sleep(Duration::from_millis(50)).await;
    (StatusCode::OK, "slow")
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_ROOT, get(handle_root))
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_READY, get(handle_ready))
        .route(PATH_USERS, get(handle_users))
        .route(PATH_SLOW, get(handle_slow))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
