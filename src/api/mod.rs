//! The read-only HTTP API: routes, handlers, response cache, and Prometheus metrics.
//!
//! A multi-chain, `chain_id`-parameterized surface: `GET /chains`, `/health`, `/holders`,
//! `/status`, `/stats`, `/metrics`, plus per-request metrics middleware.

pub mod cache;
pub mod handlers;
pub mod metrics;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use tower_http::cors::CorsLayer;

use crate::rpc::RpcClient;
use crate::store::Store;

use self::cache::ResponseCache;
use self::metrics::Metrics;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub metrics: Arc<Metrics>,
    pub cache: Arc<ResponseCache>,
    pub rpc_clients: Arc<std::collections::HashMap<i64, RpcClient>>,
}

impl AppState {
    pub fn new(
        store: Store,
        rpc_clients: std::collections::HashMap<i64, RpcClient>,
    ) -> Self {
        Self {
            store,
            metrics: Arc::new(Metrics::new()),
            cache: Arc::new(ResponseCache::new()),
            rpc_clients: Arc::new(rpc_clients),
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chains", axum::routing::get(handlers::get_chains))
        .route("/health", axum::routing::get(handlers::get_health))
        .route("/holders", axum::routing::get(handlers::get_holders))
        .route("/status", axum::routing::get(handlers::get_status))
        .route("/stats", axum::routing::get(handlers::get_stats))
        .route("/metrics", axum::routing::get(handlers::get_metrics))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .with_state(state)
}

/// Records request count and latency for every route except `/metrics` itself — scraping
/// `/metrics` shouldn't inflate its own counters.
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    if path == "/metrics" {
        return next.run(request).await;
    }
    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    state.metrics.observe_request(&method, &path, &status, elapsed);
    response
}
