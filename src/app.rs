//! Wiring: shared application state and router assembly.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dashboard;
use crate::fleet::Fleet;
use crate::latency::LatencyWindow;
use crate::proxy;
use crate::stats::StatsSnapshot;

pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub latency_window: Arc<LatencyWindow>,
    pub http_client: reqwest::Client,
    pub url_base: String,
    pub stats_snapshot: Arc<ArcSwap<StatsSnapshot>>,
}

impl AppState {
    pub fn new(
        fleet: Arc<Fleet>,
        latency_window: Arc<LatencyWindow>,
        url_base: String,
        forward_timeout: Duration,
        stats_snapshot: Arc<ArcSwap<StatsSnapshot>>,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(forward_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            fleet,
            latency_window,
            http_client,
            url_base,
            stats_snapshot,
        })
    }
}

async fn plot_reserved() -> StatusCode {
    // Plot rendering is out of scope (spec.md §1); this suffix is reserved
    // for the dashboard so it is never forwarded to a worker.
    StatusCode::NOT_FOUND
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard::index))
        .route("/stats", get(dashboard::stats))
        .route("/healthz", get(dashboard::healthz))
        .route("/plot/{*rest}", any(plot_reserved))
        .route("/{*suffix}", any(proxy::proxy))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
