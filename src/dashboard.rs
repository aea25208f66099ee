//! Dashboard and stats HTTP surface (spec.md §6).
//!
//! The dashboard's own HTML/JS and plot rendering are out of scope (spec.md
//! §1); this module only serves the fixed shell and the read-only stats
//! snapshot, the same way `cylo::repo` bundles a fixed asset with
//! `include_str!` rather than reaching for a templating engine.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};

use crate::app::AppState;

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

pub async fn index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.stats_snapshot.load_full();
    axum::Json((*snapshot).clone())
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let fleet_size = state.fleet.len();
    let body = serde_json::json!({ "healthy": fleet_size > 0, "fleet_size": fleet_size });
    if fleet_size > 0 {
        (StatusCode::OK, axum::Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body))
    }
}
