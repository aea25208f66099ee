//! Error taxonomy for the proxy boundary and background controllers.
//!
//! Mirrors the teacher's `EdgeServiceError` style: one variant per failure
//! class with a `#[error(...)]` message, converted to an HTTP response only
//! at the proxy boundary. Background controllers never propagate these; they
//! log and continue.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to an inbound client by the proxy handler.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no services available")]
    NoWorkers,

    #[error("transport failure talking to worker on port {port}: {source}")]
    Transport {
        port: u16,
        source: reqwest::Error,
    },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::NoWorkers => (
                StatusCode::NOT_IMPLEMENTED,
                axum::Json(json!({ "error": "No services available" })),
            )
                .into_response(),
            ProxyError::Transport { port, source } => (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "error": source.to_string(), "service": port })),
            )
                .into_response(),
        }
    }
}

/// Errors raised by the worker supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("port {0} is already registered in the fleet")]
    PortInUse(u16),

    #[error("failed to spawn worker on port {port}: {source}")]
    SpawnFailed {
        port: u16,
        source: std::io::Error,
    },
}
