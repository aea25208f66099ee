//! Proxy handler (spec.md §4.E).
//!
//! Per inbound request: pick a worker, forward the request verbatim, record
//! the round-trip latency, and either merge the worker's JSON response with
//! the timing envelope or pass a non-JSON response through untouched. No
//! mutex is held across the outbound call — `Fleet::pick_next` and
//! `LatencyWindow::append` are the only synchronized operations, and both
//! complete before or after the network call, never around it (spec.md §5).

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ProxyError;

const HOP_BY_HOP: &[&str] = &["host", "content-length", "connection"];

fn forwardable_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(suffix): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(state, method, suffix, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(
    state: Arc<AppState>,
    method: Method,
    suffix: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let ts_lb_received = SystemTime::now();
    let t_received = Instant::now();

    let port = state.fleet.pick_next().ok_or(ProxyError::NoWorkers)?;

    let target = format!(
        "{}:{}/{}",
        state.url_base,
        port,
        suffix.trim_start_matches('/')
    );

    tracing::debug!(%method, %target, "routing request");

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let response = state
        .http_client
        .request(reqwest_method, &target)
        .headers(forwardable_headers(&headers))
        .body(body)
        .send()
        .await
        .map_err(|source| ProxyError::Transport { port, source })?;

    let status = response.status();
    let response_headers = response.headers().clone();
    let response_body = response
        .bytes()
        .await
        .map_err(|source| ProxyError::Transport { port, source })?;

    let ts_lb_returned = SystemTime::now();
    let lb_handle_time = t_received.elapsed().as_secs_f64();
    state.latency_window.append(lb_handle_time);

    let status =
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(&response_body) {
        map.insert("service_port".to_string(), json!(port));
        map.insert(
            "timeline".to_string(),
            json!({
                "ts_lb_received": unix_seconds(ts_lb_received),
                "ts_lb_returned": unix_seconds(ts_lb_returned),
            }),
        );
        map.insert("lb_handle_time".to_string(), json!(lb_handle_time));
        return Ok((status, axum::Json(Value::Object(map))).into_response());
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        if name.as_str() == "content-length" || name.as_str() == "transfer-encoding" {
            continue;
        }
        builder = builder.header(name, value);
    }
    Ok(builder
        .body(axum::body::Body::from(response_body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}
