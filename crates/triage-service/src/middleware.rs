//! Cross-cutting HTTP middleware: API-key auth, the sliding-window rate
//! limiter, bidirectional PII redaction, and idempotency-key replay.
//!
//! Each is a plain `axum::middleware::from_fn_with_state` function rather
//! than a `tower::Layer` impl, since none of them need to be reused outside
//! this router.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use triage_core::{Actor, Admission};

use crate::{ApiError, ServiceState};

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Records every request's route and status against `http_requests_total`.
/// Uses the matched route template (`/api/customer/:id/profile`) rather than
/// the literal path so per-customer requests collapse into one label series.
pub async fn request_metrics_layer(
    State(state): State<ServiceState>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&route, response.status().as_str()])
        .inc();
    response
}

pub async fn api_key_layer(
    State(state): State<ServiceState>,
    mut req: Request,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match provided {
        Some(key) if key == *state.api_key => {
            req.extensions_mut().insert(Actor::Operator(key));
            next.run(req).await
        }
        _ => ApiError::auth("missing or invalid x-api-key header").into_response(),
    }
}

pub async fn rate_limit_layer(
    State(state): State<ServiceState>,
    req: Request,
    next: Next,
) -> Response {
    let client_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let admission = state.rate_limiter.check(&client_key).await;

    let current_fail_opens = state.rate_limiter.fail_opens();
    let previous = state
        .last_fail_opens
        .swap(current_fail_opens, Ordering::Relaxed);
    if current_fail_opens > previous {
        state
            .metrics
            .rate_limiter_fail_open_total
            .inc_by(current_fail_opens - previous);
    }

    match admission {
        Admission::Admitted => {
            state.metrics.rate_limiter_admitted_total.inc();
            next.run(req).await
        }
        Admission::Rejected { retry_after_secs } => {
            state.metrics.rate_limiter_rejected_total.inc();
            let mut response = ApiError::RateLimited { retry_after_secs }.into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
            response
        }
    }
}

/// Buffers request and response bodies and walks any JSON payload through
/// the redactor. Skips the SSE stream route, whose body never terminates.
pub async fn redact_layer(State(state): State<ServiceState>, req: Request, next: Next) -> Response {
    if req.uri().path().ends_with("/stream") {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::validation("request body too large or unreadable").into_response(),
    };
    let redacted_request = redact_bytes(&state, &bytes, &path, "request");
    let req = Request::from_parts(parts, Body::from(redacted_request));

    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    let redacted_response = redact_bytes(&state, &bytes, &path, "response");
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(redacted_response))
}

fn redact_bytes(state: &ServiceState, bytes: &[u8], path: &str, direction: &'static str) -> Vec<u8> {
    if bytes.is_empty() {
        return Vec::new();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => {
            let (redacted, masked) = state.redactor.redact_value(&value);
            if masked {
                tracing::warn!(path = %path, direction, "PII redacted from HTTP body");
            }
            serde_json::to_vec(&redacted).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => bytes.to_vec(),
    }
}

/// Replays a cached response for a repeated `Idempotency-Key`, and caches the
/// first successful response under a fresh key. Requests without the header
/// pass straight through.
pub async fn idempotency_layer(
    State(state): State<ServiceState>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let Some(key) = key else {
        return next.run(req).await;
    };

    if let Some((status, body)) = state.idempotency.get(&key) {
        state.metrics.idempotency_cache_hits_total.inc();
        return (
            StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            Json(body),
        )
            .into_response();
    }

    let response = next.run(req).await;
    let status = response.status();
    if !status.is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
        state.idempotency.put(key, status.as_u16(), value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
