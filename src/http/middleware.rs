//! Admission interceptor for axum routers.
//!
//! Derives a caller identity for every inbound request, asks the limiter
//! whether it may proceed, and either forwards the request or answers
//! `429 Too Many Requests` itself. Limiter errors never reach the caller;
//! they surface only as a denial.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, trace};

use crate::ratelimit::{Decision, RateLimiterBackend};

/// Header carrying the bucket capacity.
pub const HEADER_RATE_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the best-effort remaining token count.
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Identity used when a request carries no usable client address.
const UNKNOWN_IDENTITY: &str = "unknown";
/// Tokens charged per request.
const REQUEST_COST: u64 = 1;

/// Shared limiter handle used as middleware state.
pub type SharedLimiter = Arc<dyn RateLimiterBackend>;

/// Put the admission interceptor in front of every route of `router`.
pub fn with_admission(router: Router, limiter: SharedLimiter) -> Router {
    router.layer(middleware::from_fn_with_state(limiter, admission))
}

/// The interceptor itself, usable with [`middleware::from_fn_with_state`].
pub async fn admission(
    State(limiter): State<SharedLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request);
    let decision = limiter.decide(&identity, REQUEST_COST).await;

    if !decision.allowed {
        info!(identity = %identity, "Rate limit exceeded for client");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "too many requests" })),
        )
            .into_response();
        set_rate_limit_headers(response.headers_mut(), &Decision::denied(decision.limit));
        return response;
    }

    trace!(identity = %identity, remaining = decision.remaining, "Request admitted");
    let mut response = next.run(request).await;
    set_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Identify the caller: `X-Forwarded-For` (first hop), then `X-Real-IP`,
/// then the peer address, then a fixed placeholder.
pub fn client_identity(request: &Request) -> String {
    let headers = request.headers();
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip").map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(HEADER_RATE_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
}
