//! Rate-limit middleware.
//!
//! Runs before routing. The client is identified by the first
//! `X-Forwarded-For` hop, falling back to the peer address when the
//! server was started with connect info, and to `"unknown"` otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use quizcast_core::RouteClass;

use crate::error::ApiError;
use crate::state::AppState;

/// Reject the request with 429 when the client's bucket for the route
/// class is empty.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let class = RouteClass::classify(request.uri().path());
    let client = client_identity(&request);

    if state.admission.allow(&client, class) {
        return next.run(request).await;
    }

    tracing::debug!(%client, %class, "Rate limit exceeded");
    ApiError::RateLimited.into_response()
}

/// Identity used as the rate-limit key.
pub fn client_identity(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_owned();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| String::from("unknown"), |ConnectInfo(addr)| addr.ip().to_string())
}
