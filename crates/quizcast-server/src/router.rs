//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! behind the rate-limit middleware, CORS and request tracing.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admission;
use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// Results and the overall ranking are also mounted under `/api/admin`
/// for the moderator dashboard. CORS allows any origin; the dashboards
/// are served from a different host.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Participants
        .route(
            "/api/participants/register",
            post(handlers::register_participant),
        )
        .route("/api/participants/{id}", get(handlers::get_participant))
        .route(
            "/api/participants/{id}/answers",
            get(handlers::participant_answers),
        )
        .route("/api/answers", post(handlers::submit_answer))
        .route("/api/answers/{id}", put(handlers::update_answer))
        // Session
        .route("/api/session/status", get(handlers::session_status))
        .route("/api/admin/session/start", post(handlers::start_session))
        .route("/api/admin/session/next", post(handlers::next_question))
        .route(
            "/api/admin/session/toggle-answers",
            post(handlers::toggle_answers),
        )
        .route("/api/admin/session/end", post(handlers::end_session))
        // Results
        .route("/api/results/current", get(handlers::current_results))
        .route("/api/results/quiz/{id}", get(handlers::quiz_results))
        .route("/api/ranking/overall", get(handlers::overall_ranking))
        .route("/api/ranking/quiz/{id}", get(handlers::quiz_ranking))
        .route(
            "/api/ranking/participant/{id}",
            get(handlers::participant_ranking),
        )
        .route("/api/admin/results/current", get(handlers::current_results))
        .route("/api/admin/results/quiz/{id}", get(handlers::quiz_results))
        .route("/api/admin/ranking/overall", get(handlers::overall_ranking))
        // WebSocket
        .route("/api/ws/results", get(ws::ws_results))
        .route("/api/ws/stats", get(handlers::ws_stats))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admission::rate_limit,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
