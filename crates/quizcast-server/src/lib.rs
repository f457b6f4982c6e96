//! HTTP and `WebSocket` surface of the Quizcast engine.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **`WebSocket` endpoint** (`/api/ws/results`) where observers
//!   subscribe to a quiz and receive tallies, answer status and session
//!   changes as they happen
//! - **Participant endpoints** for registration and answer submission
//! - **Moderator endpoints** under `/api/admin` for session control,
//!   results and ranking
//!
//! Every request passes the per-client rate limiter first. All state
//! lives in [`AppState`]; the binary builds it and runs the liveness
//! monitor and limiter janitor next to the server.

pub mod admission;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use error::ApiError;
pub use router::build_router;
pub use server::{start_server, ServerError};
pub use state::AppState;
