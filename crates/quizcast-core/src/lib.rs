//! Real-time core of the Quizcast engine.
//!
//! This crate owns everything between the HTTP/WebSocket surface and the
//! store: who is connected, what each connection is watching, how a state
//! change reaches them, and how answers turn into tallies.
//!
//! # Modules
//!
//! - [`clock`] -- [`Clock`] trait with a system and a manual implementation.
//! - [`config`] -- Configuration loading from `quizcast-config.yaml` into
//!   strongly-typed structs.
//! - [`registry`] -- [`ConnectionRegistry`]: live connections, their
//!   subscriptions and heartbeat times, capped at a fixed size.
//! - [`broadcaster`] -- Topic fan-out onto per-connection bounded queues.
//! - [`liveness`] -- Periodic pings and the stale-connection sweep.
//! - [`aggregator`] -- Per-quiz tallies, answer status and the overall
//!   ranking.
//! - [`submission`] -- Answer submission and correction with the session
//!   gate.
//! - [`session`] -- Moderator control of the quiz session.
//! - [`rate_limit`] -- Keyed token buckets per route class.
//!
//! [`Clock`]: clock::Clock
//! [`ConnectionRegistry`]: registry::ConnectionRegistry

pub mod aggregator;
pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod liveness;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod submission;

pub use aggregator::ResultAggregator;
pub use broadcaster::{BroadcastReport, Broadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, QuizcastConfig};
pub use liveness::{LivenessMonitor, LivenessSettings};
pub use rate_limit::{AdmissionControl, RouteClass};
pub use registry::{
    ConnectionHandle, ConnectionInbox, ConnectionRegistry, OutboundFrame, RegistryError, Topic,
};
pub use session::{SessionControl, SessionError};
pub use submission::{SubmissionCoordinator, SubmissionError, SubmissionOutcome, SubmitAnswer};
