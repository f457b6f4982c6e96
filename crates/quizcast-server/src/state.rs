//! Shared application state for the API server.
//!
//! [`AppState`] is built once by the composition root and handed to the
//! router wrapped in an [`Arc`]. It owns the connection registry and the
//! services that mutate or read the store; handlers never talk to the
//! store except through them, with the exception of participant
//! registration and the health probe.

use std::sync::Arc;

use quizcast_core::config::{RateLimitConfig, RealtimeConfig};
use quizcast_core::{
    AdmissionControl, Broadcaster, Clock, ConnectionRegistry, LivenessMonitor, LivenessSettings,
    ResultAggregator, SessionControl, SubmissionCoordinator,
};
use quizcast_db::Store;

/// Shared state for the Axum application.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Persistent store.
    pub store: Store,
    /// Live WebSocket connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Topic fan-out over the registry.
    pub broadcaster: Arc<Broadcaster>,
    /// Tallies and rankings.
    pub aggregator: ResultAggregator,
    /// Answer submission and correction.
    pub submission: SubmissionCoordinator,
    /// Moderator session control.
    pub session: SessionControl,
    /// Per-client rate limiting.
    pub admission: Arc<AdmissionControl>,
    /// Outbound frames buffered per connection.
    pub outbound_queue_capacity: usize,
    /// Ping and sweep timing for the liveness monitor.
    pub liveness: LivenessSettings,
}

impl AppState {
    /// Wire the services together over `store`.
    pub fn new(
        store: Store,
        realtime: &RealtimeConfig,
        rate_limit: &RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            realtime.max_connections,
            Arc::clone(&clock),
        ));
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        let aggregator = ResultAggregator::new(store.clone(), Arc::clone(&clock));
        let submission = SubmissionCoordinator::new(
            store.clone(),
            aggregator.clone(),
            Arc::clone(&broadcaster),
        );
        let session = SessionControl::new(store.clone(), Arc::clone(&broadcaster), clock);

        Self {
            store,
            registry,
            broadcaster,
            aggregator,
            submission,
            session,
            admission: Arc::new(AdmissionControl::new(rate_limit)),
            outbound_queue_capacity: realtime.outbound_queue_capacity.max(1),
            liveness: LivenessSettings::from(realtime),
        }
    }

    /// A liveness monitor over this state's registry.
    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(Arc::clone(&self.registry), self.liveness)
    }
}
