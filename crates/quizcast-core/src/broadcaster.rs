//! Topic fan-out of server messages.
//!
//! A broadcast serializes the message once, snapshots the matching
//! connections from the registry and queues the shared frame on each
//! connection's bounded outbound queue. Queuing never blocks: a full
//! queue drops the frame for that one connection and a closed queue is
//! skipped. Removing dead connections is left to the connection task and
//! the liveness monitor.

use std::sync::Arc;

use quizcast_types::ServerMessage;
use tokio::sync::mpsc::error::TrySendError;

use crate::registry::{ConnectionRegistry, OutboundFrame, Topic};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections matching the topic at snapshot time.
    pub matched: usize,
    /// Connections the frame was queued for.
    pub queued: usize,
    /// Connections that did not get the frame (queue full or closed).
    pub dropped: usize,
}

/// Sends server messages to the connections of a topic.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this broadcaster reads from.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Queue `message` for every connection matching `topic`.
    ///
    /// Delivery failures are logged and counted, never returned.
    pub async fn broadcast(&self, topic: Topic, message: &ServerMessage) -> BroadcastReport {
        let kind = message.kind();
        let text: Arc<str> = match message.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::warn!(%topic, %kind, error = %e, "Failed to serialize broadcast");
                return BroadcastReport::default();
            }
        };

        let targets = self.registry.snapshot(topic).await;
        let mut report = BroadcastReport {
            matched: targets.len(),
            ..BroadcastReport::default()
        };

        for handle in &targets {
            match handle.try_send(OutboundFrame::Text(Arc::clone(&text))) {
                Ok(()) => report.queued = report.queued.saturating_add(1),
                Err(TrySendError::Full(_)) => {
                    report.dropped = report.dropped.saturating_add(1);
                    tracing::warn!(
                        connection_id = %handle.id(),
                        %kind,
                        "Outbound queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped = report.dropped.saturating_add(1);
                    tracing::debug!(
                        connection_id = %handle.id(),
                        %kind,
                        "Connection closed before broadcast"
                    );
                }
            }
        }

        tracing::debug!(
            %topic,
            %kind,
            matched = report.matched,
            queued = report.queued,
            dropped = report.dropped,
            "Broadcast sent"
        );
        report
    }
}
