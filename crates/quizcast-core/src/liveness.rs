//! Connection liveness: periodic pings and stale-connection sweeps.
//!
//! Two timers run independently. The ping timer queues a protocol ping
//! on every connection; a connection that cannot take it (queue full or
//! task gone) is treated as dead, closed and removed. The sweep timer
//! evicts every connection whose last heartbeat is older than the
//! staleness window.
//!
//! [`LivenessMonitor::ping_all`] and [`LivenessMonitor::sweep`] are
//! public so tests can drive them with a manual clock instead of waiting
//! for the timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::RealtimeConfig;
use crate::registry::{ConnectionRegistry, OutboundFrame, Topic};

/// Liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    /// Time between pings.
    pub ping_interval: Duration,
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Silence after which a connection is stale.
    pub stale_after: Duration,
}

impl From<&RealtimeConfig> for LivenessSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            sweep_interval: config.sweep_interval(),
            stale_after: config.stale_after(),
        }
    }
}

/// Pings and sweeps the connection registry.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    settings: LivenessSettings,
}

impl LivenessMonitor {
    /// Create a monitor for `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry>, settings: LivenessSettings) -> Self {
        Self { registry, settings }
    }

    /// Queue a ping on every connection; close and remove the ones that
    /// cannot take it. Returns the number of connections removed.
    pub async fn ping_all(&self) -> usize {
        let mut removed = 0_usize;
        for handle in self.registry.snapshot(Topic::All).await {
            if let Err(e) = handle.try_send(OutboundFrame::Ping) {
                tracing::debug!(
                    connection_id = %handle.id(),
                    error = %e,
                    "Ping failed, dropping connection"
                );
                handle.close();
                if self.registry.remove(handle.id()).await {
                    removed = removed.saturating_add(1);
                }
            }
        }
        removed
    }

    /// Close and remove every connection silent for longer than the
    /// staleness window. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let window = TimeDelta::from_std(self.settings.stale_after).unwrap_or(TimeDelta::MAX);
        let now = self.registry.clock().now();
        let cutoff = now.checked_sub_signed(window).unwrap_or(now);

        let evicted = self.registry.evict_stale(cutoff).await;
        for handle in &evicted {
            handle.close();
        }
        if !evicted.is_empty() {
            let remaining = self.registry.size().await;
            tracing::info!(evicted = evicted.len(), remaining, "Evicted stale connections");
        }
        evicted.len()
    }

    /// Run both timers until `shutdown` flips to `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ping = tokio::time::interval(self.settings.ping_interval);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately; skip that first tick.
        ping.tick().await;
        sweep.tick().await;

        tracing::info!(
            ping_interval_secs = self.settings.ping_interval.as_secs(),
            sweep_interval_secs = self.settings.sweep_interval.as_secs(),
            stale_after_secs = self.settings.stale_after.as_secs(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    self.ping_all().await;
                }
                _ = sweep.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Liveness monitor stopped");
    }
}
