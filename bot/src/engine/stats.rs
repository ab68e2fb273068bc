use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use super::capabilities::LogSink;
use super::membership::MembershipRegistry;
use super::presence::PresenceTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub joining: usize,
    pub joined: usize,
    pub failed: usize,
    /// Distinct users seen across all channels.
    pub watching: usize,
    /// Channels with at least one observed user.
    pub active_channels: usize,
}

/// Periodic read-only snapshot of membership and presence.
pub struct StatsReporter {
    membership: Arc<MembershipRegistry>,
    presence: Arc<PresenceTracker>,
    sink: Arc<dyn LogSink>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(
        membership: Arc<MembershipRegistry>,
        presence: Arc<PresenceTracker>,
        sink: Arc<dyn LogSink>,
        interval: Duration,
    ) -> Self {
        Self {
            membership,
            presence,
            sink,
            interval,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counts = self.membership.counts();
        StatsSnapshot {
            joining: counts.joining,
            joined: counts.joined,
            failed: counts.failed,
            watching: self.presence.watcher_count(),
            active_channels: self.presence.channel_count(),
        }
    }

    pub fn report(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        let payload = serde_json::to_value(snapshot).unwrap_or_default();
        self.sink.emit(Level::INFO, "stats", payload);
        snapshot
    }

    /// Report every interval until cancelled. The first report is one interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stats reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }
}
