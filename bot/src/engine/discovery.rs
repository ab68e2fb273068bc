use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

use crate::irc::translate::canonical_channel;

use super::capabilities::{AnalyticsBackend, ChatNetwork, LogSink};
use super::membership::{ChannelState, MembershipRegistry};

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Maximum channels requested per phase.
    pub batch_size: usize,
    pub cooldown: Duration,
    /// `None` repeats phases until shutdown.
    pub max_phases: Option<u32>,
}

/// Outcome of one discovery phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: u32,
    /// Channels returned by analytics (after capping to the batch size).
    pub candidates: usize,
    /// Channels that passed admission and were handed to the network.
    pub attempted: usize,
    pub failed: usize,
    /// Analytics failed; the phase ran with zero candidates.
    pub query_failed: bool,
}

/// Grows membership from analytics feedback: query, join, cool down, repeat.
pub struct DiscoveryScheduler {
    chat: Arc<dyn ChatNetwork>,
    analytics: Arc<dyn AnalyticsBackend>,
    membership: Arc<MembershipRegistry>,
    sink: Arc<dyn LogSink>,
    settings: DiscoverySettings,
}

impl DiscoveryScheduler {
    pub fn new(
        chat: Arc<dyn ChatNetwork>,
        analytics: Arc<dyn AnalyticsBackend>,
        membership: Arc<MembershipRegistry>,
        sink: Arc<dyn LogSink>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            chat,
            analytics,
            membership,
            sink,
            settings,
        }
    }

    /// Join the bootstrap channels unconditionally, ahead of any discovery.
    /// Names are canonicalised first; blanks are skipped. Returns the number
    /// of failed joins.
    pub async fn join_bootstrap(&self, channels: &[String]) -> usize {
        let mut failed = 0;
        for channel in channels.iter().map(|c| canonical_channel(c.trim())) {
            if channel.is_empty() {
                continue;
            }
            self.membership.ensure_candidate(&channel);
            if self.membership.try_begin_join(&channel) && !self.attempt_join(&channel).await {
                failed += 1;
            }
        }
        failed
    }

    /// One discovery phase. Never fails: query errors become an empty batch,
    /// join errors are recorded per channel. Once `cancel` fires no further
    /// joins are started; one already in flight is allowed to finish.
    pub async fn run_phase(&self, phase: u32, cancel: &CancellationToken) -> PhaseReport {
        let mut report = PhaseReport {
            phase,
            ..Default::default()
        };

        // Failed channels are terminal but not excluded from the query;
        // admission control skips them below.
        let excluding = self
            .membership
            .channels_in(&[ChannelState::Joined, ChannelState::Joining]);

        self.sink.emit(
            Level::INFO,
            "Fetching streamers",
            json!({ "phase": phase, "excluding": excluding.len() }),
        );

        let mut streamers = match self
            .analytics
            .query_top_channels(&excluding, self.settings.batch_size)
            .await
        {
            Ok(streamers) => streamers,
            Err(e) => {
                report.query_failed = true;
                self.sink.emit(
                    Level::WARN,
                    "discovery query failed",
                    json!({ "phase": phase, "error": e.to_string() }),
                );
                Vec::new()
            }
        };
        streamers.truncate(self.settings.batch_size);
        report.candidates = streamers.len();

        self.sink.emit(
            Level::INFO,
            "Fetched streamers",
            json!({ "streamers": streamers }),
        );

        for channel in streamers.iter().map(|c| canonical_channel(c)) {
            if cancel.is_cancelled() {
                info!(phase, "shutdown requested, no further joins this phase");
                break;
            }
            if channel.is_empty() || excluding.contains(&channel) {
                continue;
            }
            self.membership.ensure_candidate(&channel);
            if !self.membership.try_begin_join(&channel) {
                continue;
            }
            report.attempted += 1;
            if !self.attempt_join(&channel).await {
                report.failed += 1;
            }
        }

        info!(
            phase,
            candidates = report.candidates,
            attempted = report.attempted,
            failed = report.failed,
            "discovery phase complete"
        );
        report
    }

    /// Run phases separated by the cool-down until `max_phases` or cancellation.
    /// A phase in progress is allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) -> Vec<PhaseReport> {
        let mut reports = Vec::new();
        let mut phase = 1;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            reports.push(self.run_phase(phase, &cancel).await);

            if self.settings.max_phases.is_some_and(|max| phase >= max) {
                info!(phases = phase, "discovery finished");
                break;
            }
            phase += 1;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.cooldown) => {}
            }
        }

        reports
    }

    /// Hand an admitted (`Joining`) channel to the network. On refusal the
    /// channel is marked failed and the error logged; returns false.
    async fn attempt_join(&self, channel: &str) -> bool {
        self.sink
            .emit(Level::INFO, "joining", json!({ "channel": channel }));

        match self.chat.join(channel).await {
            Ok(()) => true,
            Err(e) => {
                self.membership.mark_failed(channel);
                self.sink.emit(
                    Level::ERROR,
                    "failed joining channel",
                    json!({ "channel": channel, "error": e.to_string() }),
                );
                false
            }
        }
    }
}
