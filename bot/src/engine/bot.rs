use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

use crate::error::BotError;

use super::capabilities::{AnalyticsBackend, ChatNetwork, LogSink};
use super::discovery::{DiscoveryScheduler, DiscoverySettings};
use super::membership::MembershipRegistry;
use super::presence::PresenceTracker;
use super::router::EventRouter;
use super::stats::StatsReporter;

/// Everything the running bot needs, built once in `main`.
pub struct BotContext {
    pub chat: Arc<dyn ChatNetwork>,
    pub analytics: Arc<dyn AnalyticsBackend>,
    pub sink: Arc<dyn LogSink>,
    pub bootstrap_channels: Vec<String>,
    pub discovery: DiscoverySettings,
    pub stats_interval: Duration,
}

/// Shared state handles, exposed so callers (and tests) can observe the bot.
#[derive(Clone, Default)]
pub struct BotState {
    pub membership: Arc<MembershipRegistry>,
    pub presence: Arc<PresenceTracker>,
}

/// Run the bot until `shutdown` resolves (clean exit), the chat connection
/// is lost or cannot be established, or a background task panics (fatal).
pub async fn run<F>(ctx: BotContext, state: BotState, shutdown: F) -> Result<(), BotError>
where
    F: Future<Output = ()>,
{
    ctx.sink
        .emit(Level::INFO, "Application started", json!({}));

    let events = ctx.chat.connect().await?;
    info!("connected to chat network");

    let cancel = CancellationToken::new();

    let router = EventRouter::new(
        state.presence.clone(),
        state.membership.clone(),
        ctx.sink.clone(),
    );
    let mut router_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { router.run(events, cancel).await })
    };

    let stats = StatsReporter::new(
        state.membership.clone(),
        state.presence.clone(),
        ctx.sink.clone(),
        ctx.stats_interval,
    );
    let mut stats_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { stats.run(cancel).await })
    };

    let scheduler = DiscoveryScheduler::new(
        ctx.chat.clone(),
        ctx.analytics.clone(),
        state.membership.clone(),
        ctx.sink.clone(),
        ctx.discovery.clone(),
    );
    let mut discovery_task: JoinHandle<()> = {
        let cancel = cancel.clone();
        let bootstrap = ctx.bootstrap_channels.clone();
        tokio::spawn(async move {
            let failed = scheduler.join_bootstrap(&bootstrap).await;
            if failed > 0 {
                warn!(failed, "some bootstrap channels could not be joined");
            }
            scheduler.run(cancel).await;
        })
    };

    // A task that panics is as fatal as a lost connection. Discovery ending
    // normally (max phases reached) leaves the bot monitoring.
    tokio::pin!(shutdown);
    let (mut router_done, mut stats_done, mut discovery_done) = (false, false, false);
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break Ok(());
            }
            ended = &mut router_task => {
                router_done = true;
                break match ended {
                    Ok(true) => Err(BotError::EventStreamClosed),
                    Ok(false) => Ok(()),
                    Err(source) => Err(BotError::Task { name: "router", source }),
                };
            }
            ended = &mut stats_task, if !stats_done => {
                stats_done = true;
                if let Err(source) = ended {
                    break Err(BotError::Task { name: "stats", source });
                }
            }
            ended = &mut discovery_task, if !discovery_done => {
                discovery_done = true;
                match ended {
                    Ok(()) => info!("discovery finished, monitoring joined channels"),
                    Err(source) => break Err(BotError::Task { name: "discovery", source }),
                }
            }
        }
    };

    cancel.cancel();
    if !router_done && let Err(source) = router_task.await {
        warn!(error = %source, "router task ended abnormally");
    }
    if !stats_done && let Err(source) = stats_task.await {
        warn!(error = %source, "stats task ended abnormally");
    }
    // An in-flight join may hold discovery until the network answers or times out.
    if !discovery_done && let Err(source) = discovery_task.await {
        warn!(error = %source, "discovery task ended abnormally");
    }

    ctx.sink.flush().await;
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::events::ChatNetworkEvent;
    use crate::engine::membership::ChannelState;
    use crate::error::{ConnectionError, QueryError};
    use crate::test_support::{FakeChat, RecordingSink, ScriptedAnalytics};

    fn context(chat: Arc<FakeChat>, sink: Arc<RecordingSink>) -> BotContext {
        BotContext {
            chat,
            analytics: Arc::new(ScriptedAnalytics::new(vec![Ok(vec!["a".into()])])),
            sink,
            bootstrap_channels: vec!["home".into()],
            discovery: DiscoverySettings {
                batch_size: 2,
                cooldown: Duration::from_secs(3600),
                max_phases: Some(1),
            },
            stats_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let chat = Arc::new(FakeChat::new("bot").refusing_connect());
        let sink = Arc::new(RecordingSink::default());

        let result = run(context(chat, sink), BotState::default(), std::future::pending()).await;

        assert!(matches!(
            result,
            Err(BotError::Connection(ConnectionError::Authentication(_)))
        ));
    }

    #[tokio::test]
    async fn test_stream_end_is_fatal() {
        let chat = Arc::new(FakeChat::new("bot"));
        let sink = Arc::new(RecordingSink::default());
        let state = BotState::default();

        let closer = {
            let chat = chat.clone();
            let state = state.clone();
            tokio::spawn(async move {
                while state.membership.state("a") != Some(ChannelState::Joined) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                chat.disconnect();
            })
        };

        let result = run(context(chat.clone(), sink.clone()), state.clone(), std::future::pending()).await;
        closer.await.unwrap();

        assert!(matches!(result, Err(BotError::EventStreamClosed)));
        assert_eq!(chat.joined(), vec!["home", "a"]);
        assert_eq!(state.membership.state("home"), Some(ChannelState::Joined));
        assert_eq!(sink.names()[0], "Application started");
        assert!(sink.flushed());
    }

    #[tokio::test]
    async fn test_shutdown_is_clean() {
        let chat = Arc::new(FakeChat::new("bot"));
        let sink = Arc::new(RecordingSink::default());
        let state = BotState::default();

        let shutdown = {
            let state = state.clone();
            async move {
                while state.membership.state("a") != Some(ChannelState::Joined) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        };

        let result = run(context(chat, sink.clone()), state.clone(), shutdown).await;

        assert!(result.is_ok());
        assert_eq!(state.membership.counts().joined, 2);
        assert!(sink.flushed());
    }

    struct PanickingAnalytics;

    #[async_trait]
    impl AnalyticsBackend for PanickingAnalytics {
        async fn query_top_channels(
            &self,
            _excluding: &BTreeSet<String>,
            _limit: usize,
        ) -> Result<Vec<String>, QueryError> {
            panic!("analytics backend blew up");
        }
    }

    #[tokio::test]
    async fn test_discovery_panic_is_fatal() {
        let chat = Arc::new(FakeChat::new("bot"));
        let sink = Arc::new(RecordingSink::default());
        let ctx = BotContext {
            analytics: Arc::new(PanickingAnalytics),
            ..context(chat, sink.clone())
        };

        let result = run(ctx, BotState::default(), std::future::pending()).await;

        assert!(matches!(
            result,
            Err(BotError::Task { name: "discovery", .. })
        ));
        assert!(sink.flushed());
    }

    #[tokio::test]
    async fn test_discovery_finishing_keeps_bot_running() {
        let chat = Arc::new(FakeChat::new("bot"));
        let sink = Arc::new(RecordingSink::default());
        let ctx = BotContext {
            analytics: Arc::new(ScriptedAnalytics::new(vec![])),
            ..context(chat.clone(), sink)
        };
        let state = BotState::default();

        let shutdown = {
            let state = state.clone();
            let chat = chat.clone();
            async move {
                while state.membership.state("home") != Some(ChannelState::Joined) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                // Discovery has run its single phase; the bot must still be routing.
                tokio::time::sleep(Duration::from_millis(20)).await;
                chat.push(ChatNetworkEvent::Join {
                    channel: "home".into(),
                    username: "viewer".into(),
                    is_self: false,
                });
                while state.presence.watcher_count() == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        };

        let result = run(ctx, state.clone(), shutdown).await;

        assert!(result.is_ok());
        assert_eq!(state.presence.watcher_count(), 1);
    }
}
