use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info};

use super::capabilities::LogSink;
use super::events::ChatNetworkEvent;
use super::membership::MembershipRegistry;
use super::presence::PresenceTracker;

/// Single dispatch point for inbound chat events. Stateless apart from the
/// handles it was built with.
#[derive(Clone)]
pub struct EventRouter {
    presence: Arc<PresenceTracker>,
    membership: Arc<MembershipRegistry>,
    sink: Arc<dyn LogSink>,
}

impl EventRouter {
    pub fn new(
        presence: Arc<PresenceTracker>,
        membership: Arc<MembershipRegistry>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            presence,
            membership,
            sink,
        }
    }

    pub fn dispatch(&self, event: &ChatNetworkEvent) {
        self.sink.emit(Level::INFO, event.kind(), event.log_payload());

        match event {
            ChatNetworkEvent::Join {
                channel,
                is_self: true,
                ..
            } => {
                self.membership.mark_joined(channel);
            }
            ChatNetworkEvent::Join {
                channel, username, ..
            } => {
                self.membership.ensure_candidate(channel);
                self.presence.record_presence(channel, username);
            }
            ChatNetworkEvent::Message {
                channel,
                username: Some(username),
                ..
            } if !username.is_empty() => {
                self.membership.ensure_candidate(channel);
                self.presence.record_presence(channel, username);
            }
            ChatNetworkEvent::Message { channel, .. } => {
                debug!(%channel, "message without a username, presence not recorded");
            }
            other => {
                self.membership.ensure_candidate(other.channel());
            }
        }
    }

    /// Drain the event stream until it ends or `cancel` fires.
    /// Returns true if the stream ended on its own (connection lost).
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ChatNetworkEvent>,
        cancel: CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("event router shutting down");
                    return false;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return true;
                    };
                    self.dispatch(&event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{SubMethod, Tags};
    use crate::engine::membership::ChannelState;
    use crate::test_support::RecordingSink;

    fn setup() -> (EventRouter, Arc<PresenceTracker>, Arc<MembershipRegistry>, Arc<RecordingSink>) {
        let presence = Arc::new(PresenceTracker::new());
        let membership = Arc::new(MembershipRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::new(presence.clone(), membership.clone(), sink.clone());
        (router, presence, membership, sink)
    }

    fn message(channel: &str, username: Option<&str>) -> ChatNetworkEvent {
        ChatNetworkEvent::Message {
            channel: channel.into(),
            username: username.map(Into::into),
            text: "hi".into(),
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_self_join_marks_joined_without_presence() {
        let (router, presence, membership, sink) = setup();
        router.dispatch(&ChatNetworkEvent::Join {
            channel: "home".into(),
            username: "bot".into(),
            is_self: true,
        });

        assert_eq!(membership.state("home"), Some(ChannelState::Joined));
        assert_eq!(presence.watcher_count(), 0);
        assert_eq!(sink.names(), vec!["join"]);
    }

    #[test]
    fn test_user_join_records_presence() {
        let (router, presence, membership, _sink) = setup();
        membership.mark_joined("a");
        router.dispatch(&ChatNetworkEvent::Join {
            channel: "a".into(),
            username: "u1".into(),
            is_self: false,
        });

        assert_eq!(presence.users_in("a"), 1);
        assert_eq!(membership.state("a"), Some(ChannelState::Joined));
    }

    #[test]
    fn test_message_records_presence() {
        let (router, presence, _membership, sink) = setup();
        router.dispatch(&message("a", Some("u1")));
        router.dispatch(&message("b", Some("u1")));

        assert_eq!(presence.watcher_count(), 1);
        assert_eq!(presence.channel_count(), 2);
        assert_eq!(sink.names(), vec!["message", "message"]);
    }

    #[test]
    fn test_message_without_username_is_logged_only() {
        let (router, presence, _membership, sink) = setup();
        router.dispatch(&message("a", None));
        router.dispatch(&message("a", Some("")));

        assert_eq!(presence.watcher_count(), 0);
        assert_eq!(sink.names().len(), 2);
    }

    #[test]
    fn test_message_does_not_auto_join() {
        let (router, _presence, membership, _sink) = setup();
        router.dispatch(&message("a", Some("streamer_fan")));

        assert_eq!(membership.state("streamer_fan"), None);
        assert_eq!(membership.count_by_state(ChannelState::Joining), 0);
    }

    #[test]
    fn test_other_events_only_log() {
        let (router, presence, membership, sink) = setup();
        membership.mark_joined("a");
        router.dispatch(&ChatNetworkEvent::Subscription {
            channel: "a".into(),
            username: "u1".into(),
            method: SubMethod::default(),
            message: None,
            user_state: Tags::new(),
        });
        router.dispatch(&ChatNetworkEvent::Raid {
            channel: "a".into(),
            username: "raider".into(),
            viewer_count: 42,
        });

        assert_eq!(presence.watcher_count(), 0);
        assert_eq!(membership.state("a"), Some(ChannelState::Joined));
        assert_eq!(sink.names(), vec!["subscription", "raid"]);
        assert_eq!(sink.records()[1].2["meta"]["viewers"], 42);
    }

    #[tokio::test]
    async fn test_run_reports_stream_end() {
        let (router, presence, _membership, _sink) = setup();
        let (tx, rx) = mpsc::channel(8);
        tx.send(message("a", Some("u1"))).await.unwrap();
        drop(tx);

        let ended = router.run(rx, CancellationToken::new()).await;
        assert!(ended);
        assert_eq!(presence.watcher_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (router, _presence, _membership, _sink) = setup();
        let (_tx, rx) = mpsc::channel::<ChatNetworkEvent>(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!router.run(rx, cancel).await);
    }
}
