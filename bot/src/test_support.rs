//! In-process fakes for the engine's collaborators.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Level;

use crate::engine::capabilities::{AnalyticsBackend, ChatNetwork, LogSink};
use crate::engine::events::ChatNetworkEvent;
use crate::error::{ConnectionError, JoinError, QueryError};

/// Chat network double. Successful joins are confirmed with a self-join event
/// on the stream returned by `connect`, like the real network does.
pub struct FakeChat {
    nick: String,
    fail_on: Vec<String>,
    refuse_connect: bool,
    joins: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Sender<ChatNetworkEvent>>>,
}

impl FakeChat {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            fail_on: Vec::new(),
            refuse_connect: false,
            joins: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        }
    }

    pub fn failing_on(mut self, channel: &str) -> Self {
        self.fail_on.push(channel.to_string());
        self
    }

    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Channels passed to `join`, in call order.
    pub fn joined(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    /// Inject an inbound event.
    pub fn push(&self, event: ChatNetworkEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.try_send(event);
        }
    }

    /// Drop the stream, as a lost connection would.
    pub fn disconnect(&self) {
        self.events.lock().unwrap().take();
    }
}

#[async_trait]
impl ChatNetwork for FakeChat {
    async fn connect(&self) -> Result<mpsc::Receiver<ChatNetworkEvent>, ConnectionError> {
        if self.refuse_connect {
            return Err(ConnectionError::Authentication(
                "Login authentication failed".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(1024);
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn join(&self, channel: &str) -> Result<(), JoinError> {
        self.joins.lock().unwrap().push(channel.to_string());
        if self.fail_on.iter().any(|c| c == channel) {
            return Err(JoinError::Rejected {
                notice_id: "msg_channel_suspended".into(),
                text: "This channel has been suspended.".into(),
            });
        }
        self.push(ChatNetworkEvent::Join {
            channel: channel.to_string(),
            username: self.nick.clone(),
            is_self: true,
        });
        Ok(())
    }
}

/// Analytics double answering from a script; records every call.
/// Once the script runs out, every query returns no channels.
pub struct ScriptedAnalytics {
    script: Mutex<VecDeque<Result<Vec<String>, QueryError>>>,
    always_fail: bool,
    calls: Mutex<Vec<(BTreeSet<String>, usize)>>,
}

impl ScriptedAnalytics {
    pub fn new(script: Vec<Result<Vec<String>, QueryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            always_fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// `(excluding, limit)` for each query, in order.
    pub fn calls(&self) -> Vec<(BTreeSet<String>, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsBackend for ScriptedAnalytics {
    async fn query_top_channels(
        &self,
        excluding: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<String>, QueryError> {
        self.calls.lock().unwrap().push((excluding.clone(), limit));
        if self.always_fail {
            return Err(QueryError::Malformed("backend unreachable".into()));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Log sink that keeps every record for inspection.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(Level, String, Value)>>,
    flushed: AtomicBool,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<(Level, String, Value)> {
        self.records.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, name, _)| name).collect()
    }

    pub fn flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    fn emit(&self, level: Level, event: &str, payload: Value) {
        self.records
            .lock()
            .unwrap()
            .push((level, event.to_string(), payload));
    }

    async fn flush(&self) {
        self.flushed.store(true, Ordering::SeqCst);
    }
}
