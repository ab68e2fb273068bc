//! Collaborators the engine drives but does not implement: the chat network,
//! the analytics backend and the structured logging sink.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Level;

use crate::error::{ConnectionError, JoinError, QueryError};

use super::events::ChatNetworkEvent;

/// Chat-network transport.
#[async_trait]
pub trait ChatNetwork: Send + Sync {
    /// Establish the connection and return the inbound event stream.
    /// The stream ends when the connection is lost.
    async fn connect(&self) -> Result<mpsc::Receiver<ChatNetworkEvent>, ConnectionError>;

    /// Join a channel, resolving once the network confirms or refuses.
    async fn join(&self, channel: &str) -> Result<(), JoinError>;
}

/// Source of candidate channels ranked by recent engagement.
#[async_trait]
pub trait AnalyticsBackend: Send + Sync {
    /// At most `limit` channel names, none of which are in `excluding`.
    async fn query_top_channels(
        &self,
        excluding: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<String>, QueryError>;
}

/// Structured, fire-and-forget log record sink.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Never blocks on I/O and never reports failure.
    fn emit(&self, level: Level, event: &str, payload: Value);

    /// Best-effort delivery of anything still buffered.
    async fn flush(&self) {}
}
