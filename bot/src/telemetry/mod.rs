pub mod axiom;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Level;

use crate::engine::capabilities::LogSink;

/// Writes records to the process's `tracing` subscriber only.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl LogSink for TracingSink {
    fn emit(&self, level: Level, event: &str, payload: Value) {
        trace_record(level, event, &payload);
    }
}

/// Forward one record to `tracing` at its own level.
pub fn trace_record(level: Level, event: &str, payload: &Value) {
    match level {
        Level::ERROR => tracing::error!(target: "chatwatch::record", %payload, "{event}"),
        Level::WARN => tracing::warn!(target: "chatwatch::record", %payload, "{event}"),
        Level::INFO => tracing::info!(target: "chatwatch::record", %payload, "{event}"),
        Level::DEBUG => tracing::debug!(target: "chatwatch::record", %payload, "{event}"),
        _ => tracing::trace!(target: "chatwatch::record", %payload, "{event}"),
    }
}

/// Lowercase level name as stored in remote records.
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        _ => "trace",
    }
}
