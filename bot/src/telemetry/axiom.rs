use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, warn};

use crate::config::{AxiomSection, LoggingSection};
use crate::engine::capabilities::LogSink;
use crate::error::IngestError;

use super::{level_name, trace_record};

/// Records buffered ahead of the shipper; beyond this, new records are dropped.
const QUEUE_CAPACITY: usize = 10_000;
/// Records per ingest request.
const MAX_BATCH: usize = 1000;
const SHIP_INTERVAL: Duration = Duration::from_secs(1);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

enum SinkCommand {
    Record(Value),
    Flush(oneshot::Sender<()>),
}

/// Ships records to an Axiom dataset in batches, mirroring each to `tracing`.
/// Delivery is best effort: a full queue or a failed request loses records.
pub struct AxiomSink {
    tx: mpsc::Sender<SinkCommand>,
    service: String,
    commit: Option<String>,
}

impl AxiomSink {
    /// Start the background shipper. Must be called inside a Tokio runtime.
    pub fn spawn(settings: &AxiomSection, token: String, logging: &LoggingSection) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let shipper = Shipper {
            http: reqwest::Client::new(),
            ingest_url: format!(
                "{}/v1/datasets/{}/ingest",
                settings.url.trim_end_matches('/'),
                settings.dataset
            ),
            token,
        };
        tokio::spawn(shipper.run(rx));

        Self {
            tx,
            service: logging.service.clone(),
            commit: logging.commit.clone(),
        }
    }

    fn build_record(&self, level: Level, event: &str, payload: Value) -> Value {
        build_record(&self.service, self.commit.as_deref(), level, event, payload)
    }
}

#[async_trait]
impl LogSink for AxiomSink {
    fn emit(&self, level: Level, event: &str, payload: Value) {
        trace_record(level, event, &payload);
        let record = self.build_record(level, event, payload);
        if self.tx.try_send(SinkCommand::Record(record)).is_err() {
            debug!(%event, "log queue full, record dropped");
        }
    }

    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SinkCommand::Flush(ack)).await.is_ok() {
            let _ = tokio::time::timeout(FLUSH_TIMEOUT, done).await;
        }
    }
}

/// Flat record: envelope fields plus the payload's own fields.
fn build_record(
    service: &str,
    commit: Option<&str>,
    level: Level,
    event: &str,
    payload: Value,
) -> Value {
    let mut record = Map::new();
    record.insert("_time".into(), Value::String(Utc::now().to_rfc3339()));
    record.insert("level".into(), Value::String(level_name(level).into()));
    record.insert("message".into(), Value::String(event.into()));
    record.insert("service".into(), Value::String(service.into()));
    if let Some(commit) = commit {
        record.insert("commit".into(), Value::String(commit.into()));
    }

    match payload {
        Value::Object(fields) => {
            for (k, v) in fields {
                record.entry(k).or_insert(v);
            }
        }
        Value::Null => {}
        other => {
            record.insert("data".into(), other);
        }
    }
    Value::Object(record)
}

struct Shipper {
    http: reqwest::Client,
    ingest_url: String,
    token: String,
}

impl Shipper {
    async fn run(self, mut rx: mpsc::Receiver<SinkCommand>) {
        let mut batch = Vec::new();
        let mut ticker = tokio::time::interval(SHIP_INTERVAL);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(SinkCommand::Record(record)) => {
                        batch.push(record);
                        if batch.len() >= MAX_BATCH {
                            self.ship(&mut batch).await;
                        }
                    }
                    Some(SinkCommand::Flush(ack)) => {
                        self.ship(&mut batch).await;
                        let _ = ack.send(());
                    }
                    None => {
                        self.ship(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.ship(&mut batch).await,
            }
        }
    }

    async fn ship(&self, batch: &mut Vec<Value>) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::take(batch);
        if let Err(e) = self.post(&records).await {
            warn!(error = %e, dropped = records.len(), "log ingest failed");
        }
    }

    async fn post(&self, records: &[Value]) -> Result<(), IngestError> {
        let resp = self
            .http
            .post(&self.ingest_url)
            .bearer_auth(&self.token)
            .json(records)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_flattens_payload() {
        let record = build_record(
            "app",
            Some("abc123"),
            Level::INFO,
            "message",
            json!({ "meta": { "channel": "a" } }),
        );

        assert_eq!(record["message"], "message");
        assert_eq!(record["level"], "info");
        assert_eq!(record["service"], "app");
        assert_eq!(record["commit"], "abc123");
        assert_eq!(record["meta"]["channel"], "a");
        assert!(record["_time"].is_string());
    }

    #[test]
    fn test_payload_cannot_override_envelope() {
        let record = build_record(
            "app",
            None,
            Level::ERROR,
            "failed joining channel",
            json!({ "message": "spoofed", "channel": "a" }),
        );
        assert_eq!(record["message"], "failed joining channel");
        assert_eq!(record["level"], "error");
        assert_eq!(record["channel"], "a");
        assert!(record.get("commit").is_none());
    }

    #[test]
    fn test_non_object_payload_kept_under_data() {
        let record = build_record("app", None, Level::WARN, "x", json!([1, 2]));
        assert_eq!(record["data"], json!([1, 2]));
        let empty = build_record("app", None, Level::WARN, "x", Value::Null);
        assert!(empty.get("data").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_never_surfaces() {
        let settings = AxiomSection {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        };
        let sink = AxiomSink::spawn(&settings, "token".into(), &LoggingSection::default());

        sink.emit(Level::INFO, "stats", json!({ "joined": 1 }));
        sink.emit(Level::ERROR, "Application crashed", json!({ "error": "boom" }));
        sink.flush().await;
    }
}
