use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AxiomSection;
use crate::engine::capabilities::AnalyticsBackend;
use crate::error::QueryError;
use crate::irc::translate::canonical_channel;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AplRequest<'a> {
    apl: &'a str,
    start_time: String,
    end_time: String,
}

#[derive(Deserialize)]
struct TabularResponse {
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Deserialize)]
struct Table {
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default)]
    columns: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct Field {
    name: String,
}

/// Ranks channels by distinct chatters seen in the bot's own message log.
pub struct AxiomAnalytics {
    http: reqwest::Client,
    url: String,
    token: String,
    dataset: String,
    lookback: ChronoDuration,
}

impl AxiomAnalytics {
    pub fn new(settings: &AxiomSection, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: settings.url.trim_end_matches('/').to_string(),
            token,
            dataset: settings.dataset.clone(),
            lookback: ChronoDuration::hours(settings.lookback_hours),
        }
    }

    fn query_url(&self) -> String {
        format!("{}/v1/datasets/_apl?format=tabular", self.url)
    }
}

#[async_trait]
impl AnalyticsBackend for AxiomAnalytics {
    async fn query_top_channels(
        &self,
        excluding: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<String>, QueryError> {
        let apl = build_query(&self.dataset, excluding, limit);
        debug!(%apl, "querying analytics");

        let now = Utc::now();
        let request = AplRequest {
            apl: &apl,
            start_time: (now - self.lookback).to_rfc3339(),
            end_time: now.to_rfc3339(),
        };

        let resp = self
            .http
            .post(self.query_url())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: TabularResponse = resp
            .json()
            .await
            .map_err(|e| QueryError::Malformed(e.to_string()))?;
        extract_channels(body, excluding, limit)
    }
}

/// APL for the top `limit` channels by distinct chatters, skipping `excluding`.
fn build_query(dataset: &str, excluding: &BTreeSet<String>, limit: usize) -> String {
    let mut apl = format!(
        "['{}']\n| where message == \"message\"\n| where isnotempty(['meta.tags.username'])\n",
        dataset.replace('\'', "")
    );
    if !excluding.is_empty() {
        let list = excluding
            .iter()
            .map(|c| apl_string(c))
            .collect::<Vec<_>>()
            .join(", ");
        apl.push_str(&format!("| where ['meta.channel'] !in ({list})\n"));
    }
    apl.push_str(&format!(
        "| summarize users = dcount(['meta.tags.username']) by channel = ['meta.channel']\n\
         | order by users desc\n\
         | limit {limit}"
    ));
    apl
}

fn apl_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn extract_channels(
    body: TabularResponse,
    excluding: &BTreeSet<String>,
    limit: usize,
) -> Result<Vec<String>, QueryError> {
    let Some(table) = body.tables.into_iter().next() else {
        return Ok(Vec::new());
    };
    let idx = table
        .fields
        .iter()
        .position(|f| f.name == "channel")
        .ok_or_else(|| QueryError::Malformed("no `channel` column in result".into()))?;
    let Some(column) = table.columns.into_iter().nth(idx) else {
        return Ok(Vec::new());
    };

    let mut seen = BTreeSet::new();
    let channels = column
        .iter()
        .filter_map(Value::as_str)
        .map(canonical_channel)
        .filter(|c| !c.is_empty() && !excluding.contains(c))
        .filter(|c| seen.insert(c.clone()))
        .take(limit)
        .collect();
    Ok(channels)
}
