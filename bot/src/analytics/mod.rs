pub mod axiom;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::engine::capabilities::AnalyticsBackend;
use crate::error::QueryError;

/// Used when no analytics token is configured: every phase finds nothing,
/// so the bot stays in its bootstrap channels.
#[derive(Debug, Default)]
pub struct DisabledAnalytics;

#[async_trait]
impl AnalyticsBackend for DisabledAnalytics {
    async fn query_top_channels(
        &self,
        _excluding: &BTreeSet<String>,
        _limit: usize,
    ) -> Result<Vec<String>, QueryError> {
        Ok(Vec::new())
    }
}
