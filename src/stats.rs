//! Windowed activity statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::storage::{Dimension, LogFilter, StorageBackend};

pub const DEFAULT_STATS_WINDOW: i64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResult {
    pub window: i64,
    pub since: i64,
    pub total: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_module: BTreeMap<String, u64>,
    pub by_action: BTreeMap<String, u64>,
    pub by_user: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct StatsAggregator {
    backend: Arc<dyn StorageBackend>,
}

impl StatsAggregator {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn compute(&self, window_seconds: i64) -> LedgerResult<StatsResult> {
        self.compute_at(window_seconds, chrono::Utc::now().timestamp())
            .await
    }

    /// Counts entries with `timestamp > now - window_seconds`.
    pub async fn compute_at(&self, window_seconds: i64, now: i64) -> LedgerResult<StatsResult> {
        if window_seconds <= 0 {
            return Err(LedgerError::Validation(
                "window must be a positive number of seconds".to_string(),
            ));
        }
        let since = now - window_seconds;

        Ok(StatsResult {
            window: window_seconds,
            since,
            total: self.backend.count_entries(&LogFilter::since(since + 1)).await?,
            by_severity: self.backend.group_counts(Dimension::Severity, since).await?,
            by_module: self.backend.group_counts(Dimension::Module, since).await?,
            by_action: self.backend.group_counts(Dimension::Action, since).await?,
            by_user: self.backend.group_counts(Dimension::User, since).await?,
        })
    }
}
