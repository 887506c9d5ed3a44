//! Run metric persistence and fan-out.
//!
//! The run loops hand each interval's reward delta to a [`MetricSink`]; the
//! sink owns the cumulative series so restarts and concurrent writers can
//! never double-count. The in-memory sink keeps a bounded tail per run and
//! re-broadcasts stored records to any number of subscribers.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::env::sharpe_ratio;
use crate::error::Result;

const DEFAULT_HISTORY_LIMIT: usize = 1_000;
const BROADCAST_CAPACITY: usize = 256;

/// One recorded training/live metric sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub run_id: Uuid,
    pub step: u64,
    /// Reward accumulated since the previous record
    pub reward_delta: f64,
    /// Filled by the sink: previous cumulative + `reward_delta`
    pub cumulative_reward: f64,
    pub nav: f64,
    pub rolling_sharpe: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(
        run_id: Uuid,
        step: u64,
        reward_delta: f64,
        nav: f64,
        rolling_sharpe: Option<f64>,
    ) -> Self {
        Self {
            run_id,
            step,
            reward_delta,
            cumulative_reward: 0.0,
            nav,
            rolling_sharpe,
            recorded_at: Utc::now(),
        }
    }
}

/// Sharpe over a trailing return window; None until two samples exist
pub fn rolling_sharpe(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    Some(sharpe_ratio(returns, 0.0))
}

/// Destination for run metrics
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Persist one record. The sink fills `cumulative_reward` and returns
    /// the record as stored.
    async fn record_metric(&self, record: MetricRecord) -> Result<MetricRecord>;

    async fn latest(&self, run_id: Uuid) -> Result<Option<MetricRecord>>;

    /// Fire-and-forget fan-out of an already-stored record
    fn publish_update(&self, channel: &str, payload: serde_json::Value);
}

/// Metric sink backed by per-run ring histories and a broadcast channel
pub struct InMemoryMetricSink {
    history: RwLock<HashMap<Uuid, VecDeque<MetricRecord>>>,
    history_limit: usize,
    updates: broadcast::Sender<(String, serde_json::Value)>,
}

impl InMemoryMetricSink {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            history: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, serde_json::Value)> {
        self.updates.subscribe()
    }

    pub async fn history(&self, run_id: Uuid) -> Vec<MetricRecord> {
        self.history
            .read()
            .await
            .get(&run_id)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryMetricSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSink for InMemoryMetricSink {
    async fn record_metric(&self, mut record: MetricRecord) -> Result<MetricRecord> {
        let mut history = self.history.write().await;
        let records = history.entry(record.run_id).or_default();
        let previous = records.back().map(|r| r.cumulative_reward).unwrap_or(0.0);
        record.cumulative_reward = previous + record.reward_delta;
        records.push_back(record.clone());
        while records.len() > self.history_limit {
            records.pop_front();
        }
        Ok(record)
    }

    async fn latest(&self, run_id: Uuid) -> Result<Option<MetricRecord>> {
        Ok(self
            .history
            .read()
            .await
            .get(&run_id)
            .and_then(|records| records.back().cloned()))
    }

    fn publish_update(&self, channel: &str, payload: serde_json::Value) {
        // No subscribers is the normal case; drop the error
        let _ = self.updates.send((channel.to_string(), payload));
    }
}
