//! Optional persistence collaborators
//!
//! Both collaborators are best effort: a failing sink or store is logged and
//! never affects the call path. Absent collaborators simply mean no
//! persistence and no warm start.

mod file;

pub use file::{FileMetricsSink, FileModelStore};

use crate::metrics::MetricSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One aggregate snapshot flattened for storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub breaker: String,
    pub timestamp_ms: i64,
    pub p95_latency_ms: f64,
    pub error_rate: f64,
    pub concurrency: f64,
    pub system_load: f64,
    pub samples: usize,
}

impl PersistedSnapshot {
    pub fn from_snapshot(breaker: &str, timestamp_ms: i64, snapshot: &MetricSnapshot) -> Self {
        Self {
            breaker: breaker.to_string(),
            timestamp_ms,
            p95_latency_ms: snapshot.p95_latency_ms,
            error_rate: snapshot.error_rate,
            concurrency: snapshot.concurrency,
            system_load: snapshot.system_load,
            samples: snapshot.samples,
        }
    }

    /// Reconstruct an aggregate view, deriving time of day from the stored
    /// timestamp
    pub fn to_snapshot(&self) -> MetricSnapshot {
        let time_of_day = chrono::DateTime::from_timestamp_millis(self.timestamp_ms)
            .map(|dt| dt.hour() as f64 / 24.0)
            .unwrap_or(0.0);
        MetricSnapshot {
            p95_latency_ms: self.p95_latency_ms,
            error_rate: self.error_rate,
            success_rate: 1.0 - self.error_rate,
            concurrency: self.concurrency,
            system_load: self.system_load,
            time_of_day,
            samples: self.samples,
        }
    }
}

/// One-way metric sink with a best-effort warm-start source
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Buffer one snapshot. Called at most once per decision tick and must
    /// not block the call path.
    async fn store(&self, snapshot: PersistedSnapshot) -> Result<()>;

    /// Snapshots recorded for this breaker within the lookback period
    async fn load_historical(
        &self,
        breaker: &str,
        lookback: Duration,
    ) -> Result<Vec<PersistedSnapshot>>;

    /// Push buffered snapshots to the backing store
    async fn flush(&self) -> Result<()>;

    /// Final flush on shutdown
    async fn shutdown(&self) -> Result<()>;
}

/// Opaque model blob storage keyed by service name
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save(&self, model: &[u8], service: &str) -> Result<()>;

    async fn load(&self, service: &str) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip_preserves_aggregates() {
        let snapshot = MetricSnapshot {
            p95_latency_ms: 321.0,
            error_rate: 0.25,
            success_rate: 0.75,
            concurrency: 5.0,
            system_load: 1.25,
            time_of_day: 0.5,
            samples: 200,
        };
        let persisted = PersistedSnapshot::from_snapshot("checkout", 1_700_000_000_000, &snapshot);
        assert_eq!(persisted.breaker, "checkout");

        let restored = persisted.to_snapshot();
        assert_eq!(restored.p95_latency_ms, snapshot.p95_latency_ms);
        assert_eq!(restored.error_rate, snapshot.error_rate);
        assert!((restored.success_rate - 0.75).abs() < 1e-12);
        assert_eq!(restored.samples, 200);
        assert!((0.0..1.0).contains(&restored.time_of_day));
    }
}
