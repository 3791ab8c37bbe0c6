//! Bounded metric window and point-in-time snapshots
//!
//! The window is a FIFO of the most recent call records. Many call threads
//! append concurrently; one reader at a time takes an aggregate snapshot.
//! On overflow the oldest record is dropped silently.

use crate::models::CallRecord;
use anyhow::{anyhow, Result};
use chrono::Timelike;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO of recent call records
pub struct MetricWindow {
    records: Mutex<VecDeque<CallRecord>>,
    capacity: usize,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    /// Append a record, evicting the oldest on overflow.
    ///
    /// Never fails; a poisoned lock is recovered since the queue holds plain
    /// values that cannot be left in a torn state.
    pub fn record(&self, record: CallRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Take an immutable aggregate view over a point-in-time copy of the
    /// window. The copy is taken under the lock; aggregation happens after
    /// the lock is released so writers are blocked for one pass at most.
    pub fn snapshot(&self) -> Result<MetricSnapshot> {
        let copied: Vec<CallRecord> = {
            let records = self
                .records
                .lock()
                .map_err(|e| anyhow!("metric window lock poisoned: {e}"))?;
            records.iter().cloned().collect()
        };
        Ok(MetricSnapshot::compute(&copied, current_time_of_day()))
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only aggregates over one point-in-time copy of the window.
///
/// All scalars are pure functions of the copied records; an empty window
/// yields zeros rather than undefined values.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    /// 95th percentile latency in milliseconds, 0 if empty
    pub p95_latency_ms: f64,
    /// Failures over total, 0 if empty
    pub error_rate: f64,
    pub success_rate: f64,
    /// Mean in-flight calls, 0 if empty
    pub concurrency: f64,
    /// Mean one-minute load average, 0 if empty
    pub system_load: f64,
    /// Current hour divided by 24, re-evaluated per snapshot
    pub time_of_day: f64,
    /// Number of records aggregated
    pub samples: usize,
}

impl MetricSnapshot {
    pub(crate) fn compute(records: &[CallRecord], time_of_day: f64) -> Self {
        if records.is_empty() {
            return Self {
                p95_latency_ms: 0.0,
                error_rate: 0.0,
                success_rate: 1.0,
                concurrency: 0.0,
                system_load: 0.0,
                time_of_day,
                samples: 0,
            };
        }

        let n = records.len();
        let failures = records.iter().filter(|r| !r.success).count();
        let error_rate = failures as f64 / n as f64;
        let concurrency =
            records.iter().map(|r| r.in_flight as f64).sum::<f64>() / n as f64;
        let system_load = records.iter().map(|r| r.system_load).sum::<f64>() / n as f64;

        Self {
            p95_latency_ms: p95_latency_ms(records),
            error_rate,
            success_rate: 1.0 - error_rate,
            concurrency,
            system_load,
            time_of_day,
            samples: n,
        }
    }

    /// The fallback view substituted when snapshot computation fails
    pub fn empty() -> Self {
        Self::compute(&[], current_time_of_day())
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

/// Tie-break rule: the ceil(0.95 * N)-th order statistic
fn p95_latency_ms(records: &[CallRecord]) -> f64 {
    let mut latencies: Vec<u64> = records.iter().map(|r| r.latency_us).collect();
    latencies.sort_unstable();
    let rank = (0.95 * latencies.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(latencies.len() - 1);
    latencies[index] as f64 / 1_000.0
}

fn current_time_of_day() -> f64 {
    chrono::Local::now().hour() as f64 / 24.0
}
