//! Core data models for the adaptive circuit breaker

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One observation of a protected call, immutable once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Wall-clock completion time in epoch milliseconds
    pub timestamp_ms: i64,
    /// Elapsed time measured from a monotonic clock, in microseconds
    pub latency_us: u64,
    pub success: bool,
    /// Concurrent calls in flight at completion time
    pub in_flight: u32,
    /// One-minute load average at completion time
    pub system_load: f64,
}

impl CallRecord {
    pub fn new(
        timestamp_ms: i64,
        latency: Duration,
        success: bool,
        in_flight: u32,
        system_load: f64,
    ) -> Self {
        Self {
            timestamp_ms,
            latency_us: latency.as_micros() as u64,
            success,
            in_flight,
            system_load,
        }
    }

    /// Latency in milliseconds as a float, the unit the learning stack works in
    pub fn latency_ms(&self) -> f64 {
        self.latency_us as f64 / 1_000.0
    }
}

/// The three tunable breaker parameters emitted by the threshold predictor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerKnobs {
    pub window_size: u32,
    pub failure_rate_threshold: f64,
    pub open_state_wait: Duration,
}

/// Full breaker configuration: the tunable knobs plus fixed operational
/// constants that reconfiguration never touches.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub window_size: u32,
    pub failure_rate_threshold: f64,
    pub open_state_wait: Duration,
    pub min_calls: u32,
    pub half_open_calls: u32,
    pub slow_call_rate_threshold: f64,
    pub slow_call_duration: Duration,
}

impl BreakerConfig {
    pub fn knobs(&self) -> BreakerKnobs {
        BreakerKnobs {
            window_size: self.window_size,
            failure_rate_threshold: self.failure_rate_threshold,
            open_state_wait: self.open_state_wait,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            failure_rate_threshold: 0.5,
            open_state_wait: Duration::from_secs(30),
            min_calls: 10,
            half_open_calls: 5,
            slow_call_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(1),
        }
    }
}
