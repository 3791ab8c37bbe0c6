//! Feature engineering over metric snapshots
//!
//! Turns a snapshot plus a short trend history into a fixed-width feature
//! vector: normalized basics, trends, a stability score, pairwise
//! interactions, time-of-day indicators and a decayed failure signal.
//! Also keeps a bounded memory of (features, target) pairs for batch
//! learning.

use crate::metrics::MetricSnapshot;
use std::collections::VecDeque;

pub const IDX_LATENCY: usize = 0;
pub const IDX_ERROR_RATE: usize = 1;
pub const IDX_CONCURRENCY: usize = 2;
pub const IDX_SYSTEM_LOAD: usize = 3;
pub const IDX_TIME_OF_DAY: usize = 4;
pub const IDX_ERROR_TREND: usize = 5;
pub const IDX_LATENCY_TREND: usize = 6;
pub const IDX_STABILITY_SCORE: usize = 7;
pub const IDX_LATENCY_ERROR_PRODUCT: usize = 8;
pub const IDX_LATENCY_SQUARED: usize = 9;
pub const IDX_CONCURRENCY_ERROR_PRODUCT: usize = 10;
pub const IDX_LOAD_LATENCY_PRODUCT: usize = 11;
pub const IDX_BUSINESS_HOURS: usize = 12;
pub const IDX_NIGHTTIME: usize = 13;
pub const IDX_RECENT_FAILURES: usize = 14;

/// Width of the engineered feature vector
pub const FEATURE_COUNT: usize = 15;

/// Snapshots retained for trend computation
const TREND_WINDOW: usize = 10;

/// Maximum stored (features, target) pairs
const TRAINING_MEMORY: usize = 100;

/// Stability score component weights
const ERROR_WEIGHT: f64 = 0.5;
const LATENCY_WEIGHT: f64 = 0.3;
const LOAD_WEIGHT: f64 = 0.2;

/// Exponential decay applied per step toward older snapshots
const ERROR_TREND_DECAY: f64 = 0.8;
const FAILURE_RECENCY_DECAY: f64 = 0.7;

/// Feature extractor with trend history and training memory
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    recent: VecDeque<MetricSnapshot>,
    memory: VecDeque<(Vec<f64>, f64)>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(TREND_WINDOW),
            memory: VecDeque::with_capacity(TRAINING_MEMORY),
        }
    }

    /// Extract the 15-wide feature vector, folding the snapshot into the
    /// trend window first so trends include the current observation.
    pub fn extract(&mut self, snapshot: &MetricSnapshot) -> Vec<f64> {
        self.recent.push_back(snapshot.clone());
        if self.recent.len() > TREND_WINDOW {
            self.recent.pop_front();
        }

        let latency = snapshot.p95_latency_ms / 1_000.0;
        let error_rate = snapshot.error_rate;
        let concurrency = snapshot.concurrency / 10.0;
        let load = snapshot.system_load / 10.0;
        let time_of_day = snapshot.time_of_day;

        let error_trend = self.error_rate_trend();
        let latency_trend = self.latency_trend();
        let stability = self.stability_score(snapshot);

        vec![
            latency,
            error_rate,
            concurrency,
            load,
            time_of_day,
            error_trend,
            latency_trend,
            stability,
            latency * error_rate,
            latency * latency,
            concurrency * error_rate,
            load * latency,
            if is_business_hours(time_of_day) { 1.0 } else { 0.0 },
            if is_nighttime(time_of_day) { 1.0 } else { 0.0 },
            self.recent_failure_signal(),
        ]
    }

    /// Trend in the error rate across the retained snapshots.
    /// Positive means worsening; clipped to [-1, 1].
    pub fn error_rate_trend(&self) -> f64 {
        if self.recent.len() < 2 {
            return 0.0;
        }

        let newest = self.recent.back().map(|s| s.error_rate).unwrap_or(0.0);
        let oldest = self.recent.front().map(|s| s.error_rate).unwrap_or(0.0);

        if self.recent.len() >= 3 {
            let mut weighted_sum = 0.0;
            let mut weight_sum = 0.0;
            let mut weight = 1.0;
            for snapshot in self.recent.iter().rev() {
                weighted_sum += snapshot.error_rate * weight;
                weight_sum += weight;
                weight *= ERROR_TREND_DECAY;
            }
            let weighted_mean = weighted_sum / weight_sum;
            return ((newest - weighted_mean) * 5.0).clamp(-1.0, 1.0);
        }

        ((newest - oldest) * 5.0).clamp(-1.0, 1.0)
    }

    /// Trend in p95 latency, normalized by a 500 ms reference change
    pub fn latency_trend(&self) -> f64 {
        if self.recent.len() < 2 {
            return 0.0;
        }
        let newest = self.recent.back().map(|s| s.p95_latency_ms).unwrap_or(0.0);
        let oldest = self.recent.front().map(|s| s.p95_latency_ms).unwrap_or(0.0);
        ((newest - oldest) / 500.0).clamp(-1.0, 1.0)
    }

    /// Composite stability score in [0, 1]. Higher is more stable.
    pub fn stability_score(&self, snapshot: &MetricSnapshot) -> f64 {
        let error_component = 1.0 - snapshot.error_rate;
        let latency_component = (1.0 - snapshot.p95_latency_ms / 2_000.0).max(0.0);

        // Moderate load around 0.6 of capacity scores best.
        let load_factor = snapshot.system_load / 10.0;
        let load_component = (1.0 - (0.6 - load_factor).abs() * 1.5).clamp(0.0, 1.0);

        let mut score = error_component * ERROR_WEIGHT
            + latency_component * LATENCY_WEIGHT
            + load_component * LOAD_WEIGHT;

        if let Some(variance_component) = self.variance_component() {
            score *= 0.8 + 0.2 * variance_component;
        }

        score.clamp(0.0, 1.0)
    }

    /// Exponentially decayed failure activity in [0, 1]
    fn recent_failure_signal(&self) -> f64 {
        if self.recent.len() < 2 {
            return 0.0;
        }

        let mut signal = 0.0;
        let mut weight = 1.0;
        let mut weight_sum = 0.0;
        for snapshot in self.recent.iter().rev() {
            signal += snapshot.error_rate * weight;
            weight_sum += weight;
            weight *= FAILURE_RECENCY_DECAY;
        }
        if weight_sum > 0.0 {
            signal /= weight_sum;
        }
        (signal * 2.0).min(1.0)
    }

    /// Inverted, normalized variance over the trend window.
    /// None until three snapshots are available.
    fn variance_component(&self) -> Option<f64> {
        if self.recent.len() < 3 {
            return None;
        }

        let n = self.recent.len() as f64;
        let (mut error_sum, mut error_sq, mut latency_sum, mut latency_sq) =
            (0.0, 0.0, 0.0, 0.0);
        for snapshot in &self.recent {
            let error = snapshot.error_rate;
            let latency = snapshot.p95_latency_ms / 1_000.0;
            error_sum += error;
            error_sq += error * error;
            latency_sum += latency;
            latency_sq += latency * latency;
        }

        let error_variance = error_sq / n - (error_sum / n).powi(2);
        let latency_variance = latency_sq / n - (latency_sum / n).powi(2);
        let normalized_error = (error_variance * 20.0).min(1.0);
        let normalized_latency = (latency_variance * 5.0).min(1.0);

        Some(1.0 - (normalized_error * 0.6 + normalized_latency * 0.4))
    }

    /// Store a training pair, evicting the oldest on overflow
    pub fn record_training_example(&mut self, features: Vec<f64>, target: f64) {
        self.memory.push_back((features, target));
        if self.memory.len() > TRAINING_MEMORY {
            self.memory.pop_front();
        }
    }

    /// The most recent `count` training pairs, or None if fewer are stored
    pub fn recent_batch(&self, count: usize) -> Option<(Vec<Vec<f64>>, Vec<f64>)> {
        if self.memory.len() < count {
            return None;
        }
        let skip = self.memory.len() - count;
        let mut features = Vec::with_capacity(count);
        let mut targets = Vec::with_capacity(count);
        for (example, target) in self.memory.iter().skip(skip) {
            features.push(example.clone());
            targets.push(*target);
        }
        Some((features, targets))
    }

    pub fn training_examples(&self) -> usize {
        self.memory.len()
    }
}

fn is_business_hours(time_of_day: f64) -> bool {
    (0.33..=0.75).contains(&time_of_day)
}

fn is_nighttime(time_of_day: f64) -> bool {
    time_of_day <= 0.25 || time_of_day >= 0.875
}
