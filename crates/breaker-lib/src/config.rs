//! Breaker settings binding
//!
//! Settings deserialize from environment variables with the `BREAKER` prefix
//! (e.g. `BREAKER_NAME`, `BREAKER_ML_ENABLED`). Every field has a default so
//! a breaker can be built with no configuration at all.

use crate::models::{BreakerConfig, BreakerKnobs};
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Configuration surface of a single breaker instance
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    /// Identity of the breaker for metrics and persistence keys
    #[serde(default = "default_name")]
    pub name: String,

    /// Whether ML updates and reconfiguration run. When false the breaker
    /// behaves as a classic breaker on its initial knobs.
    #[serde(default = "default_ml_enabled")]
    pub ml_enabled: bool,

    /// Minimum observations before a decision can open the circuit
    #[serde(default = "default_min_calls")]
    pub min_calls: u32,

    /// Permitted trial calls in the half-open state
    #[serde(default = "default_half_open_calls")]
    pub half_open_calls: u32,

    #[serde(default = "default_initial_failure_threshold")]
    pub initial_failure_threshold: f64,

    #[serde(default = "default_initial_window")]
    pub initial_window: u32,

    #[serde(default = "default_initial_wait_ms")]
    pub initial_wait_ms: u64,

    /// Minimum interval between applied configuration replacements
    #[serde(default = "default_reconfig_min_interval_ms")]
    pub reconfig_min_interval_ms: u64,

    /// Relative per-knob change below which a reconfiguration is skipped
    #[serde(default = "default_significant_change")]
    pub significant_change: f64,

    /// Batch learning frequency in ticks
    #[serde(default = "default_training_interval")]
    pub training_interval: u64,

    /// Capacity of the metric window
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Interval between performance reports from the periodic task
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_name() -> String {
    "defaultBreaker".to_string()
}

fn default_ml_enabled() -> bool {
    true
}

fn default_min_calls() -> u32 {
    10
}

fn default_half_open_calls() -> u32 {
    5
}

fn default_initial_failure_threshold() -> f64 {
    0.5
}

fn default_initial_window() -> u32 {
    100
}

fn default_initial_wait_ms() -> u64 {
    30_000
}

fn default_reconfig_min_interval_ms() -> u64 {
    60_000
}

fn default_significant_change() -> f64 {
    0.10
}

fn default_training_interval() -> u64 {
    10
}

fn default_window_capacity() -> usize {
    1_000
}

fn default_report_interval_secs() -> u64 {
    3_600
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            ml_enabled: default_ml_enabled(),
            min_calls: default_min_calls(),
            half_open_calls: default_half_open_calls(),
            initial_failure_threshold: default_initial_failure_threshold(),
            initial_window: default_initial_window(),
            initial_wait_ms: default_initial_wait_ms(),
            reconfig_min_interval_ms: default_reconfig_min_interval_ms(),
            significant_change: default_significant_change(),
            training_interval: default_training_interval(),
            window_capacity: default_window_capacity(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl BreakerSettings {
    /// Load settings from the environment, falling back to defaults
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("BREAKER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// The breaker configuration in force before any ML reconfiguration
    pub fn initial_config(&self) -> BreakerConfig {
        BreakerConfig {
            window_size: self.initial_window,
            failure_rate_threshold: self.initial_failure_threshold,
            open_state_wait: Duration::from_millis(self.initial_wait_ms),
            min_calls: self.min_calls,
            half_open_calls: self.half_open_calls,
            slow_call_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(1),
        }
    }

    pub fn initial_knobs(&self) -> BreakerKnobs {
        self.initial_config().knobs()
    }
}
