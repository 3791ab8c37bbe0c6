//! Adaptive configuration management
//!
//! Packages the predictor's knobs into a full breaker configuration and
//! decides whether a proposed change is significant enough to apply. The
//! significance gate is what keeps small oscillations in the learned knobs
//! from thrashing the breaker.

use crate::models::{BreakerConfig, BreakerKnobs};
use std::time::Duration;
use tracing::debug;

/// Denominator floor for relative change of near-zero knobs
const RELATIVE_EPSILON: f64 = 1e-9;

/// Builds candidate configurations and gates their application
#[derive(Debug, Clone)]
pub struct AdaptiveConfigManager {
    significant_change: f64,
    wait_absolute_trigger: Duration,
    min_calls: u32,
    half_open_calls: u32,
}

impl AdaptiveConfigManager {
    pub fn new(significant_change: f64, min_calls: u32, half_open_calls: u32) -> Self {
        Self {
            significant_change,
            wait_absolute_trigger: Duration::from_secs(1),
            min_calls,
            half_open_calls,
        }
    }

    /// Package the current knobs with the fixed operational constants.
    /// Pure with respect to the knobs: calling twice with the same knobs
    /// yields equal configurations.
    pub fn updated_config(&self, knobs: BreakerKnobs) -> BreakerConfig {
        BreakerConfig {
            window_size: knobs.window_size,
            failure_rate_threshold: knobs.failure_rate_threshold,
            open_state_wait: knobs.open_state_wait,
            min_calls: self.min_calls,
            half_open_calls: self.half_open_calls,
            slow_call_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(1),
        }
    }

    /// True when any knob moved by more than the relative threshold, or the
    /// open-state cooldown moved by more than one second in absolute terms
    pub fn is_significant(&self, new: &BreakerConfig, old: &BreakerConfig) -> bool {
        let window_shift =
            relative_change(new.window_size as f64, old.window_size as f64);
        let threshold_shift =
            relative_change(new.failure_rate_threshold, old.failure_rate_threshold);
        let wait_shift = relative_change(
            new.open_state_wait.as_millis() as f64,
            old.open_state_wait.as_millis() as f64,
        );

        let wait_absolute = if new.open_state_wait >= old.open_state_wait {
            new.open_state_wait - old.open_state_wait
        } else {
            old.open_state_wait - new.open_state_wait
        };

        let significant = window_shift > self.significant_change
            || threshold_shift > self.significant_change
            || wait_shift > self.significant_change
            || wait_absolute > self.wait_absolute_trigger;

        if !significant {
            debug!(
                window_shift,
                threshold_shift, wait_shift, "configuration change below significance gate"
            );
        }
        significant
    }
}

fn relative_change(new: f64, old: f64) -> f64 {
    (new - old).abs() / old.max(RELATIVE_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AdaptiveConfigManager {
        AdaptiveConfigManager::new(0.10, 10, 5)
    }

    fn config(window: u32, threshold: f64, wait_ms: u64) -> BreakerConfig {
        BreakerConfig {
            window_size: window,
            failure_rate_threshold: threshold,
            open_state_wait: Duration::from_millis(wait_ms),
            ..BreakerConfig::default()
        }
    }

    #[test]
    fn identical_configs_are_never_significant() {
        let manager = manager();
        let current = config(100, 0.5, 30_000);
        assert!(!manager.is_significant(&current, &current));
    }

    #[test]
    fn small_shifts_stay_below_the_gate() {
        let manager = manager();
        let old = config(100, 0.5, 30_000);
        // 4% threshold shift, everything else unchanged.
        let new = config(100, 0.52, 30_000);
        assert!(!manager.is_significant(&new, &old));
    }

    #[test]
    fn large_shifts_trip_the_gate() {
        let manager = manager();
        let old = config(100, 0.5, 30_000);
        let new = config(80, 0.62, 45_000);
        assert!(manager.is_significant(&new, &old));
    }

    #[test]
    fn each_knob_alone_can_be_significant() {
        let manager = manager();
        let old = config(100, 0.5, 30_000);
        assert!(manager.is_significant(&config(80, 0.5, 30_000), &old));
        assert!(manager.is_significant(&config(100, 0.58, 30_000), &old));
        assert!(manager.is_significant(&config(100, 0.5, 40_000), &old));
    }

    #[test]
    fn wait_absolute_trigger_catches_small_relative_shifts() {
        let manager = manager();
        // 3.3% relative but more than one second absolute.
        let old = config(100, 0.5, 60_000);
        let new = config(100, 0.5, 58_000);
        assert!(manager.is_significant(&new, &old));

        // Below both the relative gate and the absolute trigger.
        let old = config(100, 0.5, 30_000);
        let new = config(100, 0.5, 30_900);
        assert!(!manager.is_significant(&new, &old));
    }

    #[test]
    fn significance_is_monotone_in_relative_change() {
        let manager = manager();
        let old = config(100, 0.5, 30_000);
        let mut previous = false;
        for window in (50..=100).rev() {
            let now = manager.is_significant(&config(window, 0.5, 30_000), &old);
            assert!(now || !previous, "significance regressed at window {window}");
            previous = now;
        }
    }

    #[test]
    fn updated_config_is_idempotent_and_carries_constants() {
        let manager = manager();
        let knobs = BreakerKnobs {
            window_size: 42,
            failure_rate_threshold: 0.35,
            open_state_wait: Duration::from_secs(12),
        };
        let first = manager.updated_config(knobs);
        let second = manager.updated_config(knobs);
        assert_eq!(first, second);
        assert_eq!(first.window_size, 42);
        assert_eq!(first.min_calls, 10);
        assert_eq!(first.half_open_calls, 5);
        assert!((first.slow_call_rate_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(first.slow_call_duration, Duration::from_secs(1));
    }
}
