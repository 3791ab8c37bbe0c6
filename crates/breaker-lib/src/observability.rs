//! Observability for the adaptive breaker
//!
//! Prometheus gauges for prediction quality and the current knob values,
//! plus the performance monitor that tracks prediction-versus-actual error
//! and the effectiveness of applied parameter changes.

use crate::metrics::MetricSnapshot;
use crate::models::BreakerConfig;
use prometheus::{register_gauge, register_int_gauge, Gauge, IntGauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::info;

/// Prediction error below which a prediction counts as accurate
const ACCURATE_PREDICTION_THRESHOLD: f64 = 0.25;

/// Log accuracy statistics every this many predictions
const ACCURACY_LOG_INTERVAL: u64 = 100;

/// Global gauges, registered once per process
static GLOBAL_METRICS: OnceLock<MlMetricsInner> = OnceLock::new();

struct MlMetricsInner {
    prediction_accuracy_percent: Gauge,
    prediction_error_avg: Gauge,
    prediction_error_last: Gauge,
    prediction_actual: Gauge,
    prediction_forecast: Gauge,
    feature_latency: Gauge,
    feature_error_rate: Gauge,
    feature_concurrency: Gauge,
    feature_system_load: Gauge,
    config_window_size: IntGauge,
    config_threshold: Gauge,
    config_wait_duration: IntGauge,
    config_effectiveness: Gauge,
}

impl MlMetricsInner {
    fn new() -> Self {
        Self {
            prediction_accuracy_percent: register_gauge!(
                "ml_prediction_accuracy_percent",
                "Share of predictions within the accuracy threshold"
            )
            .expect("failed to register ml_prediction_accuracy_percent"),
            prediction_error_avg: register_gauge!(
                "ml_prediction_error_avg",
                "Running average absolute prediction error"
            )
            .expect("failed to register ml_prediction_error_avg"),
            prediction_error_last: register_gauge!(
                "ml_prediction_error_last",
                "Absolute error of the latest prediction"
            )
            .expect("failed to register ml_prediction_error_last"),
            prediction_actual: register_gauge!(
                "ml_prediction_actual",
                "Latest observed call outcome, 1 on success"
            )
            .expect("failed to register ml_prediction_actual"),
            prediction_forecast: register_gauge!(
                "ml_prediction_forecast",
                "Latest predicted probability of success"
            )
            .expect("failed to register ml_prediction_forecast"),
            feature_latency: register_gauge!(
                "ml_feature_latency",
                "p95 latency fed to the model, in milliseconds"
            )
            .expect("failed to register ml_feature_latency"),
            feature_error_rate: register_gauge!(
                "ml_feature_error_rate",
                "Error rate fed to the model"
            )
            .expect("failed to register ml_feature_error_rate"),
            feature_concurrency: register_gauge!(
                "ml_feature_concurrency",
                "Mean concurrent calls fed to the model"
            )
            .expect("failed to register ml_feature_concurrency"),
            feature_system_load: register_gauge!(
                "ml_feature_system_load",
                "Mean system load fed to the model"
            )
            .expect("failed to register ml_feature_system_load"),
            config_window_size: register_int_gauge!(
                "ml_config_window_size",
                "Current sliding window size knob"
            )
            .expect("failed to register ml_config_window_size"),
            config_threshold: register_gauge!(
                "ml_config_threshold",
                "Current failure rate threshold knob"
            )
            .expect("failed to register ml_config_threshold"),
            config_wait_duration: register_int_gauge!(
                "ml_config_wait_duration",
                "Current open-state wait knob in seconds"
            )
            .expect("failed to register ml_config_wait_duration"),
            config_effectiveness: register_gauge!(
                "ml_config_effectiveness",
                "Error rate delta since the last parameter change, negative is good"
            )
            .expect("failed to register ml_config_effectiveness"),
        }
    }
}

/// Lightweight cloneable handle to the global gauges
#[derive(Clone)]
pub struct MlMetrics {
    _private: (),
}

impl MlMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MlMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MlMetricsInner {
        GLOBAL_METRICS.get().expect("metrics not initialized")
    }
}

impl Default for MlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MonitorInner {
    average_error: f64,
    before_change_error_rate: f64,
    after_change_error_rate: f64,
    last_config: Option<BreakerConfig>,
}

/// Records prediction accuracy and parameter-change effectiveness
pub struct PerformanceMonitor {
    metrics: MlMetrics,
    total_predictions: AtomicU64,
    accurate_predictions: AtomicU64,
    inner: Mutex<MonitorInner>,
}

impl PerformanceMonitor {
    pub fn new(metrics: MlMetrics) -> Self {
        Self {
            metrics,
            total_predictions: AtomicU64::new(0),
            accurate_predictions: AtomicU64::new(0),
            inner: Mutex::new(MonitorInner {
                average_error: 0.0,
                before_change_error_rate: 0.0,
                after_change_error_rate: 0.0,
                last_config: None,
            }),
        }
    }

    /// Compare a prediction against the observed outcome
    pub fn record_prediction_accuracy(&self, actual: bool, predicted: f64) {
        let actual_value = if actual { 1.0 } else { 0.0 };
        let error = (actual_value - predicted).abs();

        let average = {
            let mut inner = self.lock_inner();
            let total = self.total_predictions.load(Ordering::Acquire);
            inner.average_error =
                (inner.average_error * total as f64 + error) / (total + 1) as f64;
            inner.average_error
        };

        if error < ACCURATE_PREDICTION_THRESHOLD {
            self.accurate_predictions.fetch_add(1, Ordering::AcqRel);
        }
        let total = self.total_predictions.fetch_add(1, Ordering::AcqRel) + 1;
        let accurate = self.accurate_predictions.load(Ordering::Acquire);
        let accuracy_percent = accurate as f64 / total as f64 * 100.0;

        let gauges = self.metrics.inner();
        gauges.prediction_error_last.set(error);
        gauges.prediction_actual.set(actual_value);
        gauges.prediction_forecast.set(predicted);
        gauges.prediction_error_avg.set(average);
        gauges.prediction_accuracy_percent.set(accuracy_percent);

        if total % ACCURACY_LOG_INTERVAL == 0 {
            info!(
                accuracy_percent,
                accurate,
                total,
                average_error = average,
                "prediction accuracy checkpoint"
            );
        }
    }

    /// Export the model's view of the current snapshot and track the error
    /// rate for effectiveness accounting
    pub fn record_model_metrics(&self, snapshot: &MetricSnapshot) {
        let gauges = self.metrics.inner();
        gauges.feature_latency.set(snapshot.p95_latency_ms);
        gauges.feature_error_rate.set(snapshot.error_rate);
        gauges.feature_concurrency.set(snapshot.concurrency);
        gauges.feature_system_load.set(snapshot.system_load);

        let effectiveness = {
            let mut inner = self.lock_inner();
            inner.after_change_error_rate = snapshot.error_rate;
            inner.after_change_error_rate - inner.before_change_error_rate
        };
        gauges.config_effectiveness.set(effectiveness);
    }

    /// Note an applied parameter change and the error rate at change time
    pub fn record_parameter_change(&self, config: &BreakerConfig, current_error_rate: f64) {
        {
            let mut inner = self.lock_inner();
            inner.before_change_error_rate = current_error_rate;
            inner.last_config = Some(config.clone());
        }

        let gauges = self.metrics.inner();
        gauges.config_window_size.set(config.window_size as i64);
        gauges.config_threshold.set(config.failure_rate_threshold);
        gauges
            .config_wait_duration
            .set(config.open_state_wait.as_secs() as i64);

        info!(
            window_size = config.window_size,
            failure_rate_threshold = config.failure_rate_threshold,
            wait_secs = config.open_state_wait.as_secs(),
            error_rate = current_error_rate,
            "breaker parameters changed"
        );
    }

    /// Error rate delta since the last applied change; negative is good
    pub fn effectiveness(&self) -> f64 {
        let inner = self.lock_inner();
        inner.after_change_error_rate - inner.before_change_error_rate
    }

    pub fn total_predictions(&self) -> u64 {
        self.total_predictions.load(Ordering::Acquire)
    }

    pub fn accuracy_percent(&self) -> f64 {
        let total = self.total_predictions.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        self.accurate_predictions.load(Ordering::Acquire) as f64 / total as f64 * 100.0
    }

    pub fn average_error(&self) -> f64 {
        self.lock_inner().average_error
    }

    /// Periodic human-readable summary of accuracy, drift and effectiveness
    pub fn log_report(&self) {
        let total = self.total_predictions.load(Ordering::Acquire);
        if total == 0 {
            info!("no prediction data available yet for performance report");
            return;
        }

        let effectiveness = self.effectiveness();
        let verdict = if effectiveness < 0.0 {
            "improving"
        } else if effectiveness > 0.05 {
            "degrading"
        } else {
            "neutral"
        };

        let inner = self.lock_inner();
        let (window, threshold, wait_secs) = inner
            .last_config
            .as_ref()
            .map(|c| {
                (
                    c.window_size,
                    c.failure_rate_threshold,
                    c.open_state_wait.as_secs(),
                )
            })
            .unwrap_or((0, 0.0, 0));

        info!(
            accuracy_percent = self.accuracy_percent(),
            total_predictions = total,
            average_error = inner.average_error,
            window_size = window,
            failure_rate_threshold = threshold,
            wait_secs,
            effectiveness,
            verdict,
            "ml breaker performance report"
        );
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MlMetrics::new())
    }

    fn snapshot(error_rate: f64) -> MetricSnapshot {
        MetricSnapshot {
            p95_latency_ms: 120.0,
            error_rate,
            success_rate: 1.0 - error_rate,
            concurrency: 2.0,
            system_load: 1.0,
            time_of_day: 0.5,
            samples: 10,
        }
    }

    #[test]
    fn accuracy_counts_predictions_within_threshold() {
        let monitor = monitor();
        // Error 0.1, accurate.
        monitor.record_prediction_accuracy(true, 0.9);
        // Error 0.8, inaccurate.
        monitor.record_prediction_accuracy(true, 0.2);
        assert_eq!(monitor.total_predictions(), 2);
        assert!((monitor.accuracy_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn average_error_is_a_running_mean() {
        let monitor = monitor();
        monitor.record_prediction_accuracy(true, 1.0);
        monitor.record_prediction_accuracy(false, 1.0);
        // Errors 0.0 and 1.0 average to 0.5.
        assert!((monitor.average_error() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn effectiveness_is_error_rate_delta_around_a_change() {
        let monitor = monitor();
        let config = BreakerConfig {
            open_state_wait: Duration::from_secs(20),
            ..BreakerConfig::default()
        };
        monitor.record_parameter_change(&config, 0.4);
        monitor.record_model_metrics(&snapshot(0.1));
        // Error rate dropped from 0.4 to 0.1 after the change.
        assert!((monitor.effectiveness() + 0.3).abs() < 1e-9);
    }

    #[test]
    fn report_handles_both_empty_and_populated_state() {
        let monitor = monitor();
        monitor.log_report();
        monitor.record_prediction_accuracy(true, 0.8);
        monitor.record_parameter_change(&BreakerConfig::default(), 0.2);
        monitor.log_report();
    }
}
