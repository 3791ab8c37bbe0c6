//! End-to-end scenarios for the adaptive breaker

use breaker_lib::persistence::{FileMetricsSink, FileModelStore};
use breaker_lib::{
    BreakerError, BreakerKnobs, BreakerSettings, CircuitState, MetricSnapshot, MlCircuitBreaker,
    ThresholdModel, TickSummary,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct BackendDown;

impl fmt::Display for BackendDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend unavailable")
    }
}

impl std::error::Error for BackendDown {}

fn classic_settings(name: &str, wait_ms: u64) -> BreakerSettings {
    BreakerSettings {
        name: name.to_string(),
        ml_enabled: false,
        initial_failure_threshold: 0.5,
        initial_wait_ms: wait_ms,
        ..BreakerSettings::default()
    }
}

async fn succeed(breaker: &MlCircuitBreaker) -> Result<u32, BreakerError<BackendDown>> {
    breaker.execute(|| async { Ok(1u32) }).await
}

async fn fail(breaker: &MlCircuitBreaker) -> Result<u32, BreakerError<BackendDown>> {
    breaker.execute(|| async { Err(BackendDown) }).await
}

/// A threshold model that always recommends the same knobs
struct FixedKnobs {
    knobs: BreakerKnobs,
    anomalous: bool,
}

impl ThresholdModel for FixedKnobs {
    fn observe(&mut self, _snapshot: &MetricSnapshot) -> anyhow::Result<TickSummary> {
        Ok(TickSummary {
            anomalous: self.anomalous,
            prediction: 0.7,
            anomaly_score: if self.anomalous { 1.5 } else { 0.1 },
        })
    }

    fn knobs(&self) -> BreakerKnobs {
        self.knobs
    }

    fn last_prediction(&self) -> f64 {
        0.7
    }
}

/// A threshold model whose update always fails
struct ExplodingModel;

impl ThresholdModel for ExplodingModel {
    fn observe(&mut self, _snapshot: &MetricSnapshot) -> anyhow::Result<TickSummary> {
        anyhow::bail!("model exploded")
    }

    fn knobs(&self) -> BreakerKnobs {
        BreakerKnobs {
            window_size: 100,
            failure_rate_threshold: 0.5,
            open_state_wait: Duration::from_secs(30),
        }
    }

    fn last_prediction(&self) -> f64 {
        0.5
    }
}

// Cold start with ML disabled: the breaker behaves classically and the
// window fills with the observed records.
#[tokio::test]
async fn cold_start_without_ml_stays_closed() {
    let breaker = MlCircuitBreaker::builder()
        .settings(classic_settings("s1", 30_000))
        .build()
        .await;

    for _ in 0..20 {
        assert!(succeed(&breaker).await.is_ok());
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.recorded_calls(), 20);
    let snapshot = breaker.metrics_snapshot();
    assert_eq!(snapshot.error_rate, 0.0);
    assert_eq!(snapshot.samples, 20);
    breaker.shutdown().await;
}

// Classic trip and half-open recovery: six failures in ten calls open the
// circuit, the cooldown admits probes, and a clean probe run closes it.
#[tokio::test]
async fn classic_trip_then_half_open_recovery() {
    let breaker = MlCircuitBreaker::builder()
        .settings(classic_settings("s2", 200))
        .build()
        .await;

    for _ in 0..6 {
        assert!(fail(&breaker).await.is_err());
    }
    for _ in 0..4 {
        assert!(succeed(&breaker).await.is_ok());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // The next call is rejected without reaching the operation.
    let rejected = succeed(&breaker).await.unwrap_err();
    assert!(rejected.is_open());

    // Past the deadline the first probe transitions to half-open.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(succeed(&breaker).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    for _ in 0..4 {
        assert!(succeed(&breaker).await.is_ok());
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(succeed(&breaker).await.is_ok());
    breaker.shutdown().await;
}

// A failed probe sends the breaker straight back to open.
#[tokio::test]
async fn failed_probe_reopens() {
    let breaker = MlCircuitBreaker::builder()
        .settings(classic_settings("s3b", 100))
        .build()
        .await;

    for _ in 0..10 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(succeed(&breaker).await.unwrap_err().is_open());
    breaker.shutdown().await;
}

// An anomalous tick suppresses reconfiguration even when the recommended
// knobs differ wildly from the current configuration.
#[tokio::test]
async fn anomalous_tick_suppresses_reconfiguration() {
    let mut settings = classic_settings("s4", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder()
        .settings(settings)
        .model(Box::new(FixedKnobs {
            knobs: BreakerKnobs {
                window_size: 10,
                failure_rate_threshold: 0.8,
                open_state_wait: Duration::from_secs(1),
            },
            anomalous: true,
        }))
        .build()
        .await;

    let initial = breaker.current_config();
    for _ in 0..20 {
        assert!(succeed(&breaker).await.is_ok());
    }
    assert_eq!(breaker.current_config(), initial);
    breaker.shutdown().await;
}

// The significance gate: near-identical knobs leave the configuration
// alone, significantly different knobs replace it with state preserved.
#[tokio::test]
async fn significance_gate_controls_replacement() {
    let mut settings = classic_settings("s5a", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder()
        .settings(settings)
        .model(Box::new(FixedKnobs {
            knobs: BreakerKnobs {
                window_size: 100,
                failure_rate_threshold: 0.52,
                open_state_wait: Duration::from_secs(30),
            },
            anomalous: false,
        }))
        .build()
        .await;

    let initial = breaker.current_config();
    for _ in 0..10 {
        assert!(succeed(&breaker).await.is_ok());
    }
    // A 4% threshold shift is below the gate.
    assert_eq!(breaker.current_config(), initial);
    breaker.shutdown().await;

    let mut settings = classic_settings("s5b", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder()
        .settings(settings)
        .model(Box::new(FixedKnobs {
            knobs: BreakerKnobs {
                window_size: 80,
                failure_rate_threshold: 0.62,
                open_state_wait: Duration::from_secs(45),
            },
            anomalous: false,
        }))
        .build()
        .await;

    for _ in 0..4 {
        assert!(succeed(&breaker).await.is_ok());
    }
    let replaced = breaker.current_config();
    assert_eq!(replaced.window_size, 80);
    assert!((replaced.failure_rate_threshold - 0.62).abs() < 1e-9);
    assert_eq!(replaced.open_state_wait, Duration::from_secs(45));
    // Replacement preserved the closed state.
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.shutdown().await;
}

// Replacements are rate limited: even a persistently significant model
// cannot swap the configuration twice within the minimum interval.
#[tokio::test]
async fn reconfiguration_is_rate_limited() {
    let mut settings = classic_settings("s5c", 30_000);
    settings.ml_enabled = true;
    settings.reconfig_min_interval_ms = 60_000;
    let breaker = MlCircuitBreaker::builder()
        .settings(settings)
        .model(Box::new(FixedKnobs {
            knobs: BreakerKnobs {
                window_size: 40,
                failure_rate_threshold: 0.3,
                open_state_wait: Duration::from_secs(10),
            },
            anomalous: false,
        }))
        .build()
        .await;

    assert!(succeed(&breaker).await.is_ok());
    let first = breaker.current_config();
    assert_eq!(first.window_size, 40);

    // Later ticks recommend the same knobs; nothing further changes and
    // nothing panics inside the rate-limit window.
    for _ in 0..20 {
        assert!(succeed(&breaker).await.is_ok());
    }
    assert_eq!(breaker.current_config(), first);
    breaker.shutdown().await;
}

// A model whose update always fails must never affect the call path: every
// call still runs, every call still records, the configuration stands.
#[tokio::test]
async fn ml_failure_is_fully_isolated() {
    let mut settings = classic_settings("s6", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder()
        .settings(settings)
        .model(Box::new(ExplodingModel))
        .build()
        .await;

    let initial = breaker.current_config();
    for i in 0..100 {
        if i % 10 == 9 {
            assert!(fail(&breaker).await.is_err());
        } else {
            assert_eq!(succeed(&breaker).await.unwrap(), 1);
        }
    }

    assert_eq!(breaker.recorded_calls(), 100);
    assert_eq!(breaker.current_config(), initial);
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.shutdown().await;
}

// Toggling ML off and back on changes nothing until new metrics arrive.
#[tokio::test]
async fn ml_toggle_preserves_decisions() {
    let mut settings = classic_settings("toggle", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder().settings(settings).build().await;

    for _ in 0..10 {
        assert!(succeed(&breaker).await.is_ok());
    }
    let config_before = breaker.current_config();
    let state_before = breaker.state();

    breaker.set_ml_enabled(false);
    breaker.set_ml_enabled(true);

    assert_eq!(breaker.current_config(), config_before);
    assert_eq!(breaker.state(), state_before);
    breaker.shutdown().await;
}

// The full learning stack survives sustained concurrent traffic.
#[tokio::test]
async fn concurrent_traffic_with_learning_enabled() {
    let mut settings = classic_settings("concurrent", 30_000);
    settings.ml_enabled = true;
    let breaker = MlCircuitBreaker::builder().settings(settings).build().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let breaker = Arc::clone(&breaker);
        tasks.push(tokio::spawn(async move {
            for j in 0..25 {
                if (i + j) % 11 == 0 {
                    let _ = fail(&breaker).await;
                } else {
                    let _ = succeed(&breaker).await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(breaker.recorded_calls(), 200);
    let snapshot = breaker.metrics_snapshot();
    assert!(snapshot.error_rate < 0.5);
    assert!((0.0..=1.0).contains(&breaker.last_prediction()));
    breaker.shutdown().await;
}

// Shutdown persists the model and drains the sink; a rebuild warm starts
// from both.
#[tokio::test]
async fn persistence_round_trip_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileMetricsSink::new(dir.path().join("metrics.json")));
    let store = Arc::new(FileModelStore::new(dir.path().join("models")));

    let mut settings = classic_settings("persisted", 30_000);
    settings.ml_enabled = true;

    let breaker = MlCircuitBreaker::builder()
        .settings(settings.clone())
        .metrics_sink(sink.clone())
        .model_store(store.clone())
        .build()
        .await;

    for _ in 0..30 {
        assert!(succeed(&breaker).await.is_ok());
    }
    breaker.shutdown().await;

    assert!(dir.path().join("metrics.json").exists());
    assert!(dir.path().join("models").join("persisted.model").exists());

    // Rebuild over the same files: the model restores and the history
    // replays without disturbing the breaker.
    let rebuilt = MlCircuitBreaker::builder()
        .settings(settings)
        .metrics_sink(sink)
        .model_store(store)
        .build()
        .await;
    assert_eq!(rebuilt.state(), CircuitState::Closed);
    assert!(succeed(&rebuilt).await.is_ok());
    rebuilt.shutdown().await;
}
