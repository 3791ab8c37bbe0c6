//! Threshold prediction
//!
//! Combines the ensemble forecast, the AR/MA temporal prior and the anomaly
//! score into a composite health score, then maps that score onto the three
//! breaker knobs. The ensemble's share of the vote grows with experience and
//! shrinks in unfamiliar regimes, shifting weight to the temporal prior.
//!
//! The orchestrator talks to this module through [`ThresholdModel`] so a
//! failed initialization can install [`StaticThresholds`] instead and tests
//! can inject failing doubles.

use crate::metrics::MetricSnapshot;
use crate::ml::{
    decode_ensemble, encode_ensemble, AnomalyDetector, EnsemblePredictor, FeatureExtractor,
    TimeSeriesForecaster, FEATURE_COUNT,
};
use crate::models::BreakerKnobs;
use anyhow::{ensure, Result};
use std::time::Duration;
use tracing::debug;

const MIN_WINDOW_SIZE: f64 = 10.0;
const MAX_WINDOW_SIZE: f64 = 100.0;
const MIN_THRESHOLD: f64 = 0.2;
const MAX_THRESHOLD: f64 = 0.8;
const MIN_WAIT_MS: f64 = 1_000.0;
const MAX_WAIT_MS: f64 = 60_000.0;

const SUCCESS_RATE_WEIGHT: f64 = 0.6;
const LATENCY_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.1;

const ENSEMBLE_MODELS: usize = 3;
const BASE_LEARNING_RATE: f64 = 0.01;
const AR_ORDER: usize = 5;
const MA_ORDER: usize = 3;
const ANOMALY_SAMPLES: usize = 30;
const ANOMALY_THRESHOLD: f64 = 2.5;

/// Outcome of one learning tick
#[derive(Debug, Clone, Copy)]
pub struct TickSummary {
    /// The snapshot sits outside the familiar operating regime; the caller
    /// should skip reconfiguration this tick.
    pub anomalous: bool,
    /// Composite health score in [0, 1], higher is healthier
    pub prediction: f64,
    /// Normalized anomaly score, above 1 is anomalous
    pub anomaly_score: f64,
}

/// The model the orchestrator drives once per call
pub trait ThresholdModel: Send {
    /// Run one tick: extract features, predict, derive knobs, learn
    fn observe(&mut self, snapshot: &MetricSnapshot) -> Result<TickSummary>;

    /// Current knob recommendations
    fn knobs(&self) -> BreakerKnobs;

    /// Latest composite health score
    fn last_prediction(&self) -> f64;

    /// Serialized model state, if this model supports persistence
    fn export_model(&self) -> Option<Vec<u8>> {
        None
    }
}

/// ML-driven threshold predictor
pub struct ThresholdPredictor {
    features: FeatureExtractor,
    ensemble: EnsemblePredictor,
    forecaster: TimeSeriesForecaster,
    anomaly: AnomalyDetector,
    training_interval: u64,
    tick_count: u64,
    last_prediction: f64,
    knobs: BreakerKnobs,
}

impl ThresholdPredictor {
    pub fn new(initial_knobs: BreakerKnobs, training_interval: u64) -> Result<Self> {
        ensure!(training_interval > 0, "training interval must be positive");
        Ok(Self {
            features: FeatureExtractor::new(),
            ensemble: EnsemblePredictor::new(ENSEMBLE_MODELS, FEATURE_COUNT, BASE_LEARNING_RATE),
            forecaster: TimeSeriesForecaster::new(AR_ORDER, MA_ORDER),
            anomaly: AnomalyDetector::new(FEATURE_COUNT, ANOMALY_SAMPLES, ANOMALY_THRESHOLD),
            training_interval,
            tick_count: 0,
            last_prediction: 0.5,
            knobs: initial_knobs,
        })
    }

    /// Deterministic construction for reproducible tests
    pub fn with_seed(
        initial_knobs: BreakerKnobs,
        training_interval: u64,
        seed: u64,
    ) -> Result<Self> {
        let mut predictor = Self::new(initial_knobs, training_interval)?;
        predictor.ensemble =
            EnsemblePredictor::with_seed(ENSEMBLE_MODELS, FEATURE_COUNT, BASE_LEARNING_RATE, seed);
        Ok(predictor)
    }

    /// Replace the ensemble with one restored from persistence
    pub fn restore_ensemble(&mut self, blob: &[u8]) -> Result<()> {
        let restored = decode_ensemble(blob)?;
        ensure!(
            restored.input_size() == FEATURE_COUNT,
            "restored model expects {} features, this build uses {}",
            restored.input_size(),
            FEATURE_COUNT
        );
        self.ensemble = restored;
        Ok(())
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn training_examples(&self) -> usize {
        self.features.training_examples()
    }

    /// Composite learning target: weighted success rate, latency and
    /// stability, each in [0, 1]
    fn learning_target(&self, snapshot: &MetricSnapshot) -> f64 {
        let latency_score = (1.0 - snapshot.p95_latency_ms / 2_000.0).max(0.0);
        let stability_score = self.features.stability_score(snapshot);
        (snapshot.success_rate * SUCCESS_RATE_WEIGHT
            + latency_score * LATENCY_WEIGHT
            + stability_score * STABILITY_WEIGHT)
            .clamp(0.0, 1.0)
    }
}

impl ThresholdModel for ThresholdPredictor {
    fn observe(&mut self, snapshot: &MetricSnapshot) -> Result<TickSummary> {
        self.tick_count += 1;

        // An empty window carries no signal: hold the current knobs and
        // report a neutral score instead of training on zeros.
        if snapshot.is_empty() {
            self.last_prediction = 0.5;
            return Ok(TickSummary {
                anomalous: false,
                prediction: 0.5,
                anomaly_score: 0.0,
            });
        }

        let features = self.features.extract(snapshot);
        let temporal = self.forecaster.forecast();
        let ensemble = self.ensemble.predict(&features);

        self.anomaly.observe(&features);
        let anomaly_score = self.anomaly.score(&features);

        // The ensemble earns trust with experience, capped at 0.8, and loses
        // it again when the detector flags an unfamiliar regime.
        let mut ensemble_weight =
            (0.4 + 0.4 * (self.tick_count as f64 / 100.0).min(1.0)).min(0.8);
        if anomaly_score > 0.8 {
            ensemble_weight *= 1.0 - (anomaly_score - 0.8) * 0.5;
        }

        let mut composite = ensemble_weight * ensemble + (1.0 - ensemble_weight) * temporal;

        let error_trend = self.features.error_rate_trend();
        if error_trend > 0.3 {
            composite *= 1.0 - (error_trend - 0.3) * 0.5;
        }
        let latency_trend = self.features.latency_trend();
        if latency_trend > 0.3 {
            composite *= 1.0 - (latency_trend - 0.3) * 0.3;
        }
        composite = composite.clamp(0.0, 1.0);

        self.last_prediction = composite;
        self.knobs = knobs_for(composite);

        let target = self.learning_target(snapshot);
        self.features.record_training_example(features.clone(), target);

        let batch = self.training_interval as usize;
        if self.tick_count % self.training_interval == 0 {
            match self.features.recent_batch(batch) {
                Some((batch_features, batch_targets)) => {
                    self.ensemble.learn_batch(&batch_features, &batch_targets);
                    debug!(examples = batch, "performed batch learning");
                }
                None => self.ensemble.learn(&features, target),
            }
        } else {
            self.ensemble.learn(&features, target);
        }
        self.forecaster.update(target);

        Ok(TickSummary {
            anomalous: anomaly_score > 1.0,
            prediction: composite,
            anomaly_score,
        })
    }

    fn knobs(&self) -> BreakerKnobs {
        self.knobs
    }

    fn last_prediction(&self) -> f64 {
        self.last_prediction
    }

    fn export_model(&self) -> Option<Vec<u8>> {
        Some(encode_ensemble(&self.ensemble))
    }
}

/// Fixed conservative thresholds installed when ML initialization fails
pub struct StaticThresholds {
    knobs: BreakerKnobs,
}

impl StaticThresholds {
    pub fn new() -> Self {
        Self {
            knobs: BreakerKnobs {
                window_size: 100,
                failure_rate_threshold: 0.5,
                open_state_wait: Duration::from_secs(30),
            },
        }
    }
}

impl Default for StaticThresholds {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdModel for StaticThresholds {
    fn observe(&mut self, _snapshot: &MetricSnapshot) -> Result<TickSummary> {
        Ok(TickSummary {
            anomalous: false,
            prediction: 0.5,
            anomaly_score: 0.0,
        })
    }

    fn knobs(&self) -> BreakerKnobs {
        self.knobs
    }

    fn last_prediction(&self) -> f64 {
        0.5
    }
}

/// Linear maps from the composite score onto the knob ranges. A lower score
/// widens the window, lowers the threshold and lengthens the cooldown.
fn knobs_for(composite: f64) -> BreakerKnobs {
    let window_size =
        (MIN_WINDOW_SIZE + (1.0 - composite) * (MAX_WINDOW_SIZE - MIN_WINDOW_SIZE)).round();
    let failure_rate_threshold = MIN_THRESHOLD + composite * (MAX_THRESHOLD - MIN_THRESHOLD);
    let wait_ms = (MIN_WAIT_MS + (1.0 - composite) * (MAX_WAIT_MS - MIN_WAIT_MS)).round();

    BreakerKnobs {
        window_size: window_size as u32,
        failure_rate_threshold,
        open_state_wait: Duration::from_millis(wait_ms as u64),
    }
}
