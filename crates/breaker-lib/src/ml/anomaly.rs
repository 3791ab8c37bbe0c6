//! Statistical anomaly detection over feature vectors
//!
//! Tracks a running mean and standard deviation per feature. Early on the
//! statistics are recomputed exactly from the retained samples; once enough
//! data has arrived they adapt by exponential moving average. The anomaly
//! score is the root mean square z-score across features, normalized by the
//! configured threshold so that scores above 1 are anomalous.

use std::collections::VecDeque;
use tracing::debug;

/// Sample count at or below which statistics are recomputed exactly
const EXACT_RECOMPUTE_LIMIT: usize = 10;

/// EMA adaptation rate once statistics update incrementally
const ADAPTATION_RATE: f64 = 0.1;

/// Variance floor to avoid division by a vanishing deviation
const MIN_VARIANCE: f64 = 1e-4;

/// Per-feature outlier detector
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    num_features: usize,
    means: Vec<f64>,
    std_devs: Vec<f64>,
    min_values: Vec<f64>,
    max_values: Vec<f64>,
    recent: VecDeque<Vec<f64>>,
    max_samples: usize,
    threshold: f64,
    processed: u64,
}

impl AnomalyDetector {
    pub fn new(num_features: usize, max_samples: usize, threshold: f64) -> Self {
        Self {
            num_features,
            means: vec![0.0; num_features],
            std_devs: vec![1.0; num_features],
            min_values: vec![f64::INFINITY; num_features],
            max_values: vec![f64::NEG_INFINITY; num_features],
            recent: VecDeque::with_capacity(max_samples),
            max_samples,
            threshold,
            processed: 0,
        }
    }

    /// Fold a new vector into the running statistics
    pub fn observe(&mut self, features: &[f64]) {
        if features.len() != self.num_features {
            debug!(
                got = features.len(),
                expected = self.num_features,
                "feature vector length mismatch, ignoring sample"
            );
            return;
        }

        self.recent.push_back(features.to_vec());
        if self.recent.len() > self.max_samples {
            self.recent.pop_front();
        }

        for (i, &value) in features.iter().enumerate() {
            self.min_values[i] = self.min_values[i].min(value);
            self.max_values[i] = self.max_values[i].max(value);
        }

        if self.recent.len() <= EXACT_RECOMPUTE_LIMIT {
            self.recompute_exact();
        } else {
            for (i, &value) in features.iter().enumerate() {
                self.means[i] += ADAPTATION_RATE * (value - self.means[i]);
                let variance = self.std_devs[i] * self.std_devs[i];
                let updated = (1.0 - ADAPTATION_RATE) * variance
                    + ADAPTATION_RATE * (value - self.means[i]).powi(2);
                self.std_devs[i] = updated.max(MIN_VARIANCE).sqrt();
            }
        }

        self.processed += 1;
    }

    /// Root mean square z-score normalized by the threshold.
    /// Values above 1 indicate an anomalous vector.
    pub fn score(&self, features: &[f64]) -> f64 {
        if features.len() != self.num_features || self.recent.is_empty() {
            return 0.0;
        }

        let mut sum_squared = 0.0;
        for (i, &value) in features.iter().enumerate() {
            if self.std_devs[i] <= MIN_VARIANCE {
                continue;
            }
            let deviation = (value - self.means[i]) / self.std_devs[i];
            sum_squared += deviation * deviation;
        }

        let score = (sum_squared / self.num_features as f64).sqrt();
        score / self.threshold
    }

    pub fn is_anomalous(&self, features: &[f64]) -> bool {
        self.score(features) > 1.0
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Observed range of one feature, if any samples have arrived
    pub fn value_range(&self, feature: usize) -> Option<(f64, f64)> {
        if self.recent.is_empty() || feature >= self.num_features {
            return None;
        }
        Some((self.min_values[feature], self.max_values[feature]))
    }

    fn recompute_exact(&mut self) {
        let n = self.recent.len();
        if n == 0 {
            return;
        }

        for i in 0..self.num_features {
            let mean = self.recent.iter().map(|s| s[i]).sum::<f64>() / n as f64;
            let variance = self
                .recent
                .iter()
                .map(|s| (s[i] - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            self.means[i] = mean;
            self.std_devs[i] = variance.max(MIN_VARIANCE).sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(3, 30, 2.5)
    }

    #[test]
    fn no_samples_scores_zero() {
        let detector = detector();
        assert_eq!(detector.score(&[1.0, 2.0, 3.0]), 0.0);
        assert!(!detector.is_anomalous(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn familiar_data_is_not_anomalous() {
        let mut detector = detector();
        for i in 0..50 {
            let wobble = (i % 5) as f64 * 0.01;
            detector.observe(&[0.5 + wobble, 0.1 + wobble, 0.3]);
        }
        assert!(!detector.is_anomalous(&[0.51, 0.11, 0.3]));
    }

    #[test]
    fn outlier_scores_above_threshold() {
        let mut detector = detector();
        for i in 0..50 {
            let wobble = (i % 5) as f64 * 0.01;
            detector.observe(&[0.5 + wobble, 0.1 + wobble, 0.3]);
        }
        assert!(detector.is_anomalous(&[50.0, 0.9, 0.3]));
        assert!(detector.score(&[50.0, 0.9, 0.3]) > 1.0);
    }

    #[test]
    fn sample_memory_stays_bounded() {
        let mut detector = AnomalyDetector::new(2, 30, 2.5);
        for i in 0..100 {
            detector.observe(&[i as f64, 0.0]);
        }
        assert_eq!(detector.recent.len(), 30);
        assert_eq!(detector.processed(), 100);
    }

    #[test]
    fn exact_statistics_for_small_samples() {
        let mut detector = AnomalyDetector::new(1, 30, 2.5);
        for value in [1.0, 2.0, 3.0] {
            detector.observe(&[value]);
        }
        assert!((detector.means[0] - 2.0).abs() < 1e-9);
        // Population variance of 1, 2, 3 is 2/3.
        assert!((detector.std_devs[0] - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn value_range_tracks_min_and_max() {
        let mut detector = AnomalyDetector::new(1, 30, 2.5);
        assert!(detector.value_range(0).is_none());
        for value in [5.0, -2.0, 3.0] {
            detector.observe(&[value]);
        }
        assert_eq!(detector.value_range(0), Some((-2.0, 5.0)));
        assert!(detector.value_range(7).is_none());
    }

    #[test]
    fn variance_floor_prevents_degenerate_scores() {
        let mut detector = AnomalyDetector::new(1, 30, 2.5);
        for _ in 0..40 {
            detector.observe(&[0.5]);
        }
        let score = detector.score(&[0.5]);
        assert!(score.is_finite());
    }
}
