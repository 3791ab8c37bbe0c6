//! Ensemble of diversified networks
//!
//! Networks are diversified by hidden layer size, momentum, regularization
//! strength and learning rate, then combined by non-negative weights that
//! track each network's recent accuracy.

use super::network::NeuralNet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

/// Weights reset to uniform when total error drops below this bound
const DEGENERATE_ERROR: f64 = 1e-4;

/// Weighted ensemble of online-trained networks
#[derive(Debug, Clone)]
pub struct EnsemblePredictor {
    pub(crate) nets: Vec<NeuralNet>,
    pub(crate) weights: Vec<f64>,
    pub(crate) input_size: usize,
    pub(crate) base_learning_rate: f64,
}

impl EnsemblePredictor {
    pub fn new(num_models: usize, input_size: usize, base_learning_rate: f64) -> Self {
        Self::with_seed(num_models, input_size, base_learning_rate, rand::random())
    }

    /// Deterministic construction for reproducible tests
    pub fn with_seed(
        num_models: usize,
        input_size: usize,
        base_learning_rate: f64,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let nets = (0..num_models)
            .map(|i| {
                let hidden_size = 4 + 2 * i;
                let momentum = 0.9 - 0.1 * i as f64;
                let l2_lambda = 0.001 * (i + 1) as f64;
                NeuralNet::new(input_size, hidden_size, momentum, l2_lambda, &mut rng)
            })
            .collect();

        debug!(
            num_models,
            input_size, base_learning_rate, "initialized ensemble predictor"
        );

        Self {
            nets,
            weights: vec![1.0 / num_models as f64; num_models],
            input_size,
            base_learning_rate,
        }
    }

    /// Rebuild an ensemble from persisted parts
    pub(crate) fn from_parts(
        nets: Vec<NeuralNet>,
        weights: Vec<f64>,
        input_size: usize,
        base_learning_rate: f64,
    ) -> Self {
        Self {
            nets,
            weights,
            input_size,
            base_learning_rate,
        }
    }

    /// Weighted average of the member predictions, always in [0, 1]
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.input_size {
            warn!(
                got = features.len(),
                expected = self.input_size,
                "feature vector length mismatch"
            );
            return 0.5;
        }
        self.nets
            .iter()
            .zip(&self.weights)
            .map(|(net, weight)| net.predict(features) * weight)
            .sum()
    }

    /// Train every member on one example, then re-weight by accuracy
    pub fn learn(&mut self, features: &[f64], target: f64) {
        if features.len() != self.input_size {
            return;
        }
        let count = self.nets.len();
        for (i, net) in self.nets.iter_mut().enumerate() {
            net.learn(features, target, Self::member_rate(self.base_learning_rate, i, count));
        }
        self.update_weights(features, target);
    }

    /// Train every member on a batch, re-weighting from the last example
    pub fn learn_batch(&mut self, features: &[Vec<f64>], targets: &[f64]) {
        if features.len() != targets.len() || features.is_empty() {
            warn!("batch sizes mismatch or empty batch provided");
            return;
        }
        if features[0].len() != self.input_size {
            warn!(
                got = features[0].len(),
                expected = self.input_size,
                "feature vector length mismatch"
            );
            return;
        }
        let count = self.nets.len();
        for (i, net) in self.nets.iter_mut().enumerate() {
            net.learn_batch(
                features,
                targets,
                Self::member_rate(self.base_learning_rate, i, count),
            );
        }
        let last = features.len() - 1;
        self.update_weights(&features[last], targets[last]);
    }

    pub fn average_loss(&self) -> f64 {
        self.nets.iter().map(|n| n.last_loss()).sum::<f64>() / self.nets.len() as f64
    }

    pub fn num_models(&self) -> usize {
        self.nets.len()
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Learning rate varied around the base rate for member diversity
    fn member_rate(base: f64, index: usize, count: usize) -> f64 {
        base * (0.8 + 0.4 * index as f64 / count as f64)
    }

    /// Inverse-error weighting: members with lower error on the latest
    /// example get more of the vote. Degenerate totals reset to uniform.
    fn update_weights(&mut self, features: &[f64], target: f64) {
        let count = self.nets.len();
        let errors: Vec<f64> = self
            .nets
            .iter()
            .map(|net| (target - net.predict(features)).abs())
            .collect();
        let total: f64 = errors.iter().sum();

        if total <= DEGENERATE_ERROR {
            self.weights = vec![1.0 / count as f64; count];
            return;
        }

        for (weight, error) in self.weights.iter_mut().zip(&errors) {
            *weight = (total - error) / ((count - 1) as f64 * total);
        }
        let sum: f64 = self.weights.iter().sum();
        for weight in &mut self.weights {
            *weight /= sum;
        }
    }
}
