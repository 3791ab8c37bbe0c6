//! Single-hidden-layer feed-forward network trained online
//!
//! Dense input to a ReLU hidden layer, single sigmoid output. Updates use
//! momentum SGD with L2 regularization on weights (not biases). Weights are
//! Xavier-initialized with scale sqrt(2 / (input + hidden)).

use rand::Rng;
use tracing::warn;

/// Sigmoid input clamp bound
const SIGMOID_CLAMP: f64 = 20.0;

/// One feed-forward network of the ensemble
#[derive(Debug, Clone)]
pub struct NeuralNet {
    pub(crate) input_size: usize,
    pub(crate) hidden_size: usize,
    pub(crate) weights1: Vec<Vec<f64>>,
    pub(crate) biases1: Vec<f64>,
    pub(crate) weights2: Vec<f64>,
    pub(crate) bias2: f64,
    velocity_w1: Vec<Vec<f64>>,
    velocity_b1: Vec<f64>,
    velocity_w2: Vec<f64>,
    velocity_b2: f64,
    pub(crate) momentum: f64,
    pub(crate) l2_lambda: f64,
    last_loss: f64,
    training_steps: u64,
}

impl NeuralNet {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        momentum: f64,
        l2_lambda: f64,
        rng: &mut impl Rng,
    ) -> Self {
        let scale = (2.0 / (input_size + hidden_size) as f64).sqrt();
        let weights1 = (0..input_size)
            .map(|_| {
                (0..hidden_size)
                    .map(|_| (rng.gen::<f64>() * 2.0 - 1.0) * scale)
                    .collect()
            })
            .collect();
        let weights2 = (0..hidden_size)
            .map(|_| (rng.gen::<f64>() * 2.0 - 1.0) * scale)
            .collect();

        Self {
            input_size,
            hidden_size,
            weights1,
            biases1: vec![0.0; hidden_size],
            weights2,
            bias2: 0.0,
            velocity_w1: vec![vec![0.0; hidden_size]; input_size],
            velocity_b1: vec![0.0; hidden_size],
            velocity_w2: vec![0.0; hidden_size],
            velocity_b2: 0.0,
            momentum,
            l2_lambda,
            last_loss: f64::MAX,
            training_steps: 0,
        }
    }

    /// Rebuild a network from persisted parameters. Momentum velocities are
    /// transient and restart at zero.
    pub(crate) fn from_parts(
        momentum: f64,
        l2_lambda: f64,
        weights1: Vec<Vec<f64>>,
        biases1: Vec<f64>,
        weights2: Vec<f64>,
        bias2: f64,
    ) -> Self {
        let input_size = weights1.len();
        let hidden_size = biases1.len();
        Self {
            input_size,
            hidden_size,
            weights1,
            biases1,
            weights2,
            bias2,
            velocity_w1: vec![vec![0.0; hidden_size]; input_size],
            velocity_b1: vec![0.0; hidden_size],
            velocity_w2: vec![0.0; hidden_size],
            velocity_b2: 0.0,
            momentum,
            l2_lambda,
            last_loss: f64::MAX,
            training_steps: 0,
        }
    }

    /// Forward pass. Output is always in (0, 1).
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.input_size {
            warn!(
                got = features.len(),
                expected = self.input_size,
                "feature vector length mismatch"
            );
            return 0.5;
        }
        let hidden = self.hidden_layer(features);
        sigmoid(self.output_layer(&hidden))
    }

    /// One online update from a single example
    pub fn learn(&mut self, features: &[f64], target: f64, learning_rate: f64) {
        if features.len() != self.input_size {
            warn!(
                got = features.len(),
                expected = self.input_size,
                "feature vector length mismatch, skipping update"
            );
            return;
        }

        let hidden = self.hidden_layer(features);
        let prediction = sigmoid(self.output_layer(&hidden));

        let loss = (target - prediction).powi(2)
            + self.l2_lambda * self.weight_norm_squared() / 2.0;
        self.track_loss(loss);

        let output_error = (target - prediction) * prediction * (1.0 - prediction);

        for j in 0..self.hidden_size {
            let gradient = output_error * hidden[j] - self.l2_lambda * self.weights2[j];
            self.velocity_w2[j] =
                self.momentum * self.velocity_w2[j] + learning_rate * gradient;
            self.weights2[j] += self.velocity_w2[j];
        }
        self.velocity_b2 = self.momentum * self.velocity_b2 + learning_rate * output_error;
        self.bias2 += self.velocity_b2;

        let hidden_error = self.hidden_error(&hidden, output_error);

        for i in 0..self.input_size {
            for j in 0..self.hidden_size {
                let gradient =
                    hidden_error[j] * features[i] - self.l2_lambda * self.weights1[i][j];
                self.velocity_w1[i][j] =
                    self.momentum * self.velocity_w1[i][j] + learning_rate * gradient;
                self.weights1[i][j] += self.velocity_w1[i][j];
            }
        }
        for j in 0..self.hidden_size {
            self.velocity_b1[j] =
                self.momentum * self.velocity_b1[j] + learning_rate * hidden_error[j];
            self.biases1[j] += self.velocity_b1[j];
        }
    }

    /// One update from averaged gradients over a batch of examples
    pub fn learn_batch(&mut self, features: &[Vec<f64>], targets: &[f64], learning_rate: f64) {
        if features.len() != targets.len() || features.is_empty() {
            warn!("batch sizes mismatch or empty batch, skipping update");
            return;
        }

        let batch_size = features.len();
        let mut grad_w1 = vec![vec![0.0; self.hidden_size]; self.input_size];
        let mut grad_b1 = vec![0.0; self.hidden_size];
        let mut grad_w2 = vec![0.0; self.hidden_size];
        let mut grad_b2 = 0.0;
        let mut batch_loss = 0.0;

        for (example, &target) in features.iter().zip(targets) {
            if example.len() != self.input_size {
                warn!(
                    got = example.len(),
                    expected = self.input_size,
                    "feature vector length mismatch in batch, skipping example"
                );
                continue;
            }

            let hidden = self.hidden_layer(example);
            let prediction = sigmoid(self.output_layer(&hidden));
            batch_loss += (target - prediction).powi(2);

            let output_error = (target - prediction) * prediction * (1.0 - prediction);
            for j in 0..self.hidden_size {
                grad_w2[j] += output_error * hidden[j];
            }
            grad_b2 += output_error;

            let hidden_error = self.hidden_error(&hidden, output_error);
            for i in 0..self.input_size {
                for j in 0..self.hidden_size {
                    grad_w1[i][j] += hidden_error[j] * example[i];
                }
            }
            for j in 0..self.hidden_size {
                grad_b1[j] += hidden_error[j];
            }
        }

        for i in 0..self.input_size {
            for j in 0..self.hidden_size {
                grad_w1[i][j] -= self.l2_lambda * self.weights1[i][j];
            }
        }
        for j in 0..self.hidden_size {
            grad_w2[j] -= self.l2_lambda * self.weights2[j];
        }

        let loss = batch_loss / batch_size as f64
            + self.l2_lambda * self.weight_norm_squared() / 2.0;
        self.track_loss(loss);

        for i in 0..self.input_size {
            for j in 0..self.hidden_size {
                let avg = grad_w1[i][j] / batch_size as f64;
                self.velocity_w1[i][j] =
                    self.momentum * self.velocity_w1[i][j] + learning_rate * avg;
                self.weights1[i][j] += self.velocity_w1[i][j];
            }
        }
        for j in 0..self.hidden_size {
            let avg = grad_b1[j] / batch_size as f64;
            self.velocity_b1[j] = self.momentum * self.velocity_b1[j] + learning_rate * avg;
            self.biases1[j] += self.velocity_b1[j];

            let avg = grad_w2[j] / batch_size as f64;
            self.velocity_w2[j] = self.momentum * self.velocity_w2[j] + learning_rate * avg;
            self.weights2[j] += self.velocity_w2[j];
        }
        let avg = grad_b2 / batch_size as f64;
        self.velocity_b2 = self.momentum * self.velocity_b2 + learning_rate * avg;
        self.bias2 += self.velocity_b2;
    }

    pub fn last_loss(&self) -> f64 {
        self.last_loss
    }

    pub fn training_steps(&self) -> u64 {
        self.training_steps
    }

    fn hidden_layer(&self, features: &[f64]) -> Vec<f64> {
        (0..self.hidden_size)
            .map(|j| {
                let sum = self.biases1[j]
                    + features
                        .iter()
                        .enumerate()
                        .map(|(i, f)| f * self.weights1[i][j])
                        .sum::<f64>();
                sum.max(0.0)
            })
            .collect()
    }

    fn output_layer(&self, hidden: &[f64]) -> f64 {
        self.bias2
            + hidden
                .iter()
                .zip(&self.weights2)
                .map(|(h, w)| h * w)
                .sum::<f64>()
    }

    /// ReLU gradient gates the backpropagated error
    fn hidden_error(&self, hidden: &[f64], output_error: f64) -> Vec<f64> {
        (0..self.hidden_size)
            .map(|j| {
                if hidden[j] > 0.0 {
                    output_error * self.weights2[j]
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn weight_norm_squared(&self) -> f64 {
        let w1: f64 = self
            .weights1
            .iter()
            .flat_map(|row| row.iter())
            .map(|w| w * w)
            .sum();
        let w2: f64 = self.weights2.iter().map(|w| w * w).sum();
        w1 + w2
    }

    fn track_loss(&mut self, loss: f64) {
        self.training_steps += 1;
        self.last_loss = if self.last_loss == f64::MAX {
            loss
        } else {
            0.9 * self.last_loss + 0.1 * loss
        };
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x.clamp(-SIGMOID_CLAMP, SIGMOID_CLAMP)).exp())
}
