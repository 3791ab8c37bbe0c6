//! AR/MA forecaster over the health signal
//!
//! Forecasts the next value as a weighted sum of retained past values and
//! past forecast errors, clipped to [0, 1]. Coefficients adapt by
//! single-step gradient descent and are renormalized periodically so the
//! model cannot drift into instability.

use std::collections::VecDeque;
use tracing::debug;

const LEARNING_RATE: f64 = 0.01;
const RENORMALIZE_EVERY: u64 = 50;
const AR_COEFFICIENT_BUDGET: f64 = 0.95;
const MA_COEFFICIENT_BUDGET: f64 = 0.5;

/// Online ARMA-style forecaster
#[derive(Debug, Clone)]
pub struct TimeSeriesForecaster {
    ar_coefficients: Vec<f64>,
    ma_coefficients: Vec<f64>,
    past_values: VecDeque<f64>,
    past_errors: VecDeque<f64>,
    last_forecast: f64,
    update_count: u64,
}

impl TimeSeriesForecaster {
    pub fn new(ar_order: usize, ma_order: usize) -> Self {
        let ar_coefficients = (0..ar_order).map(|i| 0.5 / (i + 1) as f64).collect();
        let ma_coefficients = (0..ma_order).map(|i| 0.3 / (i + 1) as f64).collect();
        debug!(ar_order, ma_order, "initialized time series forecaster");
        Self {
            ar_coefficients,
            ma_coefficients,
            past_values: VecDeque::with_capacity(ar_order),
            past_errors: VecDeque::with_capacity(ma_order),
            last_forecast: 0.5,
            update_count: 0,
        }
    }

    /// Forecast the next value. With no history the prior is 0.5.
    pub fn forecast(&mut self) -> f64 {
        if self.past_values.is_empty() {
            self.last_forecast = 0.5;
            return self.last_forecast;
        }

        let ar_sum: f64 = self
            .past_values
            .iter()
            .zip(&self.ar_coefficients)
            .map(|(value, coefficient)| value * coefficient)
            .sum();
        let ma_sum: f64 = self
            .past_errors
            .iter()
            .zip(&self.ma_coefficients)
            .map(|(error, coefficient)| error * coefficient)
            .sum();

        self.last_forecast = (ar_sum + ma_sum).clamp(0.0, 1.0);
        self.last_forecast
    }

    /// Feed the observed value, updating history and coefficients
    pub fn update(&mut self, actual: f64) {
        let error = actual - self.last_forecast;

        self.past_values.push_back(actual);
        if self.past_values.len() > self.ar_coefficients.len() {
            self.past_values.pop_front();
        }
        self.past_errors.push_back(error);
        if self.past_errors.len() > self.ma_coefficients.len() {
            self.past_errors.pop_front();
        }

        for (coefficient, value) in self.ar_coefficients.iter_mut().zip(&self.past_values) {
            *coefficient += LEARNING_RATE * error * value;
        }
        for (coefficient, past_error) in self.ma_coefficients.iter_mut().zip(&self.past_errors)
        {
            *coefficient += LEARNING_RATE * error * past_error;
        }

        self.update_count += 1;
        if self.update_count % RENORMALIZE_EVERY == 0 {
            self.renormalize();
        }
    }

    pub fn last_forecast(&self) -> f64 {
        self.last_forecast
    }

    /// Rescale coefficient magnitudes back inside their budgets
    fn renormalize(&mut self) {
        let ar_sum: f64 = self.ar_coefficients.iter().map(|c| c.abs()).sum();
        if ar_sum > AR_COEFFICIENT_BUDGET {
            for coefficient in &mut self.ar_coefficients {
                *coefficient *= AR_COEFFICIENT_BUDGET / ar_sum;
            }
        }
        let ma_sum: f64 = self.ma_coefficients.iter().map(|c| c.abs()).sum();
        if ma_sum > MA_COEFFICIENT_BUDGET {
            for coefficient in &mut self.ma_coefficients {
                *coefficient *= MA_COEFFICIENT_BUDGET / ma_sum;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_forecasts_prior() {
        let mut forecaster = TimeSeriesForecaster::new(5, 3);
        assert!((forecaster.forecast() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn forecast_stays_clipped() {
        let mut forecaster = TimeSeriesForecaster::new(5, 3);
        for _ in 0..200 {
            forecaster.update(1.0);
            let forecast = forecaster.forecast();
            assert!((0.0..=1.0).contains(&forecast));
        }
    }

    #[test]
    fn history_queues_stay_bounded() {
        let mut forecaster = TimeSeriesForecaster::new(5, 3);
        for i in 0..100 {
            forecaster.update(i as f64 / 100.0);
        }
        assert!(forecaster.past_values.len() <= 5);
        assert!(forecaster.past_errors.len() <= 3);
    }

    #[test]
    fn constant_signal_forecast_converges_upward() {
        let mut forecaster = TimeSeriesForecaster::new(5, 3);
        for _ in 0..300 {
            forecaster.update(0.9);
            forecaster.forecast();
        }
        assert!(forecaster.forecast() > 0.6);
    }

    #[test]
    fn renormalization_bounds_coefficients() {
        let mut forecaster = TimeSeriesForecaster::new(5, 3);
        // Drive hard toward 1.0 for many renormalization cycles.
        for _ in 0..500 {
            forecaster.forecast();
            forecaster.update(1.0);
        }
        let ar_sum: f64 = forecaster.ar_coefficients.iter().map(|c| c.abs()).sum();
        let ma_sum: f64 = forecaster.ma_coefficients.iter().map(|c| c.abs()).sum();
        assert!(ar_sum <= AR_COEFFICIENT_BUDGET + 1e-9, "ar sum {ar_sum}");
        assert!(ma_sum <= MA_COEFFICIENT_BUDGET + 1e-9, "ma sum {ma_sum}");
    }
}
