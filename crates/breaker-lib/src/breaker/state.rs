//! Circuit breaker state machine
//!
//! # States
//! - Closed: calls pass through, outcomes fill a count-based buffer
//! - Open: calls fail fast until the deadline passes
//! - HalfOpen: a limited number of trial calls probe the backend
//!
//! # Transitions
//! ```text
//! Closed   -> Open      once min_calls are buffered and the failure rate
//!                       reaches the threshold
//! Open     -> HalfOpen  on the first admission attempt past the deadline
//! HalfOpen -> Closed    when every permitted trial succeeds
//! HalfOpen -> Open      on any trial failure
//! ```
//!
//! Transitions are driven by the owner under its lock; this type itself
//! holds no synchronization.

use crate::models::BreakerConfig;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Count-based circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    /// Most recent call outcomes, true on success
    outcomes: VecDeque<bool>,
    open_deadline: Option<Instant>,
    /// Trial permits still available in the half-open state
    half_open_permits: u32,
    trial_successes: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let capacity = config.window_size as usize;
        Self {
            config,
            state: CircuitState::Closed,
            outcomes: VecDeque::with_capacity(capacity),
            open_deadline: None,
            half_open_permits: 0,
            trial_successes: 0,
        }
    }

    /// Build a breaker under a new configuration while preserving the
    /// current state. An open breaker re-enters open with a re-armed
    /// deadline; a half-open breaker restarts its trials; a closed breaker
    /// keeps its outcome buffer, truncated to the new window from the old
    /// end.
    pub fn with_state(config: BreakerConfig, prior: &CircuitBreaker) -> Self {
        let mut next = Self::new(config);
        match prior.state {
            CircuitState::Closed => {
                let keep = next.config.window_size as usize;
                let skip = prior.outcomes.len().saturating_sub(keep);
                next.outcomes = prior.outcomes.iter().skip(skip).copied().collect();
            }
            CircuitState::Open => {
                next.state = CircuitState::Open;
                next.open_deadline = Some(Instant::now() + next.config.open_state_wait);
            }
            CircuitState::HalfOpen => {
                next.state = CircuitState::HalfOpen;
                next.half_open_permits = next.config.half_open_calls;
                next.trial_successes = 0;
            }
        }
        next
    }

    /// Decide whether to admit one call right now
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = self
                    .open_deadline
                    .map(|deadline| Instant::now() >= deadline)
                    .unwrap_or(true);
                if !expired {
                    return false;
                }
                self.enter_half_open();
                self.take_trial_permit()
            }
            CircuitState::HalfOpen => self.take_trial_permit(),
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.push_outcome(true);
                self.evaluate_closed();
            }
            CircuitState::HalfOpen => {
                self.trial_successes += 1;
                if self.trial_successes >= self.config.half_open_calls {
                    self.enter_closed();
                }
            }
            // A trial completing after the breaker re-opened changes nothing.
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.push_outcome(false);
                self.evaluate_closed();
            }
            CircuitState::HalfOpen => self.enter_open(),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn buffered_calls(&self) -> usize {
        self.outcomes.len()
    }

    fn push_outcome(&mut self, success: bool) {
        while self.outcomes.len() >= self.config.window_size as usize {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn evaluate_closed(&mut self) {
        if (self.outcomes.len() as u32) < self.config.min_calls {
            return;
        }
        let failures = self.outcomes.iter().filter(|success| !**success).count();
        let failure_rate = failures as f64 / self.outcomes.len() as f64;
        if failure_rate >= self.config.failure_rate_threshold {
            info!(
                failure_rate,
                threshold = self.config.failure_rate_threshold,
                buffered = self.outcomes.len(),
                "failure rate reached threshold, opening circuit"
            );
            self.enter_open();
        }
    }

    fn enter_open(&mut self) {
        self.state = CircuitState::Open;
        self.open_deadline = Some(Instant::now() + self.config.open_state_wait);
        self.half_open_permits = 0;
        self.trial_successes = 0;
    }

    fn enter_half_open(&mut self) {
        info!("open-state deadline passed, probing in half-open");
        self.state = CircuitState::HalfOpen;
        self.open_deadline = None;
        self.half_open_permits = self.config.half_open_calls;
        self.trial_successes = 0;
    }

    fn enter_closed(&mut self) {
        info!(
            trials = self.config.half_open_calls,
            "all trial calls succeeded, closing circuit"
        );
        self.state = CircuitState::Closed;
        self.outcomes.clear();
        self.half_open_permits = 0;
        self.trial_successes = 0;
    }

    fn take_trial_permit(&mut self) -> bool {
        if self.half_open_permits == 0 {
            return false;
        }
        self.half_open_permits -= 1;
        true
    }
}
