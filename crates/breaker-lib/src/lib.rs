//! Adaptive circuit breaker for downstream service calls
//!
//! Unlike a classic three-state breaker with fixed thresholds, this breaker
//! feeds per-call telemetry into a small online learning pipeline that
//! forecasts call health, detects anomalous operating regimes, and rewrites
//! its own configuration in place while preserving breaker state. When any
//! learning component misbehaves the breaker degrades to classic behavior
//! on its current knobs.
//!
//! The crate provides:
//! - A bounded metric window with aggregate snapshots
//! - Feature engineering, an online neural ensemble, an AR/MA forecaster
//!   and a statistical anomaly detector
//! - An adaptive configuration manager with a significance gate
//! - The Closed/Open/HalfOpen state machine and the orchestrator that ties
//!   everything together
//! - Optional file-backed metric and model persistence with warm start

pub mod adaptive;
pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod observability;
pub mod persistence;
pub mod predictor;
mod reporter;

pub use breaker::{CircuitState, MlCircuitBreaker, MlCircuitBreakerBuilder};
pub use config::BreakerSettings;
pub use error::BreakerError;
pub use metrics::{MetricSnapshot, MetricWindow};
pub use models::{BreakerConfig, BreakerKnobs, CallRecord};
pub use predictor::{StaticThresholds, ThresholdModel, ThresholdPredictor, TickSummary};
