//! Online learning stack
//!
//! Feature engineering, a small ensemble of feed-forward networks trained
//! online, an AR/MA forecaster over the health signal, a statistical anomaly
//! detector, and the versioned byte codec for persisting the ensemble.

mod anomaly;
mod ensemble;
mod features;
mod forecaster;
mod network;
mod serialize;

pub use anomaly::AnomalyDetector;
pub use ensemble::EnsemblePredictor;
pub use features::{
    FeatureExtractor, FEATURE_COUNT, IDX_BUSINESS_HOURS, IDX_CONCURRENCY,
    IDX_CONCURRENCY_ERROR_PRODUCT, IDX_ERROR_RATE, IDX_ERROR_TREND, IDX_LATENCY,
    IDX_LATENCY_ERROR_PRODUCT, IDX_LATENCY_SQUARED, IDX_LATENCY_TREND,
    IDX_LOAD_LATENCY_PRODUCT, IDX_NIGHTTIME, IDX_RECENT_FAILURES, IDX_STABILITY_SCORE,
    IDX_SYSTEM_LOAD, IDX_TIME_OF_DAY,
};
pub use forecaster::TimeSeriesForecaster;
pub use network::NeuralNet;
pub use serialize::{decode_ensemble, encode_ensemble};
