//! ML breaker orchestrator
//!
//! Wraps a caller's operation: snapshots the metric window, drives the
//! learning stack, gates the call through the state machine, records the
//! outcome and feeds accuracy bookkeeping. Every learning-stack failure is
//! contained here; only `BreakerOpen` or the operation's own error ever
//! reach the caller.

use crate::adaptive::AdaptiveConfigManager;
use crate::breaker::state::{CircuitBreaker, CircuitState};
use crate::config::BreakerSettings;
use crate::error::BreakerError;
use crate::metrics::{MetricSnapshot, MetricWindow, SystemLoad};
use crate::models::{BreakerConfig, CallRecord};
use crate::observability::{MlMetrics, PerformanceMonitor};
use crate::persistence::{MetricsSink, ModelStore, PersistedSnapshot};
use crate::predictor::{StaticThresholds, ThresholdModel, ThresholdPredictor};
use crate::reporter;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Throughput is logged every this many operations
const OPS_LOG_INTERVAL: u64 = 1_000;

/// History replayed through the model at warm start
const WARM_REPLAY_LIMIT: usize = 500;
const WARM_LOOKBACK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct MlState {
    model: Box<dyn ThresholdModel>,
    config_manager: AdaptiveConfigManager,
}

/// Adaptive circuit breaker around a downstream dependency
pub struct MlCircuitBreaker {
    settings: BreakerSettings,
    window: MetricWindow,
    breaker: Mutex<CircuitBreaker>,
    ml: AsyncMutex<MlState>,
    ml_enabled: AtomicBool,
    /// Cleared when initialization fell back to safe defaults
    reconfig_enabled: bool,
    last_prediction_bits: AtomicU64,
    last_reconfig_ms: AtomicI64,
    op_count: AtomicU64,
    in_flight: AtomicU32,
    monitor: PerformanceMonitor,
    sysload: SystemLoad,
    sink: Option<Arc<dyn MetricsSink>>,
    model_store: Option<Arc<dyn ModelStore>>,
    shutdown_tx: broadcast::Sender<()>,
    reporter_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MlCircuitBreaker {
    pub fn builder() -> MlCircuitBreakerBuilder {
        MlCircuitBreakerBuilder::new()
    }

    /// Run `op` under breaker protection.
    ///
    /// Returns the operation's value, its error wrapped in
    /// [`BreakerError::Operation`], or [`BreakerError::Open`] when admission
    /// is denied. A denied call has no side effects and records no metric.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let snapshot = self.window.snapshot().unwrap_or_else(|e| {
            warn!(error = %e, "metric snapshot failed, substituting empty snapshot");
            MetricSnapshot::empty()
        });

        let count = self.op_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count % OPS_LOG_INTERVAL == 0 {
            info!(breaker = %self.settings.name, operations = count, "throughput checkpoint");
        }

        if let Some(sink) = &self.sink {
            let persisted = PersistedSnapshot::from_snapshot(
                &self.settings.name,
                chrono::Utc::now().timestamp_millis(),
                &snapshot,
            );
            if let Err(e) = sink.store(persisted).await {
                warn!(error = %e, "metric sink store failed");
            }
        }

        if self.ml_enabled.load(Ordering::Acquire) {
            self.ml_tick(&snapshot).await;
        }

        if !self.try_acquire() {
            return Err(BreakerError::Open);
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = op().await;
        let latency = start.elapsed();
        let in_flight = self.in_flight.load(Ordering::Acquire);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(value) => {
                self.record_outcome(true, latency, in_flight);
                Ok(value)
            }
            Err(cause) => {
                self.record_outcome(false, latency, in_flight);
                Err(BreakerError::Operation(cause))
            }
        }
    }

    /// Toggle ML updates and reconfiguration at runtime
    pub fn set_ml_enabled(&self, enabled: bool) {
        self.ml_enabled.store(enabled, Ordering::Release);
        info!(
            breaker = %self.settings.name,
            enabled,
            "ml-driven configuration toggled"
        );
    }

    pub fn ml_enabled(&self) -> bool {
        self.ml_enabled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CircuitState {
        self.lock_breaker().state()
    }

    pub fn current_config(&self) -> BreakerConfig {
        self.lock_breaker().config().clone()
    }

    /// Records currently held in the metric window
    pub fn recorded_calls(&self) -> usize {
        self.window.len()
    }

    /// Aggregate view of the metric window, empty on snapshot failure
    pub fn metrics_snapshot(&self) -> MetricSnapshot {
        self.window.snapshot().unwrap_or_else(|_| MetricSnapshot::empty())
    }

    pub fn last_prediction(&self) -> f64 {
        f64::from_bits(self.last_prediction_bits.load(Ordering::Acquire))
    }

    /// Stop the periodic task, persist the model and drain the sink
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self
            .reporter_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if let Some(store) = &self.model_store {
            let ml = self.ml.lock().await;
            if let Some(blob) = ml.model.export_model() {
                match store.save(&blob, &self.settings.name).await {
                    Ok(()) => info!(breaker = %self.settings.name, "model persisted on shutdown"),
                    Err(e) => warn!(error = %e, "model save failed on shutdown"),
                }
            }
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.shutdown().await {
                warn!(error = %e, "metric sink shutdown failed");
            }
        }
        info!(breaker = %self.settings.name, "breaker shut down");
    }

    /// One pass through the learning stack. Failures are logged and leave
    /// the previous knobs in place; an anomalous snapshot skips
    /// reconfiguration while the model still learns from the tick.
    async fn ml_tick(&self, snapshot: &MetricSnapshot) {
        let mut ml = self.ml.lock().await;
        match ml.model.observe(snapshot) {
            Ok(tick) => {
                self.last_prediction_bits
                    .store(tick.prediction.to_bits(), Ordering::Release);
                self.monitor.record_model_metrics(snapshot);

                if tick.anomalous {
                    debug!(
                        score = tick.anomaly_score,
                        "anomalous operating regime, skipping reconfiguration"
                    );
                } else if let Err(e) = self.replace_config_if_needed(&mut ml, snapshot) {
                    error!(error = %e, "config replacement failed, keeping current settings");
                }
            }
            Err(e) => {
                error!(error = %e, "model update failed, skipping tick");
            }
        }
    }

    /// Replace the breaker under the new configuration when the change is
    /// significant, preserving state. Rate limited to one replacement per
    /// configured interval.
    fn replace_config_if_needed(&self, ml: &mut MlState, snapshot: &MetricSnapshot) -> Result<()> {
        if !self.reconfig_enabled {
            return Ok(());
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let last_ms = self.last_reconfig_ms.load(Ordering::Acquire);
        if now_ms - last_ms < self.settings.reconfig_min_interval_ms as i64 {
            debug!(
                since_ms = now_ms - last_ms,
                "skipping config update, too soon since last replacement"
            );
            return Ok(());
        }

        let candidate = ml.config_manager.updated_config(ml.model.knobs());
        let mut breaker = self
            .breaker
            .lock()
            .map_err(|e| anyhow!("breaker lock poisoned: {e}"))?;

        if !ml.config_manager.is_significant(&candidate, breaker.config()) {
            return Ok(());
        }

        let old = breaker.config().clone();
        let state = breaker.state();
        let next = CircuitBreaker::with_state(candidate.clone(), &breaker);
        *breaker = next;
        drop(breaker);

        self.last_reconfig_ms.store(now_ms, Ordering::Release);
        self.monitor
            .record_parameter_change(&candidate, snapshot.error_rate);
        info!(
            breaker = %self.settings.name,
            ?state,
            old_window = old.window_size,
            new_window = candidate.window_size,
            old_threshold = old.failure_rate_threshold,
            new_threshold = candidate.failure_rate_threshold,
            old_wait_ms = old.open_state_wait.as_millis() as u64,
            new_wait_ms = candidate.open_state_wait.as_millis() as u64,
            prediction = ml.model.last_prediction(),
            error_rate = snapshot.error_rate,
            p95_latency_ms = snapshot.p95_latency_ms,
            "applied breaker reconfiguration"
        );
        Ok(())
    }

    fn try_acquire(&self) -> bool {
        self.lock_breaker().try_acquire()
    }

    fn record_outcome(&self, success: bool, latency: Duration, in_flight: u32) {
        {
            let mut breaker = self.lock_breaker();
            if success {
                breaker.on_success();
            } else {
                breaker.on_failure();
            }
        }

        let record = CallRecord::new(
            chrono::Utc::now().timestamp_millis(),
            latency,
            success,
            in_flight,
            self.sysload.sample(),
        );
        self.window.record(record);
        self.monitor
            .record_prediction_accuracy(success, self.last_prediction());
    }

    /// The state machine must stay operational even after a panic in
    /// another thread, so lock poisoning is recovered rather than surfaced.
    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub(crate) fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub(crate) fn metrics_sink(&self) -> Option<&Arc<dyn MetricsSink>> {
        self.sink.as_ref()
    }
}

/// Assembles a breaker with its optional collaborators
pub struct MlCircuitBreakerBuilder {
    settings: BreakerSettings,
    sink: Option<Arc<dyn MetricsSink>>,
    model_store: Option<Arc<dyn ModelStore>>,
    model: Option<Box<dyn ThresholdModel>>,
}

impl MlCircuitBreakerBuilder {
    pub fn new() -> Self {
        Self {
            settings: BreakerSettings::default(),
            sink: None,
            model_store: None,
            model: None,
        }
    }

    pub fn settings(mut self, settings: BreakerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn model_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.model_store = Some(store);
        self
    }

    /// Install a custom threshold model instead of the default predictor
    pub fn model(mut self, model: Box<dyn ThresholdModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Build the breaker and start its periodic task.
    ///
    /// If the learning stack fails to initialize, the breaker comes up on
    /// safe defaults with ML-driven reconfiguration disabled; it is always
    /// fully operational.
    pub async fn build(self) -> Arc<MlCircuitBreaker> {
        let settings = self.settings;
        let initial_config = settings.initial_config();

        let mut ml_enabled = settings.ml_enabled;
        let mut reconfig_enabled = true;

        let model: Box<dyn ThresholdModel> = match self.model {
            Some(custom) => custom,
            None => match ThresholdPredictor::new(
                settings.initial_knobs(),
                settings.training_interval,
            ) {
                Ok(mut predictor) => {
                    if let Some(store) = &self.model_store {
                        match store.load(&settings.name).await {
                            Ok(Some(blob)) => match predictor.restore_ensemble(&blob) {
                                Ok(()) => {
                                    info!(breaker = %settings.name, "restored persisted model")
                                }
                                Err(e) => {
                                    warn!(error = %e, "persisted model rejected, starting fresh")
                                }
                            },
                            Ok(None) => debug!("no persisted model found"),
                            Err(e) => warn!(error = %e, "model load failed, starting fresh"),
                        }
                    }
                    Box::new(predictor)
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "ml initialization failed, running on safe defaults with \
                         reconfiguration disabled"
                    );
                    ml_enabled = false;
                    reconfig_enabled = false;
                    Box::new(StaticThresholds::new())
                }
            },
        };

        let mut ml_state = MlState {
            model,
            config_manager: AdaptiveConfigManager::new(
                settings.significant_change,
                settings.min_calls,
                settings.half_open_calls,
            ),
        };

        if ml_enabled {
            if let Some(sink) = &self.sink {
                match sink.load_historical(&settings.name, WARM_LOOKBACK).await {
                    Ok(history) if !history.is_empty() => {
                        let skip = history.len().saturating_sub(WARM_REPLAY_LIMIT);
                        let mut replayed = 0usize;
                        for persisted in history.iter().skip(skip) {
                            if ml_state.model.observe(&persisted.to_snapshot()).is_ok() {
                                replayed += 1;
                            }
                        }
                        info!(breaker = %settings.name, replayed, "warm start replay complete");
                    }
                    Ok(_) => debug!("no historical metrics for warm start"),
                    Err(e) => warn!(error = %e, "warm start load failed, starting cold"),
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let window_capacity = settings.window_capacity;
        let breaker = Arc::new(MlCircuitBreaker {
            window: MetricWindow::new(window_capacity),
            breaker: Mutex::new(CircuitBreaker::new(initial_config)),
            ml: AsyncMutex::new(ml_state),
            ml_enabled: AtomicBool::new(ml_enabled),
            reconfig_enabled,
            last_prediction_bits: AtomicU64::new(0.5f64.to_bits()),
            last_reconfig_ms: AtomicI64::new(0),
            op_count: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            monitor: PerformanceMonitor::new(MlMetrics::new()),
            sysload: SystemLoad::new(),
            sink: self.sink,
            model_store: self.model_store,
            shutdown_tx,
            reporter_handle: Mutex::new(None),
            settings,
        });

        let handle = tokio::spawn(reporter::run(Arc::clone(&breaker), shutdown_rx));
        *breaker
            .reporter_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            breaker = %breaker.settings.name,
            ml_enabled,
            window = breaker.current_config().window_size,
            threshold = breaker.current_config().failure_rate_threshold,
            wait_ms = breaker.current_config().open_state_wait.as_millis() as u64,
            "ml circuit breaker initialized"
        );
        breaker
    }
}

impl Default for MlCircuitBreakerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
