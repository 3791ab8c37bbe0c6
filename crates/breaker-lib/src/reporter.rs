//! Periodic reporting task
//!
//! One task per breaker, started at build time and stopped by the shutdown
//! signal. It emits the performance report on the configured interval and
//! flushes the metric sink between reports.

use crate::breaker::MlCircuitBreaker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) async fn run(breaker: Arc<MlCircuitBreaker>, mut shutdown: broadcast::Receiver<()>) {
    let report_interval = Duration::from_secs(breaker.settings().report_interval_secs.max(1));
    let mut report_ticker = interval_at(Instant::now() + report_interval, report_interval);
    let mut flush_ticker = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);

    info!(
        breaker = %breaker.settings().name,
        report_interval_secs = report_interval.as_secs(),
        "periodic reporter started"
    );

    loop {
        tokio::select! {
            _ = report_ticker.tick() => {
                breaker.monitor().log_report();
            }
            _ = flush_ticker.tick() => {
                if let Some(sink) = breaker.metrics_sink() {
                    if let Err(e) = sink.flush().await {
                        warn!(error = %e, "metric sink flush failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(breaker = %breaker.settings().name, "periodic reporter stopping");
                break;
            }
        }
    }
}
