//! System load sampling
//!
//! Reads the one-minute load average from `/proc/loadavg`, cached for a few
//! seconds so the per-call path never touches the filesystem more than once
//! per refresh interval. On platforms without procfs the sampler reports the
//! last known value, initially zero.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Cached one-minute load average sampler
pub struct SystemLoad {
    cached: Mutex<(Instant, f64)>,
}

impl SystemLoad {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new((Instant::now(), read_loadavg().unwrap_or(0.0))),
        }
    }

    /// Current one-minute load average, refreshed at most every few seconds
    pub fn sample(&self) -> f64 {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if cached.0.elapsed() >= REFRESH_INTERVAL {
            if let Some(load) = read_loadavg() {
                cached.1 = load;
            }
            cached.0 = Instant::now();
        }
        cached.1
    }
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self::new()
    }
}

fn read_loadavg() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
    contents.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_finite_and_non_negative() {
        let sysload = SystemLoad::new();
        let load = sysload.sample();
        assert!(load.is_finite());
        assert!(load >= 0.0);
    }

    #[test]
    fn repeated_samples_use_cache() {
        let sysload = SystemLoad::new();
        let first = sysload.sample();
        let second = sysload.sample();
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
