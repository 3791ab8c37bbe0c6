//! File-backed persistence
//!
//! The metric sink buffers snapshots in memory and flushes them as one JSON
//! document written atomically through a temp file rename. The model store
//! keeps one opaque blob per service under a sanitized file name.

use super::{MetricsSink, ModelStore, PersistedSnapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum snapshots retained between flushes
const MAX_BUFFERED: usize = 10_000;

/// JSON-file metric sink with an in-memory buffer
pub struct FileMetricsSink {
    path: PathBuf,
    buffer: Mutex<VecDeque<PersistedSnapshot>>,
    dirty: AtomicBool,
}

impl FileMetricsSink {
    pub fn new(path: PathBuf) -> Self {
        let mut buffer = VecDeque::new();
        if path.exists() {
            match read_snapshots(&path) {
                Ok(existing) => {
                    info!(path = %path.display(), entries = existing.len(), "loaded persisted metrics");
                    buffer = existing.into_iter().collect();
                }
                Err(e) => warn!(error = %e, "failed to load persisted metrics, starting fresh"),
            }
        }
        Self {
            path,
            buffer: Mutex::new(buffer),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn write_atomically(&self, snapshots: &[PersistedSnapshot]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }

        let json = serde_json::to_vec(snapshots).context("failed to serialize snapshots")?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("failed to create temp file {temp_path:?}"))?;
        file.write_all(&json).context("failed to write snapshots")?;
        file.sync_all().context("failed to sync snapshot file")?;

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to rename {temp_path:?} to {:?}", self.path))?;
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for FileMetricsSink {
    async fn store(&self, snapshot: PersistedSnapshot) -> Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        while buffer.len() >= MAX_BUFFERED {
            buffer.pop_front();
        }
        buffer.push_back(snapshot);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn load_historical(
        &self,
        breaker: &str,
        lookback: Duration,
    ) -> Result<Vec<PersistedSnapshot>> {
        let cutoff = chrono::Utc::now().timestamp_millis() - lookback.as_millis() as i64;
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        Ok(buffer
            .iter()
            .filter(|s| s.breaker == breaker && s.timestamp_ms >= cutoff)
            .cloned()
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let snapshots: Vec<PersistedSnapshot> = {
            let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.iter().cloned().collect()
        };
        self.write_atomically(&snapshots)?;
        debug!(path = %self.path.display(), entries = snapshots.len(), "metrics flushed to disk");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.flush().await
    }
}

fn read_snapshots(path: &Path) -> Result<Vec<PersistedSnapshot>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    serde_json::from_slice(&bytes).context("failed to parse persisted snapshots")
}

/// One model blob per service in a directory
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn model_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{}.model", sanitize(service)))
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, model: &[u8], service: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create model directory {:?}", self.dir))?;

        let path = self.model_path(service);
        let temp_path = path.with_extension("model.tmp");
        std::fs::write(&temp_path, model)
            .with_context(|| format!("failed to write model to {temp_path:?}"))?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("failed to rename {temp_path:?} to {path:?}"))?;

        info!(service, path = %path.display(), bytes = model.len(), "model saved");
        Ok(())
    }

    async fn load(&self, service: &str) -> Result<Option<Vec<u8>>> {
        let path = self.model_path(service);
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read model {path:?}"))?;
        Ok(Some(bytes))
    }
}

fn sanitize(service: &str) -> String {
    service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(breaker: &str, timestamp_ms: i64) -> PersistedSnapshot {
        PersistedSnapshot {
            breaker: breaker.to_string(),
            timestamp_ms,
            p95_latency_ms: 100.0,
            error_rate: 0.1,
            concurrency: 2.0,
            system_load: 1.0,
            samples: 10,
        }
    }

    #[tokio::test]
    async fn store_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let now = chrono::Utc::now().timestamp_millis();

        let sink = FileMetricsSink::new(path.clone());
        sink.store(snapshot("checkout", now)).await.unwrap();
        sink.store(snapshot("checkout", now - 1_000)).await.unwrap();
        sink.flush().await.unwrap();
        assert!(path.exists());

        let reloaded = FileMetricsSink::new(path);
        assert_eq!(reloaded.buffered(), 2);
        let historical = reloaded
            .load_historical("checkout", Duration::from_secs(3_600))
            .await
            .unwrap();
        assert_eq!(historical.len(), 2);
    }

    #[tokio::test]
    async fn load_historical_filters_by_breaker_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileMetricsSink::new(dir.path().join("metrics.json"));
        let now = chrono::Utc::now().timestamp_millis();

        sink.store(snapshot("checkout", now)).await.unwrap();
        sink.store(snapshot("payments", now)).await.unwrap();
        sink.store(snapshot("checkout", now - 100_000)).await.unwrap();

        let recent = sink
            .load_historical("checkout", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn flush_without_new_data_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let sink = FileMetricsSink::new(path.clone());
        sink.flush().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn buffer_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileMetricsSink::new(dir.path().join("metrics.json"));
        let now = chrono::Utc::now().timestamp_millis();
        for i in 0..(MAX_BUFFERED + 50) {
            sink.store(snapshot("checkout", now + i as i64)).await.unwrap();
        }
        assert_eq!(sink.buffered(), MAX_BUFFERED);
    }

    #[tokio::test]
    async fn model_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileModelStore::new(dir.path().to_path_buf());

        assert!(store.load("checkout").await.unwrap().is_none());
        store.save(b"model-bytes", "checkout").await.unwrap();
        let loaded = store.load("checkout").await.unwrap().unwrap();
        assert_eq!(loaded, b"model-bytes");
    }

    #[tokio::test]
    async fn model_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileModelStore::new(dir.path().to_path_buf());
        store.save(b"x", "svc/with:odd chars").await.unwrap();
        assert!(dir.path().join("svc_with_odd_chars.model").exists());
    }
}
