//! Export sink for captured stills and the capture flash.

use beautify_core::capture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Writes encoded stills into a directory under timestamped names.
#[derive(Debug, Clone)]
pub struct ExportSink {
    dir: PathBuf,
}

impl ExportSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Write `bytes` as `beautify-me-<unix-millis>.png`, creating the
    /// directory if needed.
    pub async fn save(&self, bytes: &[u8], unix_millis: i64) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ExportError::CreateDir {
                path: self.dir.display().to_string(),
                source,
            })?;

        let path = self.dir.join(capture::suggested_filename(unix_millis));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| ExportError::Write {
                path: path.display().to_string(),
                source,
            })?;

        tracing::info!(path = %path.display(), bytes = bytes.len(), "capture saved");
        Ok(path)
    }
}

/// Brief full-screen flash shown when a still is taken.
///
/// Runs on its own timer; triggering never waits on the encode.
#[derive(Debug, Clone, Default)]
pub struct Flash {
    /// Incremented per trigger; a timer only clears the flash it started.
    epoch: Arc<AtomicU64>,
    lit: Arc<AtomicU64>,
}

impl Flash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, duration: Duration) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.lit.store(epoch, Ordering::SeqCst);

        let lit = self.lit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = lit.compare_exchange(epoch, 0, Ordering::SeqCst, Ordering::SeqCst);
        });
    }

    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::SeqCst) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ExportSink::new(dir.path().join("shots"));

        let path = sink.save(b"png-bytes", 1_700_000_000_000).await.unwrap();
        assert_eq!(path, dir.path().join("shots/beautify-me-1700000000000.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_save_into_a_file_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = ExportSink::new(blocker).save(b"png", 1).await.unwrap_err();
        assert!(matches!(err, ExportError::CreateDir { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_clears_after_duration() {
        let flash = Flash::new();
        flash.trigger(Duration::from_millis(200));
        assert!(flash.is_lit());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(flash.is_lit());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!flash.is_lit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_extends_flash() {
        let flash = Flash::new();
        flash.trigger(Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(150)).await;
        flash.trigger(Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(flash.is_lit());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!flash.is_lit());
    }
}
