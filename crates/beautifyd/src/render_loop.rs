//! Render loop: composites the latest frame at a fixed rate.
//!
//! Each loop owns a frozen [`RenderConfig`]. Changing the filter or the
//! overlays means cancelling this loop and starting another, so a tick
//! never runs against a configuration it did not start with.
//!
//! When the source ends on its own the loop exits and rings `source_ended`
//! so the session can tear down.

use crate::snapshot::DetectionSnapshot;
use beautify_core::{render_frame, Canvas, MediaSource, RenderConfig, RenderOutcome};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct RenderLoop {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RenderLoop {
    /// Spawn a loop drawing `source` onto `canvas` every `interval`.
    /// `drawn` counts frames that were actually composited.
    pub fn start<C>(
        source: Arc<dyn MediaSource>,
        canvas: Arc<Mutex<C>>,
        config: Arc<RenderConfig>,
        snapshot: DetectionSnapshot,
        interval: Duration,
        drawn: Arc<AtomicU64>,
        source_ended: Arc<Notify>,
    ) -> Self
    where
        C: Canvas + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(filter = %config.filter.id, ?interval, "render loop started");

            loop {
                ticker.tick().await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(reason) = source.ended() {
                    tracing::warn!(%reason, "camera source ended");
                    source_ended.notify_one();
                    break;
                }

                // Filtering is CPU-bound; keep it off the runtime workers.
                let frame = {
                    let (source, canvas, config, flag) =
                        (source.clone(), canvas.clone(), config.clone(), flag.clone());
                    let faces = snapshot.faces();
                    tokio::task::spawn_blocking(move || {
                        if !flag.load(Ordering::SeqCst) {
                            return Ok(RenderOutcome::Skipped);
                        }
                        match canvas.lock() {
                            Ok(mut canvas) => Ok(render_frame(source.as_ref(), &mut *canvas, &config, &faces)),
                            Err(_) => Err(()),
                        }
                    })
                    .await
                };
                match frame {
                    Ok(Ok(RenderOutcome::Drawn)) => {
                        drawn.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Ok(RenderOutcome::Skipped)) => tracing::trace!("source not ready; frame skipped"),
                    Ok(Err(())) => {
                        tracing::warn!("display surface lock poisoned; render loop exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "render task failed; render loop exiting");
                        break;
                    }
                }
            }
            tracing::debug!("render loop stopped");
        });

        Self { running, task }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Clear the flag and abort the pending tick. Takes effect before the
    /// next tick even if the task is mid-await.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}
