//! Detection loop: runs the detector on its own cadence and publishes
//! results to the shared snapshot.
//!
//! Inference runs on the blocking pool, so a slow model never holds up the
//! render loop; rendering keeps using the previous snapshot meanwhile.

use crate::snapshot::DetectionSnapshot;
use beautify_core::{DetectionOptions, Detector, MediaSource, RenderConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The loop was already stopped.
    Stopped,
    /// Detection is switched off for this configuration.
    Disabled,
    /// The source had no presentable frame.
    NotReady,
    /// A new snapshot with this many faces was published.
    Published(usize),
    /// The detector failed; an empty snapshot was published.
    Failed,
    /// The loop stopped while inference was in flight; the result was dropped.
    Discarded,
}

/// Everything a detection cycle reads. Built once per loop start.
#[derive(Clone)]
pub struct DetectionContext {
    pub detector: Arc<dyn Detector>,
    pub source: Arc<dyn MediaSource>,
    pub snapshot: DetectionSnapshot,
    pub options: DetectionOptions,
    pub enabled: bool,
}

/// Optional stages follow the overlays: expressions only when shown,
/// descriptors only while a reference is being matched.
pub fn options_for(base: DetectionOptions, config: &RenderConfig) -> DetectionOptions {
    DetectionOptions {
        landmarks: true,
        expressions: config.overlays.expressions,
        descriptors: config.overlays.face_matching && config.reference.is_some(),
        ..base
    }
}

/// One detection cycle. `running` is checked before the work starts and
/// again atomically with the snapshot write. A failed detector counts as
/// no detections.
pub async fn run_cycle(ctx: &DetectionContext, running: &AtomicBool) -> CycleOutcome {
    if !running.load(Ordering::SeqCst) {
        return CycleOutcome::Stopped;
    }
    if !ctx.enabled {
        return CycleOutcome::Disabled;
    }
    if !ctx.source.has_enough_data() {
        return CycleOutcome::NotReady;
    }
    let Some(frame) = ctx.source.current_frame() else {
        return CycleOutcome::NotReady;
    };

    let detector = ctx.detector.clone();
    let options = ctx.options;
    let result = tokio::task::spawn_blocking(move || detector.detect_all(&frame, &options)).await;

    let (faces, failed) = match result {
        Ok(Ok(faces)) => (faces, false),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "detection failed; no detections this cycle");
            (Vec::new(), true)
        }
        Err(e) => {
            tracing::warn!(error = %e, "detector task aborted");
            (Vec::new(), true)
        }
    };

    let count = faces.len();
    match ctx.snapshot.publish_if(running, faces) {
        None => {
            tracing::debug!(faces = count, "loop stopped during inference; result dropped");
            CycleOutcome::Discarded
        }
        Some(_) if failed => CycleOutcome::Failed,
        Some(_) => CycleOutcome::Published(count),
    }
}

pub struct DetectionLoop {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl DetectionLoop {
    /// Spawn the loop. A disabled context still ticks, so turning detection
    /// back on only costs one restart.
    pub fn start(ctx: DetectionContext, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(enabled = ctx.enabled, options = ?ctx.options, "detection loop started");

            loop {
                ticker.tick().await;
                if run_cycle(&ctx, &flag).await == CycleOutcome::Stopped {
                    break;
                }
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
            }
            tracing::debug!("detection loop stopped");
        });

        Self { running, task }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Clear the flag, then abort. An inference already on the blocking
    /// pool finishes, but its result is never published.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_with_descriptor, FixedDetector, GatedDetector, ScriptedSource};
    use beautify_core::{Descriptor, FilterSpec, OverlayToggles, ReadyState, UnloadedDetector};

    fn ctx(detector: Arc<dyn Detector>, source: Arc<ScriptedSource>, enabled: bool) -> DetectionContext {
        DetectionContext {
            detector,
            source,
            snapshot: DetectionSnapshot::new(),
            options: DetectionOptions::default(),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_cycle_publishes_faces() {
        let det = Arc::new(FixedDetector::new(vec![face_with_descriptor(10.0, vec![0.1])]));
        let c = ctx(det.clone(), Arc::new(ScriptedSource::ready(32, 24)), true);
        let running = AtomicBool::new(true);

        assert_eq!(run_cycle(&c, &running).await, CycleOutcome::Published(1));
        assert_eq!(c.snapshot.latest().generation, 1);
        assert_eq!(det.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cycle_skips_when_disabled_or_not_ready() {
        let det = Arc::new(FixedDetector::new(Vec::new()));
        let source = Arc::new(ScriptedSource::ready(32, 24));
        let running = AtomicBool::new(true);

        let off = ctx(det.clone(), source.clone(), false);
        assert_eq!(run_cycle(&off, &running).await, CycleOutcome::Disabled);

        source.set_state(ReadyState::Metadata);
        let on = ctx(det.clone(), source, true);
        assert_eq!(run_cycle(&on, &running).await, CycleOutcome::NotReady);
        assert_eq!(det.call_count(), 0);
    }

    #[tokio::test]
    async fn test_detector_failure_clears_faces() {
        let c = ctx(Arc::new(UnloadedDetector), Arc::new(ScriptedSource::ready(8, 8)), true);
        c.snapshot.publish(vec![face_with_descriptor(0.0, vec![0.0])]);
        let running = AtomicBool::new(true);

        for _ in 0..5 {
            assert_eq!(run_cycle(&c, &running).await, CycleOutcome::Failed);
        }
        assert_eq!(c.snapshot.latest().generation, 6);
        assert!(c.snapshot.faces().is_empty());
    }

    #[tokio::test]
    async fn test_result_after_stop_is_never_written() {
        let (gated, entered, release) = GatedDetector::new(vec![face_with_descriptor(5.0, vec![0.2])]);
        let c = ctx(Arc::new(gated), Arc::new(ScriptedSource::ready(16, 16)), true);
        let running = Arc::new(AtomicBool::new(true));

        let cycle = {
            let c = c.clone();
            let running = running.clone();
            tokio::spawn(async move { run_cycle(&c, &running).await })
        };

        entered.await.unwrap();
        running.store(false, Ordering::SeqCst);
        release.send(()).unwrap();

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        let snap = c.snapshot.latest();
        assert_eq!(snap.generation, 0);
        assert!(snap.faces.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_cadence_and_cancel() {
        let det = Arc::new(FixedDetector::new(Vec::new()));
        let lp = DetectionLoop::start(
            ctx(det.clone(), Arc::new(ScriptedSource::ready(8, 8)), true),
            Duration::from_millis(33),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls = det.call_count();
        assert!((3..=4).contains(&calls), "{calls} detector calls");

        lp.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(det.call_count(), calls);
        assert!(!lp.is_running());
    }

    #[test]
    fn test_options_follow_overlays() {
        let base = DetectionOptions { min_score: 0.6, ..DetectionOptions::default() };
        let mut config = RenderConfig::new(FilterSpec::default(), OverlayToggles::default(), true, None);

        let o = options_for(base, &config);
        assert!(o.landmarks && !o.expressions && !o.descriptors);
        assert_eq!(o.min_score, 0.6);

        config.overlays.expressions = true;
        config.overlays.face_matching = true;
        assert!(!options_for(base, &config).descriptors);

        config.reference = Some(Arc::new(Descriptor::new(vec![0.0; 4])));
        let o = options_for(base, &config);
        assert!(o.expressions && o.descriptors);
    }
}
