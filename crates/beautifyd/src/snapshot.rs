//! Latest detection results, shared between the loops and the UI.
//!
//! One value, two read patterns: the render loop peeks with [`latest`]
//! and never waits; UI-facing code [`subscribe`]s and is woken on change.
//!
//! [`latest`]: DetectionSnapshot::latest
//! [`subscribe`]: DetectionSnapshot::subscribe

use beautify_core::DetectionResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Bumped on every publish, so readers can tell a repeat from an update.
    pub generation: u64,
    pub faces: Arc<[DetectionResult]>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            faces: Arc::from(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSnapshot {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for DetectionSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionSnapshot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current value. Cheap: faces are shared, not copied.
    pub fn latest(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn faces(&self) -> Arc<[DetectionResult]> {
        self.tx.borrow().faces.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Replace the whole value. Returns the new generation.
    pub fn publish(&self, faces: Vec<DetectionResult>) -> u64 {
        let faces: Arc<[DetectionResult]> = faces.into();
        let mut generation = 0;
        self.tx.send_modify(|snap| {
            snap.generation += 1;
            snap.faces = faces;
            generation = snap.generation;
        });
        generation
    }

    /// Publish only while `running` is set. The flag is read under the
    /// channel's write lock, so a writer that clears it and then calls
    /// [`clear`](Self::clear) can never be overtaken by this publish.
    pub fn publish_if(&self, running: &AtomicBool, faces: Vec<DetectionResult>) -> Option<u64> {
        let mut generation = None;
        self.tx.send_if_modified(|snap| {
            if !running.load(Ordering::SeqCst) {
                return false;
            }
            snap.generation += 1;
            snap.faces = faces.into();
            generation = Some(snap.generation);
            true
        });
        generation
    }

    /// Drop stale faces when the session ends.
    pub fn clear(&self) {
        self.publish(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beautify_core::BoundingBox;

    fn face(score: f32) -> DetectionResult {
        DetectionResult::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), score)
    }

    #[test]
    fn test_starts_empty() {
        let s = DetectionSnapshot::new();
        let snap = s.latest();
        assert_eq!(snap.generation, 0);
        assert!(snap.faces.is_empty());
    }

    #[test]
    fn test_publish_replaces_whole_value() {
        let s = DetectionSnapshot::new();
        s.publish(vec![face(0.9), face(0.8)]);
        assert_eq!(s.publish(vec![face(0.7)]), 2);
        let snap = s.latest();
        assert_eq!(snap.generation, 2);
        assert_eq!(snap.faces.len(), 1);
        assert_eq!(snap.faces[0].score, 0.7);
    }

    #[test]
    fn test_clones_share_the_value() {
        let writer = DetectionSnapshot::new();
        let reader = writer.clone();
        writer.publish(vec![face(0.5)]);
        assert_eq!(reader.faces().len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_sees_update() {
        let s = DetectionSnapshot::new();
        let mut rx = s.subscribe();
        s.publish(vec![face(0.6)]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().faces.len(), 1);
    }

    #[test]
    fn test_publish_if_checks_flag() {
        let s = DetectionSnapshot::new();
        let running = AtomicBool::new(true);
        assert_eq!(s.publish_if(&running, vec![face(0.9)]), Some(1));

        running.store(false, Ordering::SeqCst);
        s.clear();
        assert_eq!(s.publish_if(&running, vec![face(0.8)]), None);
        let snap = s.latest();
        assert_eq!(snap.generation, 2);
        assert!(snap.faces.is_empty());
    }

    #[test]
    fn test_generations_never_repeat() {
        let s = DetectionSnapshot::new();
        let running = AtomicBool::new(true);
        s.clear();
        assert_eq!(s.publish_if(&running, Vec::new()), Some(2));
        s.clear();
        assert_eq!(s.latest().generation, 3);
    }

    #[test]
    fn test_clear() {
        let s = DetectionSnapshot::new();
        s.publish(vec![face(0.6)]);
        s.clear();
        assert!(s.faces().is_empty());
        assert_eq!(s.latest().generation, 2);
    }
}
