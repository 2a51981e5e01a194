//! Camera collaborator contracts and the shared frame slot.

use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera device found: {0}")]
    NoDevice(String),
    #[error("camera error: {0}")]
    Other(String),
}

/// Requested capture format. Audio is never captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub width: u32,
    pub height: u32,
    pub audio: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            audio: false,
        }
    }
}

/// How much data a source has buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Nothing captured yet, or the tracks were stopped.
    Nothing,
    /// Format negotiated, no complete frame yet.
    Metadata,
    /// A complete frame can be presented.
    EnoughData,
}

/// A live video source.
pub trait MediaSource: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    fn has_enough_data(&self) -> bool {
        self.ready_state() == ReadyState::EnoughData
    }

    /// Dimensions of the current frame, if one exists.
    fn frame_size(&self) -> Option<(u32, u32)>;

    /// Latest complete frame. Cheap: frames are shared, not copied.
    fn current_frame(&self) -> Option<Arc<RgbaImage>>;

    /// Why the tracks ended on their own (unplugged, dequeue failure).
    /// `None` while live and after a regular stop.
    fn ended(&self) -> Option<String> {
        None
    }

    /// Release the underlying hardware before returning. Idempotent.
    fn stop_tracks(&self);
}

/// Grants access to a camera.
pub trait CameraProvider: Send + Sync {
    fn request_access(&self, constraints: &Constraints) -> Result<Arc<dyn MediaSource>, SourceError>;
}

/// Single-slot frame buffer: a capture thread publishes, loops read.
///
/// Publishing replaces the whole frame, so readers never see a partially
/// written image.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: RwLock<Option<Arc<RgbaImage>>>,
    negotiated: AtomicBool,
    stopped: AtomicBool,
    ended: RwLock<Option<String>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the format as negotiated before the first frame arrives.
    pub fn set_negotiated(&self) {
        self.negotiated.store(true, Ordering::SeqCst);
    }

    pub fn publish(&self, frame: RgbaImage) {
        if self.is_stopped() {
            return;
        }
        let frame = Arc::new(frame);
        match self.frame.write() {
            Ok(mut slot) => *slot = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        match self.frame.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    /// Stop because the producer failed. The first reason sticks.
    pub fn end(&self, reason: impl Into<String>) {
        match self.ended.write() {
            Ok(mut ended) => {
                ended.get_or_insert_with(|| reason.into());
            }
            Err(poisoned) => {
                poisoned.into_inner().get_or_insert_with(|| reason.into());
            }
        }
        self.stop();
    }

    fn read(&self) -> Option<Arc<RgbaImage>> {
        match self.frame.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl MediaSource for FrameSlot {
    fn ready_state(&self) -> ReadyState {
        if self.is_stopped() {
            ReadyState::Nothing
        } else if self.read().is_some() {
            ReadyState::EnoughData
        } else if self.negotiated.load(Ordering::SeqCst) {
            ReadyState::Metadata
        } else {
            ReadyState::Nothing
        }
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        self.read().map(|f| f.dimensions())
    }

    fn current_frame(&self) -> Option<Arc<RgbaImage>> {
        if self.is_stopped() {
            return None;
        }
        self.read()
    }

    fn ended(&self) -> Option<String> {
        match self.ended.read() {
            Ok(ended) => ended.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn stop_tracks(&self) {
        self.stop();
    }
}
