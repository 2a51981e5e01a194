//! beautify-core — Real-time webcam beautification pipeline.
//!
//! Maps filter selections to image adjustments, composites mirrored video
//! frames with face-analysis overlays, manages user-placed stickers and
//! exports still captures. Camera and face-detection back ends plug in
//! through the [`source`] and [`detector`] traits.

pub mod adjust;
pub mod canvas;
pub mod capture;
pub mod compositor;
pub mod detector;
pub mod filter;
mod font;
pub mod matching;
pub mod source;
pub mod stickers;
pub mod types;

pub use canvas::{Canvas, Color, Mirror, Surface};
pub use compositor::{render_clean, render_frame, LandmarkMode, OverlayToggles, RenderConfig, RenderOutcome};
pub use detector::{Detector, DetectorError, UnloadedDetector};
pub use filter::{compute_adjustments, Adjustment, AdjustmentSpec, FilterId, FilterSpec};
pub use matching::{select_reference, ReferenceError};
pub use source::{CameraProvider, Constraints, FrameSlot, MediaSource, ReadyState, SourceError};
pub use stickers::{PlacedSticker, StickerBoard, StickerError, StickerTemplate};
pub use types::{BoundingBox, Descriptor, DetectionOptions, DetectionResult, Emotion, Expressions, Point};
