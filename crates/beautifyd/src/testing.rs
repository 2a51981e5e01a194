//! Fakes for loop and session tests.

use beautify_core::canvas::TextStyle;
use beautify_core::{
    AdjustmentSpec, BoundingBox, CameraProvider, Canvas, Color, Constraints, DetectionOptions,
    DetectionResult, Descriptor, Detector, DetectorError, MediaSource, Point, ReadyState, SourceError,
};
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// Counts draw calls and completed frame blits.
#[derive(Debug, Default)]
pub struct CountingCanvas {
    size: (u32, u32),
    pub calls: u64,
    pub frames: u64,
}

impl Canvas for CountingCanvas {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.calls += 1;
    }
    fn clear(&mut self) {
        self.calls += 1;
    }
    fn set_adjustments(&mut self, _spec: &AdjustmentSpec) {
        self.calls += 1;
    }
    fn reset_adjustments(&mut self) {
        self.calls += 1;
    }
    fn draw_frame(&mut self, _frame: &RgbaImage, _mirrored: bool) {
        self.calls += 1;
        self.frames += 1;
    }
    fn stroke_rect(&mut self, _rect: BoundingBox, _color: Color, _line_width: u32) {
        self.calls += 1;
    }
    fn fill_circle(&mut self, _center: Point, _radius: u32, _color: Color) {
        self.calls += 1;
    }
    fn draw_text(&mut self, _text: &str, _baseline_left: Point, _style: TextStyle) {
        self.calls += 1;
    }
}

/// A source whose ready state the test controls.
pub struct ScriptedSource {
    state: Mutex<ReadyState>,
    frame: Arc<RgbaImage>,
    ended: Mutex<Option<String>>,
    pub stops: AtomicUsize,
}

impl ScriptedSource {
    pub fn ready(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(ReadyState::EnoughData),
            frame: Arc::new(RgbaImage::from_pixel(width, height, Rgba([90, 120, 150, 255]))),
            ended: Mutex::new(None),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    /// Simulate the tracks dying underneath the session.
    pub fn end(&self, reason: &str) {
        *self.ended.lock().unwrap() = Some(reason.to_string());
        self.set_state(ReadyState::Nothing);
    }
}

impl MediaSource for ScriptedSource {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }
    fn frame_size(&self) -> Option<(u32, u32)> {
        self.has_enough_data().then(|| self.frame.dimensions())
    }
    fn current_frame(&self) -> Option<Arc<RgbaImage>> {
        self.has_enough_data().then(|| self.frame.clone())
    }
    fn ended(&self) -> Option<String> {
        self.ended.lock().unwrap().clone()
    }
    fn stop_tracks(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(ReadyState::Nothing);
    }
}

/// Hands out one prepared source, or a fixed error.
pub struct ScriptedProvider {
    pub source: Arc<ScriptedSource>,
    pub error: Option<SourceError>,
    pub requests: AtomicUsize,
}

impl ScriptedProvider {
    pub fn granting(source: Arc<ScriptedSource>) -> Self {
        Self {
            source,
            error: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn denying(error: SourceError) -> Self {
        Self {
            source: Arc::new(ScriptedSource::ready(4, 4)),
            error: Some(error),
            requests: AtomicUsize::new(0),
        }
    }
}

impl CameraProvider for ScriptedProvider {
    fn request_access(&self, _constraints: &Constraints) -> Result<Arc<dyn MediaSource>, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.source.clone()),
        }
    }
}

pub fn face_with_descriptor(x: f32, values: Vec<f32>) -> DetectionResult {
    let mut face = DetectionResult::new(BoundingBox::new(x, 40.0, 60.0, 60.0), 0.9);
    face.descriptor = Some(Descriptor::new(values));
    face
}

/// Returns a fixed face list and records the options of every call.
pub struct FixedDetector {
    faces: Vec<DetectionResult>,
    pub calls: Mutex<Vec<DetectionOptions>>,
}

impl FixedDetector {
    pub fn new(faces: Vec<DetectionResult>) -> Self {
        Self {
            faces,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Detector for FixedDetector {
    fn detect_all(
        &self,
        _frame: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        self.calls.lock().unwrap().push(*options);
        Ok(self.faces.clone())
    }
}

/// Blocks inside `detect_all` until the test releases it.
pub struct GatedDetector {
    entered: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
    faces: Vec<DetectionResult>,
}

impl GatedDetector {
    /// Returns the detector, a signal fired on entry, and the release switch.
    pub fn new(
        faces: Vec<DetectionResult>,
    ) -> (Self, tokio::sync::oneshot::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(release_rx),
                faces,
            },
            entered_rx,
            release_tx,
        )
    }
}

impl Detector for GatedDetector {
    fn detect_all(
        &self,
        _frame: &RgbaImage,
        _options: &DetectionOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        if let Some(tx) = self.entered.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let _ = self.release.lock().unwrap().recv();
        Ok(self.faces.clone())
    }
}
