//! Camera session: the source, both loops, the filter selection, the
//! face-matching reference and the sticker board.
//!
//! A [`Session`] is owned by a single task; everything else talks to it
//! through a cloneable [`SessionHandle`] (request channel plus oneshot
//! replies), so session state never needs a lock.

use crate::config::Config;
use crate::detection_loop::{self, DetectionContext, DetectionLoop};
use crate::export::{ExportError, ExportSink, Flash};
use crate::render_loop::RenderLoop;
use crate::snapshot::DetectionSnapshot;
use beautify_core::capture::{self, BadgeArt, CaptureError};
use beautify_core::{
    render_clean, select_reference, BoundingBox, CameraProvider, Constraints, Descriptor,
    DetectionOptions, Detector, DetectorError, FilterId, FilterSpec, MediaSource, OverlayToggles,
    PlacedSticker, Point, ReferenceError, RenderConfig, SourceError, StickerBoard, StickerError,
    Surface,
};
use image::RgbaImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera device: {0}")]
    NoDevice(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("camera is not active")]
    NotActive,
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Sticker(#[from] StickerError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("session task exited")]
    ChannelClosed,
}

impl From<SourceError> for SessionError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            SourceError::NoDevice(msg) => SessionError::NoDevice(msg),
            SourceError::Other(msg) => SessionError::Camera(msg),
        }
    }
}

fn task_failed(e: tokio::task::JoinError) -> SessionError {
    SessionError::Task(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Inactive,
    Requesting,
    Active,
}

/// Timing and capture parameters taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub constraints: Constraints,
    pub render_interval: Duration,
    pub detection_interval: Duration,
    pub detection: DetectionOptions,
    pub flash: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            constraints: config.constraints(),
            render_interval: config.render_interval(),
            detection_interval: config.detection_interval(),
            detection: config.detection_options(),
            flash: config.flash_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub camera: CameraState,
    pub frame_size: Option<(u32, u32)>,
    pub filter: FilterId,
    pub filter_name: &'static str,
    pub intensity: u8,
    pub beauty: bool,
    pub css: String,
    pub detection_enabled: bool,
    pub overlays: OverlayToggles,
    pub faces: usize,
    pub snapshot_generation: u64,
    pub reference_active: bool,
    pub stickers: usize,
    pub dragging: Option<String>,
    pub frames_rendered: u64,
    pub flash: bool,
}

pub struct Session {
    provider: Arc<dyn CameraProvider>,
    detector: Arc<dyn Detector>,
    settings: SessionSettings,
    sink: ExportSink,
    state: CameraState,
    source: Option<Arc<dyn MediaSource>>,
    filter: FilterSpec,
    overlays: OverlayToggles,
    detection_enabled: bool,
    reference: Option<Arc<Descriptor>>,
    stickers: StickerBoard,
    snapshot: DetectionSnapshot,
    display: Arc<Mutex<Surface>>,
    frames_rendered: Arc<AtomicU64>,
    flash: Flash,
    render: Option<RenderLoop>,
    detection: Option<DetectionLoop>,
    source_ended: Arc<Notify>,
}

impl Session {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        detector: Arc<dyn Detector>,
        settings: SessionSettings,
        sink: ExportSink,
    ) -> Self {
        Self {
            provider,
            detector,
            settings,
            sink,
            state: CameraState::Inactive,
            source: None,
            filter: FilterSpec::default(),
            overlays: OverlayToggles::default(),
            detection_enabled: false,
            reference: None,
            stickers: StickerBoard::new(),
            snapshot: DetectionSnapshot::new(),
            display: Arc::new(Mutex::new(Surface::new(0, 0))),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            flash: Flash::new(),
            render: None,
            detection: None,
            source_ended: Arc::new(Notify::new()),
        }
    }

    pub fn snapshot(&self) -> &DetectionSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Request the camera and start both loops. Starting an active session
    /// is a no-op.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state == CameraState::Active {
            return Ok(());
        }
        self.state = CameraState::Requesting;

        let provider = self.provider.clone();
        let constraints = self.settings.constraints;
        let granted = tokio::task::spawn_blocking(move || provider.request_access(&constraints))
            .await
            .map_err(task_failed)
            .and_then(|r| r.map_err(SessionError::from));

        match granted {
            Ok(source) => {
                self.source = Some(source);
                self.state = CameraState::Active;
                tracing::info!(
                    width = constraints.width,
                    height = constraints.height,
                    "camera session started"
                );
                self.restart_loops();
                Ok(())
            }
            Err(e) => {
                self.state = CameraState::Inactive;
                tracing::warn!(error = %e, "camera session failed to start");
                Err(e)
            }
        }
    }

    /// Stop an active session whose source ended on its own. Returns
    /// whether it did.
    pub fn check_source(&mut self) -> bool {
        if self.state != CameraState::Active {
            return false;
        }
        let Some(reason) = self.source.as_ref().and_then(|s| s.ended()) else {
            return false;
        };
        tracing::warn!(%reason, "camera lost; stopping session");
        self.stop();
        true
    }

    /// Tear the session down. Every step runs regardless of the others:
    /// render loop, detection loop, tracks, source, filter.
    pub fn stop(&mut self) {
        if let Some(render) = self.render.take() {
            render.cancel();
        }
        if let Some(detection) = self.detection.take() {
            detection.cancel();
        }
        if let Some(source) = self.source.take() {
            source.stop_tracks();
        }
        self.filter = FilterSpec::default();
        self.snapshot.clear();

        if self.state != CameraState::Inactive {
            tracing::info!("camera session stopped");
        }
        self.state = CameraState::Inactive;
    }

    /// Cancel both loops and, while active, start fresh ones from the
    /// current selection.
    fn restart_loops(&mut self) {
        if let Some(render) = self.render.take() {
            render.cancel();
        }
        if let Some(detection) = self.detection.take() {
            detection.cancel();
        }
        let (CameraState::Active, Some(source)) = (self.state, self.source.clone()) else {
            return;
        };

        let config = Arc::new(RenderConfig::new(
            self.filter,
            self.overlays,
            self.detection_enabled,
            self.reference.clone(),
        ));
        let options = detection_loop::options_for(self.settings.detection, &config);

        self.render = Some(RenderLoop::start(
            source.clone(),
            self.display.clone(),
            config,
            self.snapshot.clone(),
            self.settings.render_interval,
            self.frames_rendered.clone(),
            self.source_ended.clone(),
        ));
        self.detection = Some(DetectionLoop::start(
            DetectionContext {
                detector: self.detector.clone(),
                source,
                snapshot: self.snapshot.clone(),
                options,
                enabled: self.detection_enabled,
            },
            self.settings.detection_interval,
        ));
        tracing::debug!(filter = %self.filter.id, detection = self.detection_enabled, "loops restarted");
    }

    pub fn set_filter(&mut self, id: &str, intensity: i32, beauty: bool) -> FilterSpec {
        self.filter = FilterSpec::new(FilterId::from_id(id), intensity, beauty);
        tracing::info!(filter = %self.filter.id, intensity = self.filter.intensity, beauty, "filter set");
        self.restart_loops();
        self.filter
    }

    pub fn set_overlays(&mut self, overlays: OverlayToggles) {
        self.overlays = overlays;
        self.restart_loops();
    }

    /// Turning detection off clears the faces only after the old loop is
    /// cancelled, so none of its results can land afterwards.
    pub fn set_detection(&mut self, enabled: bool) {
        self.detection_enabled = enabled;
        self.restart_loops();
        if !enabled {
            self.snapshot.clear();
        }
    }

    fn active_source(&self) -> Result<Arc<dyn MediaSource>, SessionError> {
        match (&self.state, &self.source) {
            (CameraState::Active, Some(source)) => Ok(source.clone()),
            _ => Err(SessionError::NotActive),
        }
    }

    /// Detect faces in the current frame; exactly one becomes the match
    /// reference and turns face matching on. Otherwise nothing changes.
    pub async fn capture_reference(&mut self) -> Result<(), SessionError> {
        let source = self.active_source()?;
        let frame = source
            .current_frame()
            .filter(|_| source.has_enough_data())
            .ok_or_else(|| ReferenceError::NotReady("camera has no frame yet".into()))?;

        let detector = self.detector.clone();
        let options = DetectionOptions {
            landmarks: true,
            descriptors: true,
            ..self.settings.detection
        };
        let faces = tokio::task::spawn_blocking(move || detector.detect_all(&frame, &options))
            .await
            .map_err(task_failed)??;

        let descriptor = match select_reference(&faces) {
            Ok(d) => d,
            Err(e) => {
                tracing::info!(faces = faces.len(), error = %e, "reference capture rejected");
                return Err(e.into());
            }
        };

        self.reference = Some(Arc::new(descriptor));
        self.overlays.face_matching = true;
        tracing::info!("reference face captured");
        self.restart_loops();
        Ok(())
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
        self.overlays.face_matching = false;
        self.restart_loops();
    }

    pub fn add_sticker(&mut self, template_id: &str) -> Result<String, SessionError> {
        Ok(self.stickers.add_by_id(template_id)?)
    }

    pub fn remove_sticker(&mut self, id: &str) -> Result<(), SessionError> {
        self.stickers.remove(id)?;
        Ok(())
    }

    pub fn begin_drag(&mut self, id: &str, pointer: Point, container: BoundingBox) -> Result<(), SessionError> {
        Ok(self.stickers.start_drag(id, pointer, container)?)
    }

    pub fn drag_to(&mut self, pointer: Point, container: BoundingBox) -> Result<(f32, f32), SessionError> {
        Ok(self.stickers.drag_to(pointer, container)?)
    }

    pub fn end_drag(&mut self) -> Option<String> {
        self.stickers.end_drag()
    }

    pub fn stickers(&self) -> Vec<PlacedSticker> {
        self.stickers.stickers().to_vec()
    }

    fn displayed(&self) -> RgbaImage {
        match self.display.lock() {
            Ok(surface) => surface.image().clone(),
            Err(poisoned) => poisoned.into_inner().image().clone(),
        }
    }

    /// Composite the displayed frame with the stickers, encode it as PNG
    /// and hand it to the export sink. The flash runs on its own timer.
    pub async fn capture(&mut self) -> Result<PathBuf, SessionError> {
        self.active_source()?;
        let displayed = self.displayed();
        if displayed.width() == 0 || displayed.height() == 0 {
            return Err(CaptureError::EmptySurface.into());
        }

        self.flash.trigger(self.settings.flash);

        let stickers = self.stickers();
        let png = tokio::task::spawn_blocking(move || {
            let still = capture::capture_still(&displayed, &stickers, &BadgeArt);
            capture::encode_png(&still)
        })
        .await
        .map_err(task_failed)??;

        Ok(self.sink.save(&png, chrono::Utc::now().timestamp_millis()).await?)
    }

    /// Current frame, mirrored and filtered, without overlays or stickers.
    pub fn clean_frame(&self) -> Result<RgbaImage, SessionError> {
        let source = self.active_source()?;
        let frame = source
            .current_frame()
            .ok_or_else(|| SessionError::Camera("no frame available yet".into()))?;
        Ok(render_clean(&frame, &self.filter.adjustments()))
    }

    pub fn status(&self) -> SessionStatus {
        let snap = self.snapshot.latest();
        SessionStatus {
            camera: self.state,
            frame_size: self.source.as_ref().and_then(|s| s.frame_size()),
            filter: self.filter.id,
            filter_name: self.filter.id.name(),
            intensity: self.filter.intensity,
            beauty: self.filter.beauty,
            css: self.filter.adjustments().to_css(),
            detection_enabled: self.detection_enabled,
            overlays: self.overlays,
            faces: snap.faces.len(),
            snapshot_generation: snap.generation,
            reference_active: self.reference.is_some(),
            stickers: self.stickers.len(),
            dragging: self.stickers.dragging().map(str::to_string),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            flash: self.flash.is_lit(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Request {
    Start(Reply<()>),
    Stop(Reply<()>),
    SetFilter { id: String, intensity: i32, beauty: bool, reply: Reply<FilterSpec> },
    SetOverlays(OverlayToggles, Reply<()>),
    SetDetection(bool, Reply<()>),
    CaptureReference(Reply<()>),
    ClearReference(Reply<()>),
    AddSticker(String, Reply<String>),
    RemoveSticker(String, Reply<()>),
    BeginDrag { id: String, pointer: Point, container: BoundingBox, reply: Reply<()> },
    DragTo { pointer: Point, container: BoundingBox, reply: Reply<(f32, f32)> },
    EndDrag(Reply<Option<String>>),
    ListStickers(Reply<Vec<PlacedSticker>>),
    Capture(Reply<PathBuf>),
    CleanFrame(Reply<RgbaImage>),
    Status(Reply<SessionStatus>),
}

/// Clone-safe handle to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Request>,
    snapshot: DetectionSnapshot,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Subscribe-side view of the detection snapshot.
    pub fn snapshot(&self) -> &DetectionSnapshot {
        &self.snapshot
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.call(Request::Start).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.call(Request::Stop).await
    }

    pub async fn set_filter(&self, id: &str, intensity: i32, beauty: bool) -> Result<FilterSpec, SessionError> {
        let id = id.to_string();
        self.call(|reply| Request::SetFilter { id, intensity, beauty, reply }).await
    }

    pub async fn set_overlays(&self, overlays: OverlayToggles) -> Result<(), SessionError> {
        self.call(|reply| Request::SetOverlays(overlays, reply)).await
    }

    pub async fn set_detection(&self, enabled: bool) -> Result<(), SessionError> {
        self.call(|reply| Request::SetDetection(enabled, reply)).await
    }

    pub async fn capture_reference(&self) -> Result<(), SessionError> {
        self.call(Request::CaptureReference).await
    }

    pub async fn clear_reference(&self) -> Result<(), SessionError> {
        self.call(Request::ClearReference).await
    }

    pub async fn add_sticker(&self, template_id: &str) -> Result<String, SessionError> {
        let template_id = template_id.to_string();
        self.call(|reply| Request::AddSticker(template_id, reply)).await
    }

    pub async fn remove_sticker(&self, id: &str) -> Result<(), SessionError> {
        let id = id.to_string();
        self.call(|reply| Request::RemoveSticker(id, reply)).await
    }

    pub async fn begin_drag(&self, id: &str, pointer: Point, container: BoundingBox) -> Result<(), SessionError> {
        let id = id.to_string();
        self.call(|reply| Request::BeginDrag { id, pointer, container, reply }).await
    }

    pub async fn drag_to(&self, pointer: Point, container: BoundingBox) -> Result<(f32, f32), SessionError> {
        self.call(|reply| Request::DragTo { pointer, container, reply }).await
    }

    pub async fn end_drag(&self) -> Result<Option<String>, SessionError> {
        self.call(Request::EndDrag).await
    }

    pub async fn list_stickers(&self) -> Result<Vec<PlacedSticker>, SessionError> {
        self.call(Request::ListStickers).await
    }

    pub async fn capture(&self) -> Result<PathBuf, SessionError> {
        self.call(Request::Capture).await
    }

    pub async fn clean_frame(&self) -> Result<RgbaImage, SessionError> {
        self.call(Request::CleanFrame).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.call(Request::Status).await
    }
}

async fn dispatch(session: &mut Session, req: Request) {
    match req {
        Request::Start(reply) => {
            let _ = reply.send(session.start().await);
        }
        Request::Stop(reply) => {
            session.stop();
            let _ = reply.send(Ok(()));
        }
        Request::SetFilter { id, intensity, beauty, reply } => {
            let _ = reply.send(Ok(session.set_filter(&id, intensity, beauty)));
        }
        Request::SetOverlays(overlays, reply) => {
            session.set_overlays(overlays);
            let _ = reply.send(Ok(()));
        }
        Request::SetDetection(enabled, reply) => {
            session.set_detection(enabled);
            let _ = reply.send(Ok(()));
        }
        Request::CaptureReference(reply) => {
            let _ = reply.send(session.capture_reference().await);
        }
        Request::ClearReference(reply) => {
            session.clear_reference();
            let _ = reply.send(Ok(()));
        }
        Request::AddSticker(template_id, reply) => {
            let _ = reply.send(session.add_sticker(&template_id));
        }
        Request::RemoveSticker(id, reply) => {
            let _ = reply.send(session.remove_sticker(&id));
        }
        Request::BeginDrag { id, pointer, container, reply } => {
            let _ = reply.send(session.begin_drag(&id, pointer, container));
        }
        Request::DragTo { pointer, container, reply } => {
            let _ = reply.send(session.drag_to(pointer, container));
        }
        Request::EndDrag(reply) => {
            let _ = reply.send(Ok(session.end_drag()));
        }
        Request::ListStickers(reply) => {
            let _ = reply.send(Ok(session.stickers()));
        }
        Request::Capture(reply) => {
            let _ = reply.send(session.capture().await);
        }
        Request::CleanFrame(reply) => {
            let _ = reply.send(session.clean_frame());
        }
        Request::Status(reply) => {
            let _ = reply.send(Ok(session.status()));
        }
    }
}

/// Move `session` onto its own task. The session stops once every handle
/// is dropped.
pub fn spawn_session(mut session: Session) -> SessionHandle {
    let (tx, mut rx) = mpsc::channel::<Request>(16);
    let snapshot = session.snapshot().clone();
    let source_ended = session.source_ended.clone();

    tokio::spawn(async move {
        tracing::info!("session task started");
        loop {
            tokio::select! {
                req = rx.recv() => match req {
                    Some(req) => dispatch(&mut session, req).await,
                    None => break,
                },
                _ = source_ended.notified() => {
                    session.check_source();
                }
            }
        }
        session.stop();
        tracing::info!("session task exiting");
    });

    SessionHandle { tx, snapshot }
}
