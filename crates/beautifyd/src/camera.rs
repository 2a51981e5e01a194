//! V4L2-backed camera provider.
//!
//! Each granted request gets its own capture thread that owns the device
//! and publishes converted frames into a [`FrameSlot`].

use beautify_core::{CameraProvider, Constraints, FrameSlot, MediaSource, ReadyState, SourceError};
use beautify_hw::{Camera, CameraError, POLL_TIMEOUT};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

fn source_error(e: CameraError) -> SourceError {
    match e {
        CameraError::PermissionDenied(msg) => SourceError::PermissionDenied(msg),
        CameraError::DeviceNotFound(msg) => SourceError::NoDevice(msg),
        other => SourceError::Other(other.to_string()),
    }
}

pub struct V4lProvider {
    device: String,
}

impl V4lProvider {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into() }
    }
}

impl CameraProvider for V4lProvider {
    fn request_access(&self, constraints: &Constraints) -> Result<Arc<dyn MediaSource>, SourceError> {
        if constraints.audio {
            tracing::debug!("audio requested; camera sources are video-only");
        }

        let slot = Arc::new(FrameSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let (opened_tx, opened_rx) = mpsc::channel();

        let device = self.device.clone();
        let (width, height) = (constraints.width, constraints.height);
        let thread_slot = slot.clone();
        let flag = running.clone();

        let capture = thread::Builder::new()
            .name("beautify-capture".into())
            .spawn(move || {
                let camera = match Camera::open(&device, width, height) {
                    Ok(camera) => {
                        let _ = opened_tx.send(Ok((camera.width, camera.height)));
                        camera
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                thread_slot.set_negotiated();

                let streamed = camera.stream_until(&flag, |frame| match frame.into_image() {
                    Ok(image) => thread_slot.publish(image),
                    Err(e) => tracing::debug!(error = %e, "dropping malformed frame"),
                });
                if let Err(e) = streamed {
                    tracing::warn!(device = %device, error = %e, "capture ended with error");
                    thread_slot.end(e.to_string());
                }
            })
            .map_err(|e| SourceError::Other(format!("failed to spawn capture thread: {e}")))?;

        let (w, h) = opened_rx
            .recv()
            .map_err(|_| SourceError::Other("capture thread exited before opening".into()))?
            .map_err(source_error)?;

        tracing::info!(device = %self.device, width = w, height = h, "camera access granted");
        Ok(Arc::new(V4lSource {
            slot,
            running,
            capture: Mutex::new(Some(capture)),
        }))
    }
}

/// Live camera tracks. Stopping joins the capture thread, so the device
/// is closed when `stop_tracks` returns. The join waits at most one
/// dequeue timeout.
pub struct V4lSource {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    capture: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSource for V4lSource {
    fn ready_state(&self) -> ReadyState {
        self.slot.ready_state()
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        self.slot.frame_size()
    }

    fn current_frame(&self) -> Option<Arc<RgbaImage>> {
        self.slot.current_frame()
    }

    fn ended(&self) -> Option<String> {
        self.slot.ended()
    }

    fn stop_tracks(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.slot.stop();

        let capture = match self.capture.lock() {
            Ok(mut capture) => capture.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(capture) = capture {
            if capture.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
            tracing::debug!(timeout = ?POLL_TIMEOUT, "capture thread joined; device released");
        }
    }
}
