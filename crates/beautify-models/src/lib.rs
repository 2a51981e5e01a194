//! beautify-models — ONNX face analysis back end.
//!
//! SCRFD finds faces and five landmarks, ArcFace turns aligned crops into
//! identity descriptors. Both run on CPU through ONNX Runtime and plug
//! into the pipeline as a [`beautify_core::Detector`].

pub mod alignment;
pub mod arcface;
pub mod scrfd;

use beautify_core::{DetectionOptions, DetectionResult, Detector, DetectorError};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no five-point landmarks to align on")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ModelError> for DetectorError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::ModelNotFound(_) => DetectorError::ModelNotLoaded,
            other => DetectorError::Inference(other.to_string()),
        }
    }
}

/// `$XDG_DATA_HOME/beautify/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/usr/share"))
        .join("beautify/models")
}

/// SCRFD detection plus optional ArcFace descriptors.
///
/// ONNX sessions need exclusive access per run, so each sits behind its own
/// mutex; detection and descriptor extraction for one frame run back to back.
pub struct OnnxDetector {
    scrfd: Mutex<scrfd::FaceDetector>,
    arcface: Option<Mutex<arcface::FaceRecognizer>>,
}

impl OnnxDetector {
    /// Load both models from `model_dir`. The detector model is required;
    /// without the recognizer, descriptor requests come back empty.
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        let scrfd = scrfd::FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let arcface = match arcface::FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE)) {
            Ok(r) => Some(Mutex::new(r)),
            Err(e) => {
                tracing::warn!(error = %e, "recognizer unavailable, face matching disabled");
                None
            }
        };
        Ok(Self {
            scrfd: Mutex::new(scrfd),
            arcface,
        })
    }

    pub fn has_recognizer(&self) -> bool {
        self.arcface.is_some()
    }
}

fn poisoned<T>(_: T) -> DetectorError {
    DetectorError::Inference("model lock poisoned".into())
}

impl Detector for OnnxDetector {
    fn detect_all(
        &self,
        frame: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::InvalidFrame("empty frame".into()));
        }

        // Descriptors need landmarks for alignment even if the caller
        // does not want them back.
        let keep_landmarks = options.landmarks || options.descriptors;
        let mut faces = self.scrfd.lock().map_err(poisoned)?.detect(
            frame,
            options.input_size,
            options.min_score,
            keep_landmarks,
        )?;

        if options.descriptors {
            if let Some(arcface) = &self.arcface {
                let mut recognizer = arcface.lock().map_err(poisoned)?;
                for face in &mut faces {
                    match recognizer.extract(frame, &face.landmarks) {
                        Ok(d) => face.descriptor = Some(d),
                        Err(e) => tracing::debug!(error = %e, "descriptor skipped"),
                    }
                }
            }
        }
        if !options.landmarks {
            for face in &mut faces {
                face.landmarks.clear();
            }
        }

        tracing::trace!(faces = faces.len(), "detect_all");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model_dir() {
        let err = OnnxDetector::load(Path::new("/nonexistent/beautify-models")).err().unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
        assert_eq!(DetectorError::from(err), DetectorError::ModelNotLoaded);
    }

    #[test]
    fn test_inference_error_maps_to_detector_error() {
        let e = DetectorError::from(ModelError::InferenceFailed("boom".into()));
        assert!(matches!(e, DetectorError::Inference(msg) if msg.contains("boom")));
    }

    #[test]
    fn test_default_model_dir_suffix() {
        assert!(default_model_dir().ends_with("beautify/models"));
    }
}
