//! Face-detection collaborator contract.

use crate::types::{DetectionOptions, DetectionResult};
use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("detection model not loaded")]
    ModelNotLoaded,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Black-box face analysis.
///
/// Implementations are synchronous and may be slow; async callers run them
/// on a blocking thread. Optional stages (expressions, descriptors) are
/// requested through [`DetectionOptions`] and skipped otherwise.
pub trait Detector: Send + Sync {
    fn detect_all(
        &self,
        frame: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError>;

    /// Highest-scoring face, if any.
    fn detect_single(
        &self,
        frame: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Option<DetectionResult>, DetectorError> {
        let faces = self.detect_all(frame, options)?;
        Ok(faces.into_iter().max_by(|a, b| a.score.total_cmp(&b.score)))
    }
}

/// Stand-in used while no model is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnloadedDetector;

impl Detector for UnloadedDetector {
    fn detect_all(
        &self,
        _frame: &RgbaImage,
        _options: &DetectionOptions,
    ) -> Result<Vec<DetectionResult>, DetectorError> {
        Err(DetectorError::ModelNotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    struct Fixed(Vec<DetectionResult>);

    impl Detector for Fixed {
        fn detect_all(
            &self,
            _frame: &RgbaImage,
            _options: &DetectionOptions,
        ) -> Result<Vec<DetectionResult>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_detect_single_picks_best_score() {
        let d = Fixed(vec![
            DetectionResult::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.6),
            DetectionResult::new(BoundingBox::new(20.0, 0.0, 10.0, 10.0), 0.9),
        ]);
        let best = d
            .detect_single(&RgbaImage::new(4, 4), &DetectionOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(best.score, 0.9);
    }

    #[test]
    fn test_detect_single_empty() {
        let d = Fixed(Vec::new());
        let none = d
            .detect_single(&RgbaImage::new(4, 4), &DetectionOptions::default())
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_unloaded_detector() {
        let err = UnloadedDetector
            .detect_all(&RgbaImage::new(1, 1), &DetectionOptions::default())
            .unwrap_err();
        assert_eq!(err, DetectorError::ModelNotLoaded);
    }
}
