//! Reference-face selection and match scoring.

use crate::canvas::Color;
use crate::types::{Descriptor, DetectionResult};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("no face detected; make sure your face is visible")]
    NoFace,
    #[error("{0} faces detected; exactly one face must be visible")]
    MultipleFaces(usize),
    #[error("face detected but no descriptor was computed")]
    NoDescriptor,
    #[error("face detection not ready: {0}")]
    NotReady(String),
}

/// Pick the reference descriptor from one detection pass.
///
/// Exactly one face must be present and it must carry a descriptor.
pub fn select_reference(faces: &[DetectionResult]) -> Result<Descriptor, ReferenceError> {
    match faces {
        [] => Err(ReferenceError::NoFace),
        [face] => face.descriptor.clone().ok_or(ReferenceError::NoDescriptor),
        many => Err(ReferenceError::MultipleFaces(many.len())),
    }
}

/// Similarity of a face against the reference, when both descriptors exist
/// and have the same length.
pub fn similarity(reference: &Descriptor, face: &DetectionResult) -> Option<f32> {
    face.descriptor
        .as_ref()
        .and_then(|d| reference.match_percentage(d))
}

/// Label color for a similarity percentage.
pub fn match_color(similarity: f32) -> Color {
    if similarity > 60.0 {
        Color::GREEN
    } else if similarity > 40.0 {
        Color::ORANGE
    } else {
        Color::RED
    }
}
