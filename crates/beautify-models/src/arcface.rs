//! ArcFace descriptor extractor via ONNX Runtime (w600k_r50).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::ModelError;
use beautify_core::{Descriptor, Point};
use image::{RgbImage, RgbaImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

/// Unit embeddings sit at euclidean distance 0..2; halving puts them on the
/// 0..1 scale the match percentage is defined over.
pub const DESCRIPTOR_SCALE: f32 = 0.5;

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );
        Ok(Self { session })
    }

    /// Descriptor for the face with the given five landmarks.
    pub fn extract(&mut self, frame: &RgbaImage, landmarks: &[Point]) -> Result<Descriptor, ModelError> {
        let aligned = alignment::align_face(frame, landmarks).ok_or(ModelError::NoLandmarks)?;
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ModelError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(to_descriptor(raw))
    }
}

fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

/// L2-normalize, then apply [`DESCRIPTOR_SCALE`].
fn to_descriptor(raw: &[f32]) -> Descriptor {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    let k = if norm > 0.0 { DESCRIPTOR_SCALE / norm } else { 0.0 };
    Descriptor::new(raw.iter().map(|x| x * k).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_channel_order() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 128, 0]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (0.5 / 127.5)).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_norm_is_scaled() {
        let d = to_descriptor(&[3.0, 4.0]);
        let norm = d.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - DESCRIPTOR_SCALE).abs() < 1e-6);
    }

    #[test]
    fn test_opposite_descriptors_are_distance_one() {
        let a = to_descriptor(&[1.0, 0.0]);
        let b = to_descriptor(&[-1.0, 0.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(a.match_percentage(&b), Some(0.0));
        assert_eq!(a.match_percentage(&a), Some(100.0));
    }

    #[test]
    fn test_zero_embedding_stays_zero() {
        let d = to_descriptor(&[0.0; 4]);
        assert!(d.values.iter().all(|&v| v == 0.0));
    }
}
