use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A 2-D point in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned face box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
}

/// The fixed emotion set reported by expression models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Emotion::Neutral => "😐",
            Emotion::Happy => "😊",
            Emotion::Sad => "😢",
            Emotion::Angry => "😠",
            Emotion::Fearful => "😨",
            Emotion::Disgusted => "🤢",
            Emotion::Surprised => "😲",
        }
    }
}

/// Probability distribution over [`Emotion`], in the order the model reported it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    scores: Vec<(Emotion, f32)>,
}

impl Expressions {
    pub fn new(scores: Vec<(Emotion, f32)>) -> Self {
        Self { scores }
    }

    pub fn scores(&self) -> &[(Emotion, f32)] {
        &self.scores
    }

    pub fn get(&self, emotion: Emotion) -> Option<f32> {
        self.scores
            .iter()
            .find(|(e, _)| *e == emotion)
            .map(|(_, p)| *p)
    }

    /// Highest-probability emotion. Ties keep the first one encountered.
    pub fn dominant(&self) -> Option<(Emotion, f32)> {
        let mut best: Option<(Emotion, f32)> = None;
        for &(emotion, p) in &self.scores {
            match best {
                Some((_, bp)) if p <= bp => {}
                _ => best = Some((emotion, p)),
            }
        }
        best
    }
}

/// Identity descriptor (128-dimensional for face-api models, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two descriptors. `None` when they come
    /// from models with different output sizes.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }

    /// Similarity percentage in [0, 100]: `(1 - distance) * 100`, clamped.
    pub fn match_percentage(&self, other: &Descriptor) -> Option<f32> {
        self.euclidean_distance(other)
            .map(|d| ((1.0 - d) * 100.0).clamp(0.0, 100.0))
    }
}

/// One detected face. Carries no identity across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
    /// Fixed-length landmark sequence in the same coordinate space as `bbox`.
    pub landmarks: Vec<Point>,
    pub expressions: Option<Expressions>,
    pub descriptor: Option<Descriptor>,
}

impl DetectionResult {
    pub fn new(bbox: BoundingBox, score: f32) -> Self {
        Self {
            bbox,
            score,
            landmarks: Vec::new(),
            expressions: None,
            descriptor: None,
        }
    }
}

/// Capability flags passed to a single detector call.
///
/// Every optional stage adds inference cost, so callers opt in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    pub min_score: f32,
    pub input_size: u32,
    pub landmarks: bool,
    pub expressions: bool,
    pub descriptors: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            input_size: 416,
            landmarks: true,
            expressions: false,
            descriptors: false,
        }
    }
}

/// Facial region a landmark belongs to, used for color-grouped overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkRegion {
    Jaw,
    RightEyebrow,
    LeftEyebrow,
    Nose,
    RightEye,
    LeftEye,
    Mouth,
}

const GROUPS_68: [(LandmarkRegion, RangeInclusive<usize>); 7] = [
    (LandmarkRegion::Jaw, 0..=16),
    (LandmarkRegion::RightEyebrow, 17..=21),
    (LandmarkRegion::LeftEyebrow, 22..=26),
    (LandmarkRegion::Nose, 27..=35),
    (LandmarkRegion::RightEye, 36..=41),
    (LandmarkRegion::LeftEye, 42..=47),
    (LandmarkRegion::Mouth, 48..=67),
];

// [left_eye, right_eye, nose, left_mouth, right_mouth]
const GROUPS_5: [(LandmarkRegion, RangeInclusive<usize>); 4] = [
    (LandmarkRegion::LeftEye, 0..=0),
    (LandmarkRegion::RightEye, 1..=1),
    (LandmarkRegion::Nose, 2..=2),
    (LandmarkRegion::Mouth, 3..=4),
];

/// Region layout for a landmark sequence of the given length.
///
/// Only the 68-point and 5-point layouts are known; anything else has no
/// grouping.
pub fn landmark_groups(len: usize) -> Option<&'static [(LandmarkRegion, RangeInclusive<usize>)]> {
    match len {
        68 => Some(&GROUPS_68),
        5 => Some(&GROUPS_5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).unwrap().abs() < 1e-6);
        assert!((a.match_percentage(&a).unwrap() - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_match_percentage_clamped_to_zero() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(a.match_percentage(&b), Some(0.0));
    }

    #[test]
    fn test_match_percentage_partial() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![0.3, 0.4]);
        assert!((a.match_percentage(&b).unwrap() - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_mismatched_lengths_have_no_distance() {
        let short = Descriptor::new(vec![0.0; 128]);
        let long = Descriptor::new(vec![0.0; 512]);
        assert_eq!(short.euclidean_distance(&long), None);
        assert_eq!(long.match_percentage(&short), None);
    }

    #[test]
    fn test_dominant_expression() {
        let e = Expressions::new(vec![
            (Emotion::Neutral, 0.1),
            (Emotion::Happy, 0.7),
            (Emotion::Sad, 0.2),
        ]);
        assert_eq!(e.dominant(), Some((Emotion::Happy, 0.7)));
    }

    #[test]
    fn test_dominant_tie_keeps_first() {
        let e = Expressions::new(vec![
            (Emotion::Surprised, 0.4),
            (Emotion::Happy, 0.4),
            (Emotion::Neutral, 0.2),
        ]);
        assert_eq!(e.dominant().map(|(e, _)| e), Some(Emotion::Surprised));
    }

    #[test]
    fn test_dominant_empty() {
        assert!(Expressions::default().dominant().is_none());
    }

    #[test]
    fn test_landmark_groups_cover_68_points() {
        let groups = landmark_groups(68).unwrap();
        let covered: usize = groups.iter().map(|(_, r)| r.clone().count()).sum();
        assert_eq!(covered, 68);
        assert_eq!(groups[0].0, LandmarkRegion::Jaw);
        assert_eq!(groups[6].1, 48..=67);
    }

    #[test]
    fn test_landmark_groups_unknown_layout() {
        assert!(landmark_groups(12).is_none());
        assert_eq!(landmark_groups(5).map(|g| g.len()), Some(4));
    }
}
