//! Frame compositor: one mirrored, filtered video frame plus face overlays.
//!
//! Draw order inside a pass is fixed: resize, clear, frame with
//! adjustments, reset, then boxes, landmarks, expressions and match
//! score. Shapes go through [`Mirror`] so they line up with the flipped
//! video; text is placed at mirrored anchors but never flipped itself.

use crate::canvas::{Canvas, Color, Mirror, Surface, TextStyle};
use crate::filter::{AdjustmentSpec, FilterSpec};
use crate::matching::{match_color, similarity};
use crate::source::MediaSource;
use crate::types::{landmark_groups, Descriptor, DetectionResult, Emotion, LandmarkRegion, Point};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BOX_LINE_WIDTH: u32 = 5;
/// Font magnification for overlay labels (5x7 glyphs, about 20 px tall).
pub const LABEL_SCALE: u32 = 3;

const CONFIDENCE_OFFSET_Y: f32 = 10.0;
const EMOJI_OFFSET_Y: f32 = 60.0;
const EMOJI_RADIUS: u32 = 20;
const EXPRESSION_LABEL_OFFSET_X: f32 = 30.0;
const EXPRESSION_LABEL_OFFSET_Y: f32 = 10.0;
const MATCH_OFFSET_Y: f32 = 25.0;
const PLAIN_LANDMARK_RADIUS: u32 = 2;
const GROUP_LANDMARK_RADIUS: u32 = 3;

/// Landmark overlay style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkMode {
    #[default]
    Off,
    /// Every point in one color.
    Plain,
    /// Points colored by facial region.
    Groups,
}

impl LandmarkMode {
    pub fn from_name(name: &str) -> Option<LandmarkMode> {
        match name {
            "off" | "none" => Some(LandmarkMode::Off),
            "plain" | "all" => Some(LandmarkMode::Plain),
            "groups" => Some(LandmarkMode::Groups),
            _ => None,
        }
    }
}

/// Which analysis overlays the live view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverlayToggles {
    pub bounding_boxes: bool,
    pub landmarks: LandmarkMode,
    pub expressions: bool,
    pub face_matching: bool,
}

impl OverlayToggles {
    pub fn any(&self) -> bool {
        self.bounding_boxes
            || self.landmarks != LandmarkMode::Off
            || self.expressions
            || self.face_matching
    }
}

/// Configuration captured when a render loop starts. Never mutated while a
/// loop runs; a change builds a new snapshot and a new loop.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub filter: FilterSpec,
    pub adjustments: AdjustmentSpec,
    pub overlays: OverlayToggles,
    pub detection_enabled: bool,
    pub reference: Option<Arc<Descriptor>>,
}

impl RenderConfig {
    pub fn new(
        filter: FilterSpec,
        overlays: OverlayToggles,
        detection_enabled: bool,
        reference: Option<Arc<Descriptor>>,
    ) -> Self {
        Self {
            adjustments: filter.adjustments(),
            filter,
            overlays,
            detection_enabled,
            reference,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::new(FilterSpec::default(), OverlayToggles::default(), false, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The source had no presentable frame; nothing was drawn.
    Skipped,
    Drawn,
}

/// Composite one frame from `source` onto `canvas`.
pub fn render_frame(
    source: &dyn MediaSource,
    canvas: &mut dyn Canvas,
    config: &RenderConfig,
    faces: &[DetectionResult],
) -> RenderOutcome {
    if !source.has_enough_data() {
        return RenderOutcome::Skipped;
    }
    let Some(frame) = source.current_frame() else {
        return RenderOutcome::Skipped;
    };

    let (w, h) = frame.dimensions();
    if canvas.size() != (w, h) {
        canvas.resize(w, h);
    }
    canvas.clear();

    let mirror = Mirror::new(w);
    canvas.set_adjustments(&config.adjustments);
    canvas.draw_frame(&frame, true);
    canvas.reset_adjustments();

    if config.detection_enabled {
        draw_overlays(canvas, &mirror, config, faces);
    }
    RenderOutcome::Drawn
}

/// Mirrored, filtered frame with no overlays.
pub fn render_clean(frame: &RgbaImage, adjustments: &AdjustmentSpec) -> RgbaImage {
    let (w, h) = frame.dimensions();
    let mut surface = Surface::new(w, h);
    surface.set_adjustments(adjustments);
    surface.draw_frame(frame, true);
    surface.into_image()
}

fn draw_overlays(canvas: &mut dyn Canvas, mirror: &Mirror, config: &RenderConfig, faces: &[DetectionResult]) {
    if faces.is_empty() {
        return;
    }
    let overlays = &config.overlays;

    if overlays.bounding_boxes {
        for face in faces {
            draw_box(canvas, mirror, face);
        }
    }
    if overlays.landmarks != LandmarkMode::Off {
        for face in faces {
            draw_landmarks(canvas, mirror, face, overlays.landmarks);
        }
    }
    if overlays.expressions {
        for face in faces {
            draw_expression(canvas, mirror, face);
        }
    }
    if overlays.face_matching {
        if let Some(reference) = &config.reference {
            for face in faces {
                draw_match(canvas, mirror, reference, face);
            }
        }
    }
}

fn draw_box(canvas: &mut dyn Canvas, mirror: &Mirror, face: &DetectionResult) {
    let rect = mirror.rect(face.bbox);
    canvas.stroke_rect(rect, Color::GREEN, BOX_LINE_WIDTH);

    let label = format!("{}%", (face.score * 100.0).round() as i32);
    canvas.draw_text(
        &label,
        Point::new(rect.x, face.bbox.y - CONFIDENCE_OFFSET_Y),
        TextStyle::plain(Color::GREEN, LABEL_SCALE),
    );
}

fn draw_landmarks(canvas: &mut dyn Canvas, mirror: &Mirror, face: &DetectionResult, mode: LandmarkMode) {
    let groups = match mode {
        LandmarkMode::Groups => landmark_groups(face.landmarks.len()),
        _ => None,
    };

    match groups {
        Some(groups) => {
            for (region, range) in groups {
                let color = region_color(*region);
                for point in range.clone().filter_map(|i| face.landmarks.get(i)) {
                    canvas.fill_circle(mirror.point(*point), GROUP_LANDMARK_RADIUS, color);
                }
            }
        }
        None => {
            for point in &face.landmarks {
                canvas.fill_circle(mirror.point(*point), PLAIN_LANDMARK_RADIUS, Color::GREEN);
            }
        }
    }
}

fn draw_expression(canvas: &mut dyn Canvas, mirror: &Mirror, face: &DetectionResult) {
    let Some((emotion, p)) = face.expressions.as_ref().and_then(|e| e.dominant()) else {
        return;
    };
    let anchor_x = mirror.x(face.bbox.center_x());

    // Emoji glyphs are not in the bitmap font; a colored badge stands in,
    // occupying the box the emoji would.
    let r = EMOJI_RADIUS as f32;
    canvas.fill_circle(
        Point::new(anchor_x + r, face.bbox.y - EMOJI_OFFSET_Y - r),
        EMOJI_RADIUS,
        emotion_color(emotion),
    );

    let label = format!("{} {}%", emotion.label(), (p * 100.0).round() as i32);
    canvas.draw_text(
        &label,
        Point::new(
            anchor_x - EXPRESSION_LABEL_OFFSET_X,
            face.bbox.y - EXPRESSION_LABEL_OFFSET_Y,
        ),
        TextStyle::outlined(Color::WHITE, Color::BLACK, LABEL_SCALE),
    );
}

fn draw_match(canvas: &mut dyn Canvas, mirror: &Mirror, reference: &Descriptor, face: &DetectionResult) {
    let Some(score) = similarity(reference, face) else {
        return;
    };
    let label = format!("Match: {}%", score.round() as i32);
    canvas.draw_text(
        &label,
        Point::new(mirror.x(face.bbox.right()), face.bbox.bottom() + MATCH_OFFSET_Y),
        TextStyle::outlined(match_color(score), Color::BLACK, LABEL_SCALE),
    );
}

pub fn region_color(region: LandmarkRegion) -> Color {
    match region {
        LandmarkRegion::Jaw => Color::hex(0xFF6B6B),
        LandmarkRegion::RightEyebrow => Color::hex(0x4ECDC4),
        LandmarkRegion::LeftEyebrow => Color::hex(0x45B7D1),
        LandmarkRegion::Nose => Color::hex(0xFFA07A),
        LandmarkRegion::RightEye => Color::hex(0x98D8C8),
        LandmarkRegion::LeftEye => Color::hex(0x6BCF7F),
        LandmarkRegion::Mouth => Color::hex(0xF7DC6F),
    }
}

pub fn emotion_color(emotion: Emotion) -> Color {
    match emotion {
        Emotion::Neutral => Color::hex(0xB0B0B0),
        Emotion::Happy => Color::hex(0xFFD93D),
        Emotion::Sad => Color::hex(0x4D96FF),
        Emotion::Angry => Color::hex(0xFF4D4D),
        Emotion::Fearful => Color::hex(0x9B59B6),
        Emotion::Disgusted => Color::hex(0x6BCB77),
        Emotion::Surprised => Color::hex(0xFF9F45),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterId;
    use crate::source::FrameSlot;
    use crate::types::{BoundingBox, Expressions};
    use image::Rgba;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Resize(u32, u32),
        Clear,
        SetAdjustments(String),
        ResetAdjustments,
        Frame { mirrored: bool },
        Rect(BoundingBox, Color),
        Circle(Point, u32, Color),
        Text(String, Point, Color),
    }

    struct RecordingCanvas {
        size: (u32, u32),
        calls: Vec<Call>,
    }

    impl RecordingCanvas {
        fn new(w: u32, h: u32) -> Self {
            Self { size: (w, h), calls: Vec::new() }
        }

        fn texts(&self) -> Vec<(String, Point, Color)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Text(t, p, color) => Some((t.clone(), *p, *color)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Canvas for RecordingCanvas {
        fn size(&self) -> (u32, u32) {
            self.size
        }
        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.calls.push(Call::Resize(width, height));
        }
        fn clear(&mut self) {
            self.calls.push(Call::Clear);
        }
        fn set_adjustments(&mut self, spec: &AdjustmentSpec) {
            self.calls.push(Call::SetAdjustments(spec.to_css()));
        }
        fn reset_adjustments(&mut self) {
            self.calls.push(Call::ResetAdjustments);
        }
        fn draw_frame(&mut self, _frame: &RgbaImage, mirrored: bool) {
            self.calls.push(Call::Frame { mirrored });
        }
        fn stroke_rect(&mut self, rect: BoundingBox, color: Color, _line_width: u32) {
            self.calls.push(Call::Rect(rect, color));
        }
        fn fill_circle(&mut self, center: Point, radius: u32, color: Color) {
            self.calls.push(Call::Circle(center, radius, color));
        }
        fn draw_text(&mut self, text: &str, baseline_left: Point, style: TextStyle) {
            self.calls.push(Call::Text(text.to_string(), baseline_left, style.color));
        }
    }

    fn ready_source(w: u32, h: u32) -> FrameSlot {
        let slot = FrameSlot::new();
        slot.publish(RgbaImage::from_pixel(w, h, Rgba([50, 60, 70, 255])));
        slot
    }

    fn face() -> DetectionResult {
        let mut f = DetectionResult::new(BoundingBox::new(100.0, 200.0, 80.0, 100.0), 0.876);
        f.landmarks = vec![
            Point::new(120.0, 230.0),
            Point::new(160.0, 230.0),
            Point::new(140.0, 250.0),
            Point::new(125.0, 275.0),
            Point::new(155.0, 275.0),
        ];
        f.expressions = Some(Expressions::new(vec![
            (Emotion::Neutral, 0.2),
            (Emotion::Happy, 0.7),
            (Emotion::Sad, 0.1),
        ]));
        f.descriptor = Some(Descriptor::new(vec![0.0, 0.1]));
        f
    }

    fn config(overlays: OverlayToggles, reference: Option<Vec<f32>>) -> RenderConfig {
        RenderConfig::new(
            FilterSpec::new(FilterId::Sepia, 100, false),
            overlays,
            true,
            reference.map(|v| Arc::new(Descriptor::new(v))),
        )
    }

    #[test]
    fn test_not_ready_source_draws_nothing() {
        let slot = FrameSlot::new();
        slot.set_negotiated();
        let mut canvas = RecordingCanvas::new(0, 0);
        let outcome = render_frame(&slot, &mut canvas, &RenderConfig::default(), &[face()]);
        assert_eq!(outcome, RenderOutcome::Skipped);
        assert!(canvas.calls.is_empty());
    }

    #[test]
    fn test_step_order() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(0, 0);
        let overlays = OverlayToggles {
            bounding_boxes: true,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[face()]);

        assert_eq!(canvas.calls[0], Call::Resize(640, 480));
        assert_eq!(canvas.calls[1], Call::Clear);
        assert_eq!(canvas.calls[2], Call::SetAdjustments("sepia(100%)".to_string()));
        assert_eq!(canvas.calls[3], Call::Frame { mirrored: true });
        assert_eq!(canvas.calls[4], Call::ResetAdjustments);
        assert!(matches!(canvas.calls[5], Call::Rect(..)));
        assert!(matches!(canvas.calls[6], Call::Text(..)));
        assert_eq!(canvas.calls.len(), 7);
    }

    #[test]
    fn test_resize_only_when_dimensions_differ() {
        let source = ready_source(320, 240);
        let mut canvas = RecordingCanvas::new(320, 240);
        render_frame(&source, &mut canvas, &RenderConfig::default(), &[]);
        assert!(!canvas.calls.iter().any(|c| matches!(c, Call::Resize(..))));
        assert_eq!(canvas.calls[0], Call::Clear);
    }

    #[test]
    fn test_overlays_skipped_when_detection_disabled() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let mut cfg = config(
            OverlayToggles {
                bounding_boxes: true,
                landmarks: LandmarkMode::Plain,
                expressions: true,
                face_matching: true,
            },
            Some(vec![0.0, 0.0]),
        );
        cfg.detection_enabled = false;
        render_frame(&source, &mut canvas, &cfg, &[face()]);
        assert_eq!(canvas.calls.len(), 4);
    }

    #[test]
    fn test_box_is_mirrored_and_label_unmirrored() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let overlays = OverlayToggles {
            bounding_boxes: true,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[face()]);

        assert!(canvas
            .calls
            .contains(&Call::Rect(BoundingBox::new(460.0, 200.0, 80.0, 100.0), Color::GREEN)));
        assert_eq!(
            canvas.texts(),
            vec![("88%".to_string(), Point::new(460.0, 190.0), Color::GREEN)]
        );
    }

    #[test]
    fn test_overlay_priority_order() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let overlays = OverlayToggles {
            bounding_boxes: true,
            landmarks: LandmarkMode::Plain,
            expressions: true,
            face_matching: true,
        };
        render_frame(&source, &mut canvas, &config(overlays, Some(vec![0.0, 0.0])), &[face()]);

        let overlay_calls = &canvas.calls[4..];
        let kinds: Vec<&str> = overlay_calls
            .iter()
            .map(|c| match c {
                Call::Rect(..) => "rect",
                Call::Circle(_, r, _) if *r == PLAIN_LANDMARK_RADIUS => "landmark",
                Call::Circle(..) => "emoji",
                Call::Text(t, ..) if t.starts_with("Match") => "match",
                Call::Text(t, ..) if t.starts_with("happy") => "expression",
                Call::Text(..) => "confidence",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "other", "rect", "confidence", "landmark", "landmark", "landmark", "landmark",
                "landmark", "emoji", "expression", "match"
            ]
        );
    }

    #[test]
    fn test_expression_label_positions() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let overlays = OverlayToggles {
            expressions: true,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[face()]);

        // center_x = 140, mirrored = 500
        let texts = canvas.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, "happy 70%");
        assert_eq!(texts[0].1, Point::new(470.0, 190.0));
        assert!(canvas.calls.contains(&Call::Circle(
            Point::new(520.0, 120.0),
            EMOJI_RADIUS,
            emotion_color(Emotion::Happy)
        )));
    }

    #[test]
    fn test_match_requires_reference() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let overlays = OverlayToggles {
            face_matching: true,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[face()]);
        assert!(canvas.texts().is_empty());

        let mut canvas = RecordingCanvas::new(640, 480);
        render_frame(&source, &mut canvas, &config(overlays, Some(vec![0.0, 0.0])), &[face()]);
        assert_eq!(
            canvas.texts(),
            vec![("Match: 90%".to_string(), Point::new(460.0, 325.0), Color::GREEN)]
        );
    }

    #[test]
    fn test_group_colors_for_five_points() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let overlays = OverlayToggles {
            landmarks: LandmarkMode::Groups,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[face()]);

        let circles: Vec<Color> = canvas
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Circle(_, r, color) => {
                    assert_eq!(*r, GROUP_LANDMARK_RADIUS);
                    Some(*color)
                }
                _ => None,
            })
            .collect();
        assert_eq!(circles.len(), 5);
        assert_eq!(circles[0], region_color(LandmarkRegion::LeftEye));
        assert_eq!(circles[2], region_color(LandmarkRegion::Nose));
        assert_eq!(circles[4], region_color(LandmarkRegion::Mouth));
    }

    #[test]
    fn test_groups_fall_back_to_plain_for_unknown_layout() {
        let source = ready_source(640, 480);
        let mut canvas = RecordingCanvas::new(640, 480);
        let mut f = face();
        f.landmarks.truncate(3);
        let overlays = OverlayToggles {
            landmarks: LandmarkMode::Groups,
            ..Default::default()
        };
        render_frame(&source, &mut canvas, &config(overlays, None), &[f]);
        let plain = canvas
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Circle(_, r, Color::GREEN) if *r == PLAIN_LANDMARK_RADIUS))
            .count();
        assert_eq!(plain, 3);
    }

    #[test]
    fn test_render_clean_mirrors_and_filters() {
        let mut frame = RgbaImage::from_pixel(4, 1, Rgba([0, 0, 0, 255]));
        frame.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        let spec = FilterSpec::new(FilterId::Invert, 100, false).adjustments();
        let clean = render_clean(&frame, &spec);
        assert_eq!(clean.get_pixel(3, 0).0, [0, 0, 0, 255]);
        assert_eq!(clean.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }
}
