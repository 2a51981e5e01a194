//! Drawing surface abstraction and the mirror coordinate transform.
//!
//! The compositor only talks to [`Canvas`]; [`Surface`] is the software
//! implementation backed by an `RgbaImage`. Mirroring is not a stateful
//! transform on the canvas: callers map coordinates through [`Mirror`]
//! for every shape they draw, and text is always drawn unmirrored.

use crate::adjust::apply_adjustments;
use crate::filter::AdjustmentSpec;
use crate::font;
use crate::types::{BoundingBox, Point};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// Opaque RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const BLACK: Color = Color::hex(0x000000);
    pub const WHITE: Color = Color::hex(0xFFFFFF);
    pub const GREEN: Color = Color::hex(0x00FF00);
    pub const ORANGE: Color = Color::hex(0xFFA500);
    pub const RED: Color = Color::hex(0xFF0000);

    /// Color from a `0xRRGGBB` literal.
    pub const fn hex(rgb: u32) -> Self {
        Color([(rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, 255])
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

/// How a text label is painted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: Color,
    /// Drawn first, one glyph pixel around every lit pixel.
    pub outline: Option<Color>,
    /// Integer magnification of the 5x7 font.
    pub scale: u32,
}

impl TextStyle {
    pub const fn plain(color: Color, scale: u32) -> Self {
        Self { color, outline: None, scale }
    }

    pub const fn outlined(color: Color, outline: Color, scale: u32) -> Self {
        Self {
            color,
            outline: Some(outline),
            scale,
        }
    }
}

/// Horizontal flip about the vertical centerline of a surface `width` wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mirror {
    width: f32,
}

impl Mirror {
    pub fn new(width: u32) -> Self {
        Self { width: width as f32 }
    }

    pub fn x(&self, x: f32) -> f32 {
        self.width - x
    }

    pub fn point(&self, p: Point) -> Point {
        Point::new(self.x(p.x), p.y)
    }

    /// The flipped rect keeps a positive width: its left edge is the
    /// mirror of the source's right edge.
    pub fn rect(&self, r: BoundingBox) -> BoundingBox {
        BoundingBox::new(self.width - r.x - r.width, r.y, r.width, r.height)
    }
}

/// Target of a compositing pass.
///
/// All coordinates are canvas pixels. Text positions are the left end of
/// the baseline, the way a 2-D canvas `fillText` anchors.
pub trait Canvas {
    fn size(&self) -> (u32, u32);

    /// Reallocate to the given size. Contents are undefined afterwards.
    fn resize(&mut self, width: u32, height: u32);

    fn clear(&mut self);

    /// Adjustments applied to subsequent frame blits.
    fn set_adjustments(&mut self, spec: &AdjustmentSpec);

    fn reset_adjustments(&mut self);

    /// Blit `frame` over the whole canvas, flipped horizontally when
    /// `mirrored`, with the current adjustments.
    fn draw_frame(&mut self, frame: &RgbaImage, mirrored: bool);

    fn stroke_rect(&mut self, rect: BoundingBox, color: Color, line_width: u32);

    fn fill_circle(&mut self, center: Point, radius: u32, color: Color);

    fn draw_text(&mut self, text: &str, baseline_left: Point, style: TextStyle);
}

/// Software canvas over an RGBA pixel buffer.
#[derive(Debug, Clone)]
pub struct Surface {
    image: RgbaImage,
    adjustments: AdjustmentSpec,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            adjustments: AdjustmentSpec::identity(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn put(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return;
        }
        self.image.put_pixel(x as u32, y as u32, color);
    }

    fn paint_glyphs(&mut self, text: &str, left: i64, top: i64, scale: u32, color: Rgba<u8>) {
        let scale = scale.max(1) as i64;
        let mut pen = left;
        for ch in text.chars() {
            for (gx, gy) in font::glyph_pixels(ch) {
                let px = pen + gx as i64 * scale;
                let py = top + gy as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        self.put(px + dx, py + dy, color);
                    }
                }
            }
            pen += font::ADVANCE as i64 * scale;
        }
    }
}

impl Canvas for Surface {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width, height);
    }

    fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = Rgba([0, 0, 0, 0]);
        }
    }

    fn set_adjustments(&mut self, spec: &AdjustmentSpec) {
        self.adjustments = spec.clone();
    }

    fn reset_adjustments(&mut self) {
        self.adjustments = AdjustmentSpec::identity();
    }

    fn draw_frame(&mut self, frame: &RgbaImage, mirrored: bool) {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let mut layer = if frame.dimensions() == (w, h) {
            frame.clone()
        } else {
            imageops::resize(frame, w, h, imageops::FilterType::Triangle)
        };
        if mirrored {
            imageops::flip_horizontal_in_place(&mut layer);
        }
        apply_adjustments(&mut layer, &self.adjustments);
        imageops::overlay(&mut self.image, &layer, 0, 0);
    }

    fn stroke_rect(&mut self, rect: BoundingBox, color: Color, line_width: u32) {
        let x = rect.x.round() as i32;
        let y = rect.y.round() as i32;
        let w = rect.width.round() as i32;
        let h = rect.height.round() as i32;
        if w <= 0 || h <= 0 {
            return;
        }
        // The stroke straddles the path, half inside and half outside.
        let lw = line_width.max(1) as i32;
        let first = -(lw / 2);
        for k in first..first + lw {
            let (rw, rh) = (w + 2 * k, h + 2 * k);
            if rw <= 0 || rh <= 0 {
                continue;
            }
            let r = Rect::at(x - k, y - k).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(&mut self.image, r, color.to_rgba());
        }
    }

    fn fill_circle(&mut self, center: Point, radius: u32, color: Color) {
        draw_filled_circle_mut(
            &mut self.image,
            (center.x.round() as i32, center.y.round() as i32),
            radius as i32,
            color.to_rgba(),
        );
    }

    fn draw_text(&mut self, text: &str, baseline_left: Point, style: TextStyle) {
        let scale = style.scale.max(1);
        let left = baseline_left.x.round() as i64;
        let top = baseline_left.y.round() as i64 - (font::GLYPH_HEIGHT * scale) as i64;

        if let Some(outline) = style.outline {
            let o = scale as i64;
            for (dx, dy) in [(-o, -o), (0, -o), (o, -o), (-o, 0), (o, 0), (-o, o), (0, o), (o, o)] {
                self.paint_glyphs(text, left + dx, top + dy, scale, outline.to_rgba());
            }
        }
        self.paint_glyphs(text, left, top, scale, style.color.to_rgba());
    }
}
