//! Still capture: displayed frame plus stickers, encoded for export.

use crate::canvas::{Canvas, Color, Surface, TextStyle};
use crate::font;
use crate::stickers::PlacedSticker;
use crate::types::Point;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::io::Cursor;
use thiserror::Error;

pub const FILENAME_PREFIX: &str = "beautify-me-";
pub const JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("nothing to capture: the displayed surface is empty")]
    EmptySurface,
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Produces the unrotated artwork for a sticker, `size` x `size` pixels.
pub trait StickerArt {
    fn render(&self, sticker: &PlacedSticker) -> RgbaImage;
}

/// Round badge with the sticker's initial, used where no emoji font is
/// available.
#[derive(Debug, Clone, Copy, Default)]
pub struct BadgeArt;

const BADGE_PALETTE: [u32; 8] = [
    0xFF6B6B, 0x4ECDC4, 0x45B7D1, 0xFFA07A, 0x98D8C8, 0x6BCF7F, 0xF7DC6F, 0xC39BD3,
];

impl BadgeArt {
    fn color_for(template_id: &str) -> Color {
        // FNV-1a; stable across runs so a template always gets one color.
        let mut h: u32 = 0x811c_9dc5;
        for b in template_id.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(0x0100_0193);
        }
        Color::hex(BADGE_PALETTE[(h as usize) % BADGE_PALETTE.len()])
    }
}

impl StickerArt for BadgeArt {
    fn render(&self, sticker: &PlacedSticker) -> RgbaImage {
        let size = sticker.size.max(2);
        let mut tile = Surface::new(size, size);
        let half = size as f32 / 2.0;
        tile.fill_circle(
            Point::new(half, half),
            size / 2 - 1,
            Self::color_for(&sticker.template_id),
        );

        let initial: String = sticker.name.chars().take(1).collect();
        let scale = (size / 14).max(1);
        let width = font::text_width(&initial, scale) as f32;
        let glyph_h = (font::GLYPH_HEIGHT * scale) as f32;
        tile.draw_text(
            &initial,
            Point::new(half - width / 2.0, half + glyph_h / 2.0),
            TextStyle::outlined(Color::WHITE, Color::BLACK, scale),
        );
        tile.into_image()
    }
}

/// Absolute center of a sticker on a `width` x `height` surface.
pub fn sticker_center(sticker: &PlacedSticker, width: u32, height: u32) -> (f32, f32) {
    (
        sticker.x * width as f32 / 100.0,
        sticker.y * height as f32 / 100.0,
    )
}

/// Composite `stickers` over a copy of the displayed pixels.
///
/// The displayed surface is already mirrored, so percentage positions map
/// straight onto it, exactly where the overlay layer shows them.
pub fn capture_still(displayed: &RgbaImage, stickers: &[PlacedSticker], art: &dyn StickerArt) -> RgbaImage {
    let (w, h) = displayed.dimensions();
    let mut composite = displayed.clone();

    for sticker in stickers {
        let tile = art.render(sticker);
        let tile = rotated(&tile, sticker.rotation);
        let (cx, cy) = sticker_center(sticker, w, h);
        let left = (cx - tile.width() as f32 / 2.0).round() as i64;
        let top = (cy - tile.height() as f32 / 2.0).round() as i64;
        imageops::overlay(&mut composite, &tile, left, top);
    }
    composite
}

/// Rotate clockwise by `degrees` onto a canvas large enough to hold every
/// corner.
fn rotated(tile: &RgbaImage, degrees: f32) -> RgbaImage {
    if degrees.rem_euclid(360.0) == 0.0 {
        return tile.clone();
    }
    let (w, h) = tile.dimensions();
    let side = ((w as f32).hypot(h as f32)).ceil() as u32;
    let mut padded = RgbaImage::new(side, side);
    imageops::overlay(
        &mut padded,
        tile,
        ((side - w) / 2) as i64,
        ((side - h) / 2) as i64,
    );
    rotate_about_center(
        &padded,
        degrees.to_radians(),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    )
}

/// Lossless encoding for download.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CaptureError::EmptySurface);
    }
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// JPEG at [`JPEG_QUALITY`], alpha dropped.
pub fn encode_jpeg(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CaptureError::EmptySurface);
    }
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(buf)
}

/// Timestamped download name, `beautify-me-<unix-millis>.png`.
pub fn suggested_filename(unix_millis: i64) -> String {
    format!("{FILENAME_PREFIX}{unix_millis}.png")
}
