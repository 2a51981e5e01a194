//! Software implementation of the adjustment kinds on RGBA pixels.
//!
//! Color steps use the Filter Effects Module matrices (the same math
//! browsers use for CSS `filter`). Consecutive color steps share one pass
//! over the image; results are clamped to [0, 1] after every step. Blur
//! breaks a run because it needs neighbouring pixels.

use crate::filter::{Adjustment, AdjustmentKind, AdjustmentSpec};
use image::RgbaImage;

/// A 3x3 color matrix plus per-channel offset, in normalized [0, 1] units.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    m: [[f32; 3]; 3],
    offset: [f32; 3],
}

impl Affine {
    fn matrix(m: [[f32; 3]; 3]) -> Self {
        Self { m, offset: [0.0; 3] }
    }

    /// `c' = c * scale + offset` on every channel.
    fn linear(scale: f32, offset: f32) -> Self {
        Self {
            m: [[scale, 0.0, 0.0], [0.0, scale, 0.0], [0.0, 0.0, scale]],
            offset: [offset; 3],
        }
    }

    fn grayscale(amount: f32) -> Self {
        let a = 1.0 - amount.clamp(0.0, 1.0);
        Self::matrix([
            [0.2126 + 0.7874 * a, 0.7152 - 0.7152 * a, 0.0722 - 0.0722 * a],
            [0.2126 - 0.2126 * a, 0.7152 + 0.2848 * a, 0.0722 - 0.0722 * a],
            [0.2126 - 0.2126 * a, 0.7152 - 0.7152 * a, 0.0722 + 0.9278 * a],
        ])
    }

    fn sepia(amount: f32) -> Self {
        let a = 1.0 - amount.clamp(0.0, 1.0);
        Self::matrix([
            [0.393 + 0.607 * a, 0.769 - 0.769 * a, 0.189 - 0.189 * a],
            [0.349 - 0.349 * a, 0.686 + 0.314 * a, 0.168 - 0.168 * a],
            [0.272 - 0.272 * a, 0.534 - 0.534 * a, 0.131 + 0.869 * a],
        ])
    }

    fn saturate(s: f32) -> Self {
        let s = s.max(0.0);
        Self::matrix([
            [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
            [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
            [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
        ])
    }

    fn hue_rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::matrix([
            [
                0.213 + cos * 0.787 - sin * 0.213,
                0.715 - cos * 0.715 - sin * 0.715,
                0.072 - cos * 0.072 + sin * 0.928,
            ],
            [
                0.213 - cos * 0.213 + sin * 0.143,
                0.715 + cos * 0.285 + sin * 0.140,
                0.072 - cos * 0.072 - sin * 0.283,
            ],
            [
                0.213 - cos * 0.213 - sin * 0.787,
                0.715 - cos * 0.715 + sin * 0.715,
                0.072 + cos * 0.928 + sin * 0.072,
            ],
        ])
    }

    fn for_step(step: &Adjustment) -> Option<Self> {
        let v = step.value;
        let affine = match step.kind {
            AdjustmentKind::Grayscale => Self::grayscale(v / 100.0),
            AdjustmentKind::Sepia => Self::sepia(v / 100.0),
            AdjustmentKind::Invert => {
                let a = (v / 100.0).clamp(0.0, 1.0);
                Self::linear(1.0 - 2.0 * a, a)
            }
            AdjustmentKind::Brightness => Self::linear(v.max(0.0), 0.0),
            AdjustmentKind::Contrast => {
                let k = v.max(0.0);
                Self::linear(k, 0.5 - 0.5 * k)
            }
            AdjustmentKind::Saturate => Self::saturate(v),
            AdjustmentKind::HueRotate => Self::hue_rotate(v),
            AdjustmentKind::Blur => return None,
        };
        Some(affine)
    }

    #[inline]
    fn apply(&self, c: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0f32; 3];
        for (i, row) in self.m.iter().enumerate() {
            out[i] = (row[0] * c[0] + row[1] * c[1] + row[2] * c[2] + self.offset[i]).clamp(0.0, 1.0);
        }
        out
    }
}

/// Apply every step of `spec` to `image` in order. Alpha is left untouched.
pub fn apply_adjustments(image: &mut RgbaImage, spec: &AdjustmentSpec) {
    let mut run: Vec<Affine> = Vec::new();

    for step in spec.steps() {
        if step.is_identity() {
            continue;
        }
        match Affine::for_step(step) {
            Some(affine) => run.push(affine),
            None => {
                flush(image, &mut run);
                gaussian_blur(image, step.value);
            }
        }
    }
    flush(image, &mut run);
}

fn flush(image: &mut RgbaImage, run: &mut Vec<Affine>) {
    if run.is_empty() {
        return;
    }
    for pixel in image.pixels_mut() {
        let mut c = [
            pixel[0] as f32 / 255.0,
            pixel[1] as f32 / 255.0,
            pixel[2] as f32 / 255.0,
        ];
        for affine in run.iter() {
            c = affine.apply(c);
        }
        pixel[0] = (c[0] * 255.0).round() as u8;
        pixel[1] = (c[1] * 255.0).round() as u8;
        pixel[2] = (c[2] * 255.0).round() as u8;
    }
    run.clear();
}

fn gaussian_blur(image: &mut RgbaImage, sigma_px: f32) {
    if sigma_px <= 0.0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    *image = image::imageops::blur(image, sigma_px);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compute_adjustments, FilterId};
    use image::Rgba;

    fn solid(r: u8, g: u8, b: u8) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([r, g, b, 255]))
    }

    fn spec_of(id: FilterId, intensity: i32) -> AdjustmentSpec {
        compute_adjustments(id, intensity, false)
    }

    #[test]
    fn test_identity_spec_leaves_pixels() {
        let mut img = solid(10, 120, 240);
        apply_adjustments(&mut img, &AdjustmentSpec::identity());
        assert_eq!(img, solid(10, 120, 240));

        apply_adjustments(&mut img, &spec_of(FilterId::Noir, 0));
        assert_eq!(img, solid(10, 120, 240));
    }

    #[test]
    fn test_full_grayscale_equalizes_channels() {
        let mut img = solid(255, 0, 0);
        apply_adjustments(&mut img, &spec_of(FilterId::Grayscale, 100));
        let p = img.get_pixel(0, 0);
        assert_eq!(p[0], 54);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn test_full_invert() {
        let mut img = solid(0, 100, 255);
        apply_adjustments(&mut img, &spec_of(FilterId::Invert, 100));
        assert_eq!(img.get_pixel(1, 1).0, [255, 155, 0, 255]);
    }

    #[test]
    fn test_half_invert_is_mid_gray() {
        let mut img = solid(0, 255, 0);
        apply_adjustments(&mut img, &spec_of(FilterId::Invert, 50));
        let p = img.get_pixel(0, 0);
        assert!(p[0] == 127 || p[0] == 128);
        assert!(p[1] == 127 || p[1] == 128);
    }

    #[test]
    fn test_brightness_scales_and_clamps() {
        let mut img = solid(100, 200, 0);
        apply_adjustments(&mut img, &spec_of(FilterId::Brightness, 100));
        assert_eq!(img.get_pixel(0, 0).0, [130, 255, 0, 255]);
    }

    #[test]
    fn test_contrast_pivots_on_mid_gray() {
        let mut img = solid(128, 128, 128);
        apply_adjustments(&mut img, &spec_of(FilterId::Contrast, 100));
        let p = img.get_pixel(0, 0);
        assert!((p[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_full_rotation_is_near_identity() {
        let mut img = solid(200, 60, 30);
        let spec = AdjustmentSpec::from_steps(vec![Adjustment::new(AdjustmentKind::HueRotate, 360.0)]);
        apply_adjustments(&mut img, &spec);
        let p = img.get_pixel(0, 0);
        assert!((p[0] as i32 - 200).abs() <= 1);
        assert!((p[1] as i32 - 60).abs() <= 1);
        assert!((p[2] as i32 - 30).abs() <= 1);
    }

    #[test]
    fn test_blur_keeps_uniform_image() {
        let mut img = solid(90, 90, 90);
        apply_adjustments(&mut img, &spec_of(FilterId::Blur, 100));
        assert_eq!(img.dimensions(), (4, 4));
        for p in img.pixels() {
            assert!((p[0] as i32 - 90).abs() <= 1);
        }
    }

    #[test]
    fn test_vintage_warms_neutral_gray() {
        let mut img = solid(128, 128, 128);
        apply_adjustments(&mut img, &spec_of(FilterId::Vintage, 100));
        let p = img.get_pixel(0, 0);
        assert!(p[0] > p[2], "sepia should push red above blue: {:?}", p);
    }
}
