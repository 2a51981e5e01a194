//! Face alignment for descriptor extraction.
//!
//! Warps the face described by five landmarks onto the canonical 112x112
//! ArcFace layout with a least-squares similarity transform.

use beautify_core::Point;
use image::{Rgb, RgbImage, RgbaImage};

/// Canonical landmark positions in a 112x112 crop: eyes, nose, mouth corners.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// 4-DOF similarity `dst = [[a, -b], [b, a]] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Each pair contributes the rows `[sx, -sy, 1, 0]` and `[sy, sx, 0, 1]`
    /// to the normal equations over `(a, b, tx, ty)`.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f64; 4]; 4];
        let mut atb = [0.0f64; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Similarity {
                a: a as f32,
                b: b as f32,
                tx: tx as f32,
                ty: ty as f32,
            },
            None => Self::IDENTITY,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, `None` when the transform collapses the plane.
    pub fn inverse(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Similarity {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f64; 4]; 4], mut rhs: [f64; 4]) -> Option<[f64; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        let tail: f64 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of the RGB channels; outside the frame reads as black.
fn sample(frame: &RgbaImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= w || py >= h {
            return [0.0; 3];
        }
        let p = frame.get_pixel(px as u32, py as u32);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    let taps = [
        (texel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (texel(x0 + 1, y0), fx * (1.0 - fy)),
        (texel(x0, y0 + 1), (1.0 - fx) * fy),
        (texel(x0 + 1, y0 + 1), fx * fy),
    ];
    let mut out = [0.0f32; 3];
    for (rgb, weight) in taps {
        for c in 0..3 {
            out[c] += rgb[c] * weight;
        }
    }
    out
}

/// Warp the face with the given landmarks onto a 112x112 RGB crop.
pub fn align_face(frame: &RgbaImage, landmarks: &[Point]) -> Option<RgbImage> {
    let src: [(f32, f32); 5] = match landmarks {
        [a, b, c, d, e] => [(a.x, a.y), (b.x, b.y), (c.x, c.y), (d.x, d.y), (e.x, e.y)],
        _ => return None,
    };
    let back = Similarity::estimate(&src, &REFERENCE_LANDMARKS).inverse()?;

    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = back.apply(ox as f32, oy as f32);
        let [r, g, b] = sample(frame, sx, sy);
        Rgb([
            r.round().clamp(0.0, 255.0) as u8,
            g.round().clamp(0.0, 255.0) as u8,
            b.round().clamp(0.0, 255.0) as u8,
        ])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn points(pts: &[(f32, f32); 5]) -> Vec<Point> {
        pts.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_identity_estimate() {
        let m = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS);
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_half_scale_estimate() {
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = Similarity::estimate(&src, &REFERENCE_LANDMARKS);
        assert!((m.a - 0.5).abs() < 1e-3, "a = {}", m.a);
    }

    #[test]
    fn test_rotation_estimate() {
        // Rotate the reference by 90 degrees: (x, y) -> (-y, x)
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (-y, x));
        let m = Similarity::estimate(&src, &REFERENCE_LANDMARKS);
        let (x, y) = m.apply(src[2].0, src[2].1);
        assert!((x - REFERENCE_LANDMARKS[2].0).abs() < 1e-2);
        assert!((y - REFERENCE_LANDMARKS[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_inverse_round_trips_a_point() {
        let m = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let inv = m.inverse().unwrap();
        let (x, y) = m.apply(31.0, 17.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 31.0).abs() < 1e-3 && (by - 17.0).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_inverse() {
        let collapsed = Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(collapsed.inverse().is_none());
    }

    #[test]
    fn test_align_requires_five_landmarks() {
        let frame = RgbaImage::new(64, 64);
        let three = vec![Point::new(1.0, 1.0); 3];
        assert!(align_face(&frame, &three).is_none());
    }

    #[test]
    fn test_align_output_size_and_color() {
        let frame = RgbaImage::from_pixel(640, 480, Rgba([200, 100, 50, 255]));
        let offset = REFERENCE_LANDMARKS.map(|(x, y)| (x + 200.0, y + 150.0));
        let aligned = align_face(&frame, &points(&offset)).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(*aligned.get_pixel(56, 56), Rgb([200, 100, 50]));
    }

    #[test]
    fn test_bright_patch_lands_on_reference_eye() {
        let mut frame = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let src = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..=62 {
            for x in 78..=82 {
                frame.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }

        let aligned = align_face(&frame, &points(&src)).unwrap();
        let (ex, ey) = (
            REFERENCE_LANDMARKS[0].0.round() as u32,
            REFERENCE_LANDMARKS[0].1.round() as u32,
        );
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "eye patch not near ({ex}, {ey}): {brightest}");
    }
}
