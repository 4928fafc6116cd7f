//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the five InsightFace reference landmarks of a
//! 112×112 crop, estimating scale, rotation and translation by least squares.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub(crate) const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst`.
    ///
    /// Each pair contributes two rows to the normal equations:
    ///   [sx, -sy, 1, 0] · [a, b, tx, ty] = dx
    ///   [sy,  sx, 0, 1] · [a, b, tx, ty] = dy
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self {
                a: 1.0,
                b: 0.0,
                tx: 0.0,
                ty: 0.0,
            },
        }
    }

    /// Inverse mapping from an output pixel to source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting; `None` if the system is singular.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one pixel; out-of-bounds neighbours count as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let (w, h) = (image.width() as i64, image.height() as i64);

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            image.get_pixel(px as u32, py as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bot = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8
    }))
}

/// Align a detected face to a canonical 112×112 RGB crop for ArcFace.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}
