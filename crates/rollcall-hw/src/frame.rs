//! Frame type and YUYV/RGB3 to RGB conversion.

use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an already-decoded image as a frame (used by tests and file sources).
    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using the BT.601 integer transform.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Copy a packed 24-bit RGB buffer into an image.
pub fn rgb3_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
