//! Box, label strip and name text drawn straight into the RGB frame.

use crate::types::FaceLocation;
use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

static LABEL_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const BOX_THICKNESS: i32 = 2;
/// Height of the filled strip along the bottom edge of the box.
pub const LABEL_STRIP_HEIGHT: i32 = 35;
const TEXT_SCALE: f32 = 24.0;
const TEXT_INSET: i32 = 6;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("label font: {0}")]
    Font(#[from] InvalidFont),
}

/// Draws face annotations with the embedded label font.
pub struct Annotator {
    font: FontRef<'static>,
}

impl Annotator {
    pub fn new() -> Result<Self, AnnotateError> {
        Ok(Self {
            font: FontRef::try_from_slice(LABEL_FONT)?,
        })
    }

    /// Outline the face, fill the strip inside its bottom edge and write `label` on it.
    pub fn draw(&self, image: &mut RgbImage, location: &FaceLocation, label: &str) {
        let FaceLocation {
            top,
            right,
            bottom,
            left,
        } = *location;

        for t in 0..BOX_THICKNESS {
            if let Some(rect) = span(left + t, top + t, right - t, bottom - t) {
                draw_hollow_rect_mut(image, rect, ANNOTATION_COLOR);
            }
        }
        if let Some(strip) = span(left, bottom - LABEL_STRIP_HEIGHT, right, bottom) {
            draw_filled_rect_mut(image, strip, ANNOTATION_COLOR);
        }

        if !label.is_empty() {
            let (x, y) = label_origin(location);
            let scale = PxScale::from(TEXT_SCALE);
            draw_text_mut(image, TEXT_COLOR, x, y, scale, &self.font, label);
        }
    }
}

/// Top-left corner of the label text, inset into the strip.
fn label_origin(location: &FaceLocation) -> (i32, i32) {
    (
        location.left + TEXT_INSET,
        location.bottom - LABEL_STRIP_HEIGHT + TEXT_INSET,
    )
}

/// The inclusive rectangle `[x0, x1] × [y0, y1]`, or `None` if it is empty.
fn span(x0: i32, y0: i32, x1: i32, y1: i32) -> Option<Rect> {
    if x1 < x0 || y1 < y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32))
}
