//! Test doubles shared by the unit tests in this crate.

use crate::engine::{EngineError, FaceEngine};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::collections::HashMap;

const COLOR_TOLERANCE: i32 = 24;

pub(crate) fn face_at(x: f32, y: f32, side: f32, confidence: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: side,
        height: side,
        confidence,
        landmarks: None,
    }
}

pub(crate) fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

/// Engine that "sees" the faces registered for an image's top-left pixel colour.
///
/// Colours match within a small tolerance so lossy JPEG fixtures still resolve.
#[derive(Default)]
pub(crate) struct ColorKeyedEngine {
    faces: HashMap<[u8; 3], Vec<(BoundingBox, Embedding)>>,
    /// Dimensions of every image passed to `locate`.
    pub seen: Vec<(u32, u32)>,
}

impl ColorKeyedEngine {
    pub fn with_faces(mut self, color: [u8; 3], faces: Vec<(BoundingBox, Embedding)>) -> Self {
        self.faces.insert(color, faces);
        self
    }

    fn lookup(&self, image: &RgbImage) -> &[(BoundingBox, Embedding)] {
        let Some(pixel) = image.get_pixel_checked(0, 0) else {
            return &[];
        };
        self.faces
            .iter()
            .find(|(color, _)| {
                color
                    .iter()
                    .zip(pixel.0.iter())
                    .map(|(&a, &b)| (a as i32 - b as i32).abs())
                    .sum::<i32>()
                    <= COLOR_TOLERANCE
            })
            .map(|(_, faces)| faces.as_slice())
            .unwrap_or(&[])
    }
}

impl FaceEngine for ColorKeyedEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        self.seen.push(image.dimensions());
        Ok(self.lookup(image).iter().map(|(b, _)| b.clone()).collect())
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EngineError> {
        Ok(self
            .lookup(image)
            .iter()
            .take(faces.len())
            .map(|(_, e)| e.clone())
            .collect())
    }
}
