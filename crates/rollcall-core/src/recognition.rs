//! Per-frame recognition: downsample, detect, encode, label.

use crate::engine::{EngineError, FaceEngine};
use crate::matcher::{identify, CosineMatcher, KnownFaces, Label, Matcher};
use crate::types::FaceLocation;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;

/// Frames are shrunk by this linear factor before detection.
pub const DEFAULT_DOWNSCALE: u32 = 4;

/// A labelled face in full-resolution frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFace {
    pub label: Label,
    pub location: FaceLocation,
    /// Distance to the nearest known embedding, if any were enrolled.
    pub distance: Option<f32>,
}

/// Labels every face in a frame against a fixed known-face table.
pub struct FrameMatcher<'k, E, M = CosineMatcher> {
    engine: E,
    matcher: M,
    known: &'k KnownFaces,
    downscale: u32,
}

impl<'k, E: FaceEngine> FrameMatcher<'k, E> {
    pub fn new(engine: E, known: &'k KnownFaces) -> Self {
        Self {
            engine,
            matcher: CosineMatcher,
            known,
            downscale: DEFAULT_DOWNSCALE,
        }
    }
}

impl<'k, E: FaceEngine, M: Matcher> FrameMatcher<'k, E, M> {
    pub fn with_matcher<N: Matcher>(self, matcher: N) -> FrameMatcher<'k, E, N> {
        FrameMatcher {
            engine: self.engine,
            matcher,
            known: self.known,
            downscale: self.downscale,
        }
    }

    /// Set the downsampling factor; values below 1 are treated as 1.
    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale = factor.max(1);
        self
    }

    pub fn downscale(&self) -> u32 {
        self.downscale
    }

    pub fn known(&self) -> &KnownFaces {
        self.known
    }

    /// Detect and label every face in `frame`. No faces yields an empty list.
    pub fn process(&mut self, frame: &RgbImage) -> Result<Vec<RecognizedFace>, EngineError> {
        let small = downsample(frame, self.downscale);

        let faces = self.engine.locate(&small)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.engine.encode(&small, &faces)?;

        let recognized = faces
            .iter()
            .zip(embeddings.iter())
            .map(|(face, embedding)| {
                let id = identify(&self.matcher, self.known, embedding);
                RecognizedFace {
                    label: id.label,
                    location: FaceLocation::from(face).scaled(self.downscale),
                    distance: id.distance,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            faces = recognized.len(),
            known = recognized.iter().filter(|f| f.label.is_known()).count(),
            "frame processed"
        );

        Ok(recognized)
    }
}

/// Shrink `frame` by an integer factor; factor 1 borrows the frame as-is.
pub fn downsample(frame: &RgbImage, factor: u32) -> Cow<'_, RgbImage> {
    if factor <= 1 {
        return Cow::Borrowed(frame);
    }
    let width = (frame.width() / factor).max(1);
    let height = (frame.height() / factor).max(1);
    Cow::Owned(imageops::resize(frame, width, height, FilterType::Triangle))
}
