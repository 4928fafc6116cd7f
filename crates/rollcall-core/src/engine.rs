//! The face engine seam: locate faces in an image and encode them.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceEncoder, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection plus embedding extraction.
pub trait FaceEngine {
    /// All faces in the image, most confident first. Empty if there are none.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;

    /// One embedding per face, in the order given.
    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EngineError>;
}

impl<E: FaceEngine + ?Sized> FaceEngine for &mut E {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        (**self).locate(image)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EngineError> {
        (**self).encode(image, faces)
    }
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxEngine {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxEngine {
    /// Load both models, failing fast if either is missing.
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(detector_path)?;
        tracing::info!(path = detector_path, "SCRFD detector loaded");

        let encoder = FaceEncoder::load(recognizer_path)?;
        tracing::info!(path = recognizer_path, "ArcFace encoder loaded");

        Ok(Self { detector, encoder })
    }
}

impl FaceEngine for OnnxEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, EngineError> {
        Ok(self.encoder.encode(image, faces)?)
    }
}
