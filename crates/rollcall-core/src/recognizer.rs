//! ArcFace face encoder (w600k_r50) on ONNX Runtime.
//!
//! Every face in a frame is aligned to a 112x112 crop and the whole set runs
//! through the model as a single batch. Output embeddings are L2-normalized,
//! so cosine distance is `1 - dot`.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array4, ArrayViewMut3, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_CENTER: f32 = 127.5;
const PIXEL_SCALE: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download w600k_r50.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        Ok(Self { session })
    }

    /// One embedding per face, in input order. An empty slice skips inference.
    pub fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, RecognizerError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let crops: Vec<RgbImage> = faces.iter().map(|face| face_crop(image, face)).collect();
        let input = batch_tensor(&crops);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        split_embeddings(raw, faces.len())
    }
}

/// Landmark-aligned crop, or a plain box crop when the detector gave no landmarks.
fn face_crop(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    if let Some(landmarks) = &face.landmarks {
        return alignment::align_face(image, landmarks);
    }

    let x = face.x.max(0.0) as u32;
    let y = face.y.max(0.0) as u32;
    let w = (face.width.max(1.0) as u32).min(image.width().saturating_sub(x)).max(1);
    let h = (face.height.max(1.0) as u32).min(image.height().saturating_sub(y)).max(1);
    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

/// Stack aligned crops into an `N x 3 x 112 x 112` tensor scaled to [-1, 1].
fn batch_tensor(crops: &[RgbImage]) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((crops.len(), 3, size, size));
    for (crop, slot) in crops.iter().zip(tensor.axis_iter_mut(Axis(0))) {
        fill_chw(crop, slot);
    }
    tensor
}

fn fill_chw(crop: &RgbImage, mut slot: ArrayViewMut3<'_, f32>) {
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            slot[[c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_CENTER) / PIXEL_SCALE;
        }
    }
}

fn split_embeddings(raw: &[f32], faces: usize) -> Result<Vec<Embedding>, RecognizerError> {
    if raw.len() != faces * EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {faces} x {EMBEDDING_DIM} values, got {}",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(EMBEDDING_DIM)
        .map(|chunk| Embedding {
            values: l2_normalize(chunk),
            model_version: Some(MODEL_VERSION.to_string()),
        })
        .collect())
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
