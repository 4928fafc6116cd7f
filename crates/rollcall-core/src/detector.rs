//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD anchor-free detector over three feature strides and merges
//! the candidates with non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from letterboxed model space back to source image pixels.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output positions for strides [8, 16, 32].
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let outputs = map_outputs(&output_names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self { session, outputs })
    }

    /// Detect faces in an RGB image, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = letterbox_tensor(image, SCRFD_INPUT_SIZE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let idx = self.outputs[slot];
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(idx.score, "scores")?;
            let bboxes = extract(idx.bbox, "bboxes")?;
            let kps = extract(idx.kps, "kps")?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Find each stride's tensors by name ("score_8", "bbox_16", "kps_32", ...).
///
/// Exports with generic numeric names fall back to the standard layout:
/// scores 0-2, bboxes 3-5, keypoints 6-8.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name = |stride: usize| -> Option<StrideOutputs> {
        Some(StrideOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        })
    };

    if let [Some(a), Some(b), Some(c)] = SCRFD_STRIDES.map(by_name) {
        return [a, b, c];
    }

    tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
    std::array::from_fn(|i| StrideOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Letterbox an RGB image into a square NCHW tensor normalized for SCRFD.
///
/// Padding is filled with the mean so it normalizes to 0.0.
fn letterbox_tensor(image: &RgbImage, size: usize) -> (Array4<f32>, Letterbox) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let scale = (size as f32 / width).min(size as f32 / height);

    let new_w = ((width * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, size as u32);
    let pad_x = (size as u32 - new_w) / 2;
    let pad_y = (size as u32 - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), 0.0);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Decode the candidates of one stride level into source-image boxes.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let step = stride as f32;

    scores
        .iter()
        .take(grid * grid * SCRFD_ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            // Distances from the anchor to the left, top, right and bottom edges.
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; the result is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}
