use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Integer face rectangle as (top, right, bottom, left) edges, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    /// Multiply every edge by `factor`, mapping a downsampled location back to
    /// the full-resolution frame.
    pub fn scaled(&self, factor: u32) -> Self {
        let f = factor as i32;
        Self {
            top: self.top * f,
            right: self.right * f,
            bottom: self.bottom * f,
            left: self.left * f,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

impl From<&BoundingBox> for FaceLocation {
    fn from(b: &BoundingBox) -> Self {
        Self {
            top: b.y.round() as i32,
            right: (b.x + b.width).round() as i32,
            bottom: (b.y + b.height).round() as i32,
            left: b.x.round() as i32,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance `1 - similarity`, in [0, 2]. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}
