//! rollcall-core: face recognition and attendance logic.
//!
//! Face detection (SCRFD) and embedding (ArcFace) run through ONNX Runtime
//! behind the [`FaceEngine`] trait; everything else here is plain logic over
//! embeddings, frames and the CSV log.

pub mod alignment;
pub mod annotate;
pub mod attendance;
pub mod detector;
pub mod engine;
pub mod enrollment;
pub mod matcher;
pub mod recognition;
pub mod recognizer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use annotate::{AnnotateError, Annotator};
pub use attendance::{AttendanceLog, AttendanceRecord, Clock, SystemClock};
pub use engine::{EngineError, FaceEngine, OnnxEngine};
pub use enrollment::{Enrollee, EnrollmentError};
pub use matcher::{CosineMatcher, KnownFaces, Label, Matcher, MATCH_TOLERANCE};
pub use recognition::{FrameMatcher, RecognizedFace, DEFAULT_DOWNSCALE};
pub use types::{BoundingBox, Embedding, FaceLocation};
