//! rollcall-hw: hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and RGB frame conversion behind the
//! [`FrameSource`] trait.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureFormat, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
