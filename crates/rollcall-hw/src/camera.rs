//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const MAX_DEVICE_INDEX: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame conversion failed: {0}")]
    Conversion(#[from] FrameError),
}

/// Anything that can hand out frames synchronously, one at a time.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// A capture-capable V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
    /// FourCC codes the device advertises, e.g. `YUYV`, `MJPG`.
    pub formats: Vec<String>,
}

/// Pixel layouts the frame converter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    /// Preference order used during negotiation.
    const PREFERRED: [PixelFormat; 2] = [PixelFormat::Yuyv, PixelFormat::Rgb3];

    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Rgb3 => FourCC::new(b"RGB3"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|f| f.fourcc() == fourcc)
    }

    fn convert(self, buf: &[u8], width: u32, height: u32) -> Result<image::RgbImage, FrameError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            PixelFormat::Rgb3 => frame::rgb3_to_rgb(buf, width, height),
        }
    }
}

/// The format the driver agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// An open webcam with a running mmap stream. Dropping it stops the stream
/// and closes the device.
pub struct Camera {
    stream: MmapStream<'static>,
    format: CaptureFormat,
}

impl Camera {
    /// Open `device_path` (e.g. `/dev/video0`), negotiate 640x480 and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(device_path.to_string()));
        }

        let format = negotiate(&device)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = format.width,
            height = format.height,
            pixel_format = ?format.pixel_format,
            "camera opened"
        );

        let stream: MmapStream<'static> =
            MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| open_error(device_path, e))?;

        Ok(Self { stream, format })
    }

    /// Dequeue the next buffer and convert it to an RGB frame.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue buffer: {e}")))?;

        if meta.bytesused == 0 {
            return Err(CameraError::CaptureFailed("empty buffer".into()));
        }

        let CaptureFormat {
            width,
            height,
            pixel_format,
        } = self.format;
        let used = &buf[..(meta.bytesused as usize).min(buf.len())];
        let image = pixel_format.convert(used, width, height)?;

        Ok(Frame::from_image(image, meta.sequence))
    }

    /// Capture-capable devices among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| describe(&path))
            .collect()
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Ask for each preferred format in turn and keep the first one the driver accepts.
fn negotiate(device: &Device) -> Result<CaptureFormat, CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;

    for wanted in PixelFormat::PREFERRED {
        fmt.fourcc = wanted.fourcc();
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let got = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;

        if let Some(pixel_format) = PixelFormat::from_fourcc(got.fourcc) {
            return Ok(CaptureFormat {
                width: got.width,
                height: got.height,
                pixel_format,
            });
        }
        tracing::debug!(wanted = ?wanted, got = ?got.fourcc, "format rejected by driver");
    }

    Err(CameraError::FormatNegotiationFailed(
        "device offers neither YUYV nor RGB3".into(),
    ))
}

fn describe(path: &str) -> Option<DeviceInfo> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return None;
    }

    let formats = dev
        .enum_formats()
        .map(|list| list.iter().map(|f| f.fourcc.to_string()).collect())
        .unwrap_or_default();

    Some(DeviceInfo {
        path: path.to_string(),
        name: caps.card,
        driver: caps.driver,
        bus: caps.bus,
        formats,
    })
}

fn open_error(path: &str, e: io::Error) -> CameraError {
    if e.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy(path.to_string())
    } else {
        CameraError::DeviceNotFound(format!("{path}: {e}"))
    }
}
