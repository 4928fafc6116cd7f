//! Output sinks for annotated frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;
use rollcall_core::RecognizedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
    #[error("display backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "highgui")]
impl From<opencv::Error> for DisplayError {
    fn from(e: opencv::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Whether the loop should keep going after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Receives each annotated frame together with its labelled faces.
pub trait Display {
    fn show(&mut self, frame: &RgbImage, faces: &[RecognizedFace]) -> Result<Flow, DisplayError>;

    /// Release any window or device resources.
    fn close(&mut self) {}
}

impl<D: Display + ?Sized> Display for Box<D> {
    fn show(&mut self, frame: &RgbImage, faces: &[RecognizedFace]) -> Result<Flow, DisplayError> {
        (**self).show(frame, faces)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Logs each frame's labels and stops on SIGINT or SIGTERM.
pub struct HeadlessDisplay {
    stop: Arc<AtomicBool>,
}

impl HeadlessDisplay {
    pub fn new() -> Result<Self, DisplayError> {
        let stop = Arc::new(AtomicBool::new(false));
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&stop))?;
        }
        Ok(Self { stop })
    }

    #[cfg(test)]
    fn with_flag(stop: Arc<AtomicBool>) -> Self {
        Self { stop }
    }
}

impl Display for HeadlessDisplay {
    fn show(&mut self, _frame: &RgbImage, faces: &[RecognizedFace]) -> Result<Flow, DisplayError> {
        for face in faces {
            tracing::debug!(
                label = %face.label,
                top = face.location.top,
                left = face.location.left,
                bottom = face.location.bottom,
                right = face.location.right,
                distance = ?face.distance,
                "face"
            );
        }

        if self.stop.load(Ordering::Relaxed) {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

#[cfg(feature = "highgui")]
pub use window::HighguiDisplay;

#[cfg(feature = "highgui")]
mod window {
    use super::{Display, DisplayError, Flow};
    use image::RgbImage;
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use opencv::highgui;
    use opencv::prelude::*;
    use rollcall_core::RecognizedFace;

    const WINDOW_TITLE: &str = "Webcam";
    const KEY_ESC: i32 = 27;

    /// Shows frames in an OpenCV window; Esc stops the loop.
    pub struct HighguiDisplay {
        open: bool,
    }

    impl HighguiDisplay {
        pub fn open() -> Result<Self, DisplayError> {
            highgui::named_window(WINDOW_TITLE, highgui::WINDOW_AUTOSIZE)?;
            Ok(Self { open: true })
        }
    }

    impl Display for HighguiDisplay {
        fn show(
            &mut self,
            frame: &RgbImage,
            _faces: &[RecognizedFace],
        ) -> Result<Flow, DisplayError> {
            let mat = to_bgr_mat(frame)?;
            highgui::imshow(WINDOW_TITLE, &mat)?;
            let key = highgui::wait_key(1)?;
            if key & 0xFF == KEY_ESC {
                Ok(Flow::Stop)
            } else {
                Ok(Flow::Continue)
            }
        }

        fn close(&mut self) {
            if std::mem::take(&mut self.open) {
                if let Err(e) = highgui::destroy_all_windows() {
                    tracing::warn!(error = %e, "failed to close window");
                }
            }
        }
    }

    fn to_bgr_mat(frame: &RgbImage) -> Result<Mat, DisplayError> {
        let mut mat = Mat::new_rows_cols_with_default(
            frame.height() as i32,
            frame.width() as i32,
            CV_8UC3,
            Scalar::all(0.0),
        )?;
        let bytes = mat.data_bytes_mut()?;
        for (dst, src) in bytes.chunks_exact_mut(3).zip(frame.pixels()) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
        Ok(mat)
    }
}

/// The window sink when built with `highgui` and not forced headless.
pub fn open(headless: bool) -> Result<Box<dyn Display>, DisplayError> {
    #[cfg(feature = "highgui")]
    if !headless {
        return Ok(Box::new(HighguiDisplay::open()?));
    }
    #[cfg(not(feature = "highgui"))]
    if !headless {
        tracing::info!("built without highgui, frames are not shown");
    }
    Ok(Box::new(HeadlessDisplay::new()?))
}
