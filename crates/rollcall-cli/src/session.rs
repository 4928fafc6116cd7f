//! The capture → recognize → record → display loop.

use std::time::Duration;

use image::RgbImage;
use rollcall_core::attendance::AttendanceError;
use rollcall_core::{
    AnnotateError, Annotator, AttendanceLog, Clock, EngineError, FaceEngine, FrameMatcher,
    Matcher, RecognizedFace,
};
use rollcall_hw::{CameraError, FrameSource};
use thiserror::Error;

use crate::display::{Display, DisplayError, Flow};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable after {failures} consecutive failed reads: {last}")]
    CameraUnavailable { failures: u32, last: CameraError },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error(transparent)]
    Annotate(#[from] AnnotateError),
}

/// Retry behaviour for failed frame reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before giving up; 0 retries forever.
    pub max_consecutive_failures: u32,
    /// Wait after the first failure; doubles on each further failure.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 100,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures != 0 && failures >= self.max_consecutive_failures
    }

    /// Wait before retry number `failures` (1-based).
    fn backoff(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub retry: RetryPolicy,
    /// Stop after this many processed frames.
    pub max_frames: Option<u64>,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub faces: u64,
    pub recorded: u64,
    pub read_failures: u64,
}

/// Run the attendance loop until the display asks to stop, `max_frames` is
/// reached, or an error ends it. The display is closed on every exit path.
pub fn run<S, E, M, C, D>(
    source: &mut S,
    matcher: &mut FrameMatcher<'_, E, M>,
    log: &mut AttendanceLog<C>,
    display: &mut D,
    options: &RunOptions,
) -> Result<SessionSummary, SessionError>
where
    S: FrameSource,
    E: FaceEngine,
    M: Matcher,
    C: Clock,
    D: Display + ?Sized,
{
    tracing::info!(
        known = matcher.known().len(),
        downscale = matcher.downscale(),
        "attendance loop started"
    );

    let result = run_loop(source, matcher, log, display, options);
    display.close();

    match &result {
        Ok(summary) => tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            recorded = summary.recorded,
            read_failures = summary.read_failures,
            "attendance loop finished"
        ),
        Err(e) => tracing::error!(error = %e, "attendance loop failed"),
    }
    result
}

fn run_loop<S, E, M, C, D>(
    source: &mut S,
    matcher: &mut FrameMatcher<'_, E, M>,
    log: &mut AttendanceLog<C>,
    display: &mut D,
    options: &RunOptions,
) -> Result<SessionSummary, SessionError>
where
    S: FrameSource,
    E: FaceEngine,
    M: Matcher,
    C: Clock,
    D: Display + ?Sized,
{
    let annotator = Annotator::new()?;
    let mut summary = SessionSummary::default();
    let mut failures = 0u32;

    loop {
        if options.max_frames.is_some_and(|max| summary.frames >= max) {
            return Ok(summary);
        }

        let mut frame = match source.read_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                summary.read_failures += 1;
                if options.retry.exhausted(failures) {
                    return Err(SessionError::CameraUnavailable { failures, last: e });
                }
                tracing::warn!(
                    error = %e,
                    attempt = failures,
                    "failed to capture frame, retrying"
                );
                let wait = options.retry.backoff(failures);
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                continue;
            }
        };

        let faces = matcher.process(&frame.image)?;
        summary.recorded += record_and_annotate(&annotator, &mut frame.image, &faces, log)?;
        summary.frames += 1;
        summary.faces += faces.len() as u64;

        if display.show(&frame.image, &faces)? == Flow::Stop {
            tracing::info!(sequence = frame.sequence, "stop requested");
            return Ok(summary);
        }
    }
}

/// Draw every face and mark each recognized one; returns the rows written.
fn record_and_annotate<C: Clock>(
    annotator: &Annotator,
    image: &mut RgbImage,
    faces: &[RecognizedFace],
    log: &mut AttendanceLog<C>,
) -> Result<u64, AttendanceError> {
    let mut written = 0;
    for face in faces {
        annotator.draw(image, &face.location, &face.label.to_string());
        if let Some(name) = face.label.name() {
            if log.mark(name)? {
                written += 1;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rollcall_core::{BoundingBox, Embedding, KnownFaces, Label};
    use rollcall_hw::Frame;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Reads succeed or fail according to a script, then succeed forever.
    struct ScriptedSource {
        script: VecDeque<bool>,
        fail_forever: bool,
        reads: u32,
    }

    impl ScriptedSource {
        fn ok() -> Self {
            Self {
                script: VecDeque::new(),
                fail_forever: false,
                reads: 0,
            }
        }

        fn failing(times: usize) -> Self {
            Self {
                script: std::iter::repeat(false).take(times).collect(),
                ..Self::ok()
            }
        }

        fn broken() -> Self {
            Self {
                fail_forever: true,
                ..Self::ok()
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.reads += 1;
            let ok = self.script.pop_front().unwrap_or(!self.fail_forever);
            if ok {
                Ok(Frame::from_image(RgbImage::new(640, 480), self.reads))
            } else {
                Err(CameraError::CaptureFailed("no frame".into()))
            }
        }
    }

    /// Sees one face per frame with a fixed embedding.
    struct OneFace(Embedding);

    impl FaceEngine for OneFace {
        fn locate(&mut self, _: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
            Ok(vec![BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 40.0,
                height: 40.0,
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn encode(
            &mut self,
            _: &RgbImage,
            faces: &[BoundingBox],
        ) -> Result<Vec<Embedding>, EngineError> {
            Ok(faces.iter().map(|_| self.0.clone()).collect())
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        shown: Vec<Vec<String>>,
        corner_colors: Vec<[u8; 3]>,
        strip_text_pixels: Vec<usize>,
        stop_after: Option<usize>,
        closed: bool,
    }

    impl Display for RecordingDisplay {
        fn show(
            &mut self,
            frame: &RgbImage,
            faces: &[RecognizedFace],
        ) -> Result<Flow, DisplayError> {
            self.shown.push(faces.iter().map(|f| f.label.to_string()).collect());
            // Top-left corner of the (scaled ×4) face box.
            self.corner_colors.push(frame.get_pixel(40, 40).0);
            // Label strip spans rows 165..=200; text pixels are blue, the strip magenta.
            let text = (165..=200)
                .flat_map(|y| (40..=200).map(move |x| (x, y)))
                .filter(|&(x, y)| frame.get_pixel(x, y)[0] < 128)
                .count();
            self.strip_text_pixels.push(text);
            Ok(match self.stop_after {
                Some(n) if self.shown.len() >= n => Flow::Stop,
                _ => Flow::Continue,
            })
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[derive(Clone)]
    struct FakeClock(Rc<Cell<NaiveDateTime>>);

    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            self.0.get()
        }
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn at_distance(d: f32) -> Embedding {
        let cos = 1.0 - d;
        Embedding::new(vec![cos, (1.0 - cos * cos).sqrt()])
    }

    fn alice_only() -> KnownFaces {
        [("Alice", Embedding::new(vec![1.0, 0.0]))].into_iter().collect()
    }

    fn quick_retry(max: u32) -> RunOptions {
        RunOptions {
            retry: RetryPolicy {
                max_consecutive_failures: max,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            max_frames: None,
        }
    }

    fn data_rows(path: &Path) -> Vec<String> {
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines().map(str::to_owned);
        assert_eq!(lines.next().as_deref(), Some("Name,Date,Time"));
        lines.collect()
    }

    #[test]
    fn test_recognized_face_is_shown_annotated_and_recorded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Attendance.csv");
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(&path, clock).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.3)), &known);
        let mut display = RecordingDisplay {
            stop_after: Some(1),
            ..Default::default()
        };

        let summary =
            run(&mut ScriptedSource::ok(), &mut matcher, &mut log, &mut display, &quick_retry(3))
                .unwrap();

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(display.shown, vec![vec!["ALICE".to_string()]]);
        assert_eq!(display.corner_colors, vec![[255, 0, 255]]);
        assert!(display.strip_text_pixels[0] > 20);
        assert!(display.closed);
        assert_eq!(data_rows(&path), ["ALICE,2026-03-02,09:00:00"]);
    }

    #[test]
    fn test_unknown_face_is_not_recorded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Attendance.csv");
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(&path, clock).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.9)), &known);
        let mut display = RecordingDisplay {
            stop_after: Some(2),
            ..Default::default()
        };

        let summary =
            run(&mut ScriptedSource::ok(), &mut matcher, &mut log, &mut display, &quick_retry(3))
                .unwrap();

        assert_eq!(summary.faces, 2);
        assert_eq!(summary.recorded, 0);
        assert_eq!(display.shown[0], ["UNKNOWN"]);
        assert!(data_rows(&path).is_empty());
    }

    #[test]
    fn test_attendance_once_per_day_across_runs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Attendance.csv");
        let now = Rc::new(Cell::new(dt("2026-03-02 09:00:00")));
        let mut log = AttendanceLog::open_with_clock(&path, FakeClock(Rc::clone(&now))).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.3)), &known);

        // Two recognitions on the same day.
        let options = RunOptions {
            max_frames: Some(2),
            ..quick_retry(3)
        };
        let mut display = RecordingDisplay::default();
        let first = run(&mut ScriptedSource::ok(), &mut matcher, &mut log, &mut display, &options)
            .unwrap();
        assert_eq!((first.frames, first.recorded), (2, 1));

        // A third one the next day.
        now.set(dt("2026-03-03 08:30:00"));
        let options = RunOptions {
            max_frames: Some(1),
            ..quick_retry(3)
        };
        let second = run(&mut ScriptedSource::ok(), &mut matcher, &mut log, &mut display, &options)
            .unwrap();
        assert_eq!(second.recorded, 1);

        assert_eq!(
            data_rows(&path),
            ["ALICE,2026-03-02,09:00:00", "ALICE,2026-03-03,08:30:00"]
        );
    }

    #[test]
    fn test_transient_read_failures_are_retried() {
        let tmp = TempDir::new().unwrap();
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(tmp.path().join("a.csv"), clock).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.3)), &known);
        let mut display = RecordingDisplay {
            stop_after: Some(1),
            ..Default::default()
        };
        let mut source = ScriptedSource::failing(4);

        let summary =
            run(&mut source, &mut matcher, &mut log, &mut display, &quick_retry(5)).unwrap();

        assert_eq!(summary.read_failures, 4);
        assert_eq!(summary.frames, 1);
        assert_eq!(source.reads, 5);
    }

    #[test]
    fn test_exhausted_retries_end_the_session() {
        let tmp = TempDir::new().unwrap();
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(tmp.path().join("a.csv"), clock).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.3)), &known);
        let mut display = RecordingDisplay::default();
        let mut source = ScriptedSource::broken();

        let err = run(&mut source, &mut matcher, &mut log, &mut display, &quick_retry(3))
            .err()
            .unwrap();

        assert!(matches!(err, SessionError::CameraUnavailable { failures: 3, .. }));
        assert_eq!(source.reads, 3);
        assert!(display.shown.is_empty());
        assert!(display.closed);
    }

    #[test]
    fn test_failure_counter_resets_after_a_good_frame() {
        let tmp = TempDir::new().unwrap();
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(tmp.path().join("a.csv"), clock).unwrap();
        let known = alice_only();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.3)), &known);
        let mut display = RecordingDisplay {
            stop_after: Some(2),
            ..Default::default()
        };
        let mut source = ScriptedSource {
            script: [false, false, true, false, false, true].into_iter().collect(),
            ..ScriptedSource::ok()
        };

        let summary =
            run(&mut source, &mut matcher, &mut log, &mut display, &quick_retry(3)).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.read_failures, 4);
    }

    #[test]
    fn test_empty_table_never_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Attendance.csv");
        let clock = FakeClock(Rc::new(Cell::new(dt("2026-03-02 09:00:00"))));
        let mut log = AttendanceLog::open_with_clock(&path, clock).unwrap();
        let known = KnownFaces::new();
        let mut matcher = FrameMatcher::new(OneFace(at_distance(0.0)), &known);
        let mut display = RecordingDisplay::default();
        let options = RunOptions {
            max_frames: Some(3),
            ..quick_retry(3)
        };

        let summary = run(&mut ScriptedSource::ok(), &mut matcher, &mut log, &mut display, &options)
            .unwrap();
        assert_eq!(summary.recorded, 0);
        assert!(display.shown.iter().flatten().all(|l| l == &Label::Unknown.to_string()));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_consecutive_failures: 0,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(1000), Duration::from_millis(50));
        assert!(!policy.exhausted(u32::MAX));
    }
}
