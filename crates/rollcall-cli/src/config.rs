use std::path::PathBuf;
use std::time::Duration;

use crate::session::RetryPolicy;

/// Runtime configuration, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `<name>/<image>` enrollment tree (default: images).
    pub images_dir: PathBuf,
    /// Attendance CSV file (default: Attendance.csv).
    pub attendance_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Linear downsampling factor applied before detection.
    pub downscale: u32,
    /// How frame-read failures are retried.
    pub retry: RetryPolicy,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = get("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(&get).join("models"));

        let defaults = RetryPolicy::default();

        Self {
            images_dir: get("ROLLCALL_IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("images")),
            attendance_path: get("ROLLCALL_ATTENDANCE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("Attendance.csv")),
            camera_device: get("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            downscale: parsed(&get, "ROLLCALL_DOWNSCALE", rollcall_core::DEFAULT_DOWNSCALE).max(1),
            retry: RetryPolicy {
                max_consecutive_failures: parsed(
                    &get,
                    "ROLLCALL_MAX_READ_FAILURES",
                    defaults.max_consecutive_failures,
                ),
                initial_backoff: get("ROLLCALL_RETRY_BACKOFF_MS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.initial_backoff),
                max_backoff: defaults.max_backoff,
            },
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn default_data_dir(get: &impl Fn(&str) -> Option<String>) -> PathBuf {
    get("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/ada")]);
        assert_eq!(c.images_dir, PathBuf::from("images"));
        assert_eq!(c.attendance_path, PathBuf::from("Attendance.csv"));
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.model_dir, PathBuf::from("/home/ada/.local/share/rollcall/models"));
        assert_eq!(c.downscale, 4);
        assert_eq!(c.retry.max_consecutive_failures, 100);
    }

    #[test]
    fn test_env_overrides() {
        let c = config(&[
            ("XDG_DATA_HOME", "/data"),
            ("ROLLCALL_IMAGES_DIR", "/srv/faces"),
            ("ROLLCALL_DOWNSCALE", "2"),
            ("ROLLCALL_MAX_READ_FAILURES", "0"),
            ("ROLLCALL_RETRY_BACKOFF_MS", "250"),
        ]);
        assert_eq!(c.images_dir, PathBuf::from("/srv/faces"));
        assert_eq!(c.model_dir, PathBuf::from("/data/rollcall/models"));
        assert_eq!(c.downscale, 2);
        assert_eq!(c.retry.max_consecutive_failures, 0);
        assert_eq!(c.retry.initial_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[("ROLLCALL_DOWNSCALE", "zero"), ("ROLLCALL_MAX_READ_FAILURES", "-1")]);
        assert_eq!(c.downscale, 4);
        assert_eq!(c.retry.max_consecutive_failures, 100);
        assert_eq!(config(&[("ROLLCALL_DOWNSCALE", "0")]).downscale, 1);
    }

    #[test]
    fn test_model_paths() {
        let c = config(&[("ROLLCALL_MODEL_DIR", "/opt/models")]);
        assert_eq!(c.detector_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(c.recognizer_model_path(), "/opt/models/w600k_r50.onnx");
    }
}
