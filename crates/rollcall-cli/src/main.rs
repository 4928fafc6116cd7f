use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::attendance::read_log;
use rollcall_core::enrollment::{encode_enrollees, enroll_directory, load_enrollees};
use rollcall_core::{AttendanceLog, AttendanceRecord, FrameMatcher, KnownFaces, OnnxEngine};
use rollcall_hw::Camera;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod session;

use config::Config;
use session::RunOptions;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam attendance with face recognition")]
struct Cli {
    /// Enrollment directory with one sub-directory of photos per person
    #[arg(long, global = true)]
    images: Option<PathBuf>,
    /// Attendance CSV file
    #[arg(long, global = true)]
    attendance: Option<PathBuf>,
    /// V4L2 camera device
    #[arg(long, global = true)]
    camera: Option<String>,
    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the attendance loop
    Run {
        /// Stop after this many processed frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Never open a window, even when built with highgui
        #[arg(long)]
        headless: bool,
    },
    /// Encode the enrollment directory and print a JSON summary
    Encode,
    /// Print attendance rows
    Report {
        /// Only rows for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(dir) = &self.images {
            config.images_dir = dir.clone();
        }
        if let Some(path) = &self.attendance {
            config.attendance_path = path.clone();
        }
        if let Some(device) = &self.camera {
            config.camera_device = device.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        config
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        Commands::Run { max_frames, headless } => run(&config, max_frames, headless),
        Commands::Encode => encode(&config),
        Commands::Report { date } => report(&config, date),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!(
                    "{}  {} ({}, {}) [{}]",
                    dev.path,
                    dev.name,
                    dev.driver,
                    dev.bus,
                    dev.formats.join(", ")
                );
            }
            Ok(())
        }
    }
}

fn load_engine(config: &Config) -> Result<OnnxEngine> {
    OnnxEngine::load(&config.detector_model_path(), &config.recognizer_model_path())
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

fn run(config: &Config, max_frames: Option<u64>, headless: bool) -> Result<()> {
    let mut engine = load_engine(config)?;
    let known = enroll_directory(&mut engine, &config.images_dir)
        .with_context(|| format!("enrolling faces from {}", config.images_dir.display()))?;
    if known.is_empty() {
        tracing::warn!("no faces enrolled, every face will be UNKNOWN");
    }

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("cannot access webcam {}", config.camera_device))?;
    let mut log = AttendanceLog::open(&config.attendance_path)
        .with_context(|| format!("opening {}", config.attendance_path.display()))?;
    let mut display = display::open(headless)?;
    let mut matcher = FrameMatcher::new(engine, &known).with_downscale(config.downscale);

    let options = RunOptions {
        retry: config.retry,
        max_frames,
    };
    let summary = session::run(&mut camera, &mut matcher, &mut log, &mut display, &options)?;

    println!(
        "{} frames, {} faces, {} attendance rows written",
        summary.frames, summary.faces, summary.recorded
    );
    Ok(())
}

fn encode(config: &Config) -> Result<()> {
    let mut engine = load_engine(config)?;
    let enrollees = load_enrollees(&config.images_dir)
        .with_context(|| format!("reading {}", config.images_dir.display()))?;
    let images = enrollees.len();
    let known = encode_enrollees(&mut engine, enrollees)?;

    let summary = encode_summary(&config.images_dir, images, &known);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// JSON summary of one enrollment pass with per-person image counts.
fn encode_summary(images_dir: &Path, images: usize, known: &KnownFaces) -> serde_json::Value {
    let mut people: BTreeMap<&str, usize> = BTreeMap::new();
    for name in known.names() {
        *people.entry(name.as_str()).or_default() += 1;
    }

    serde_json::json!({
        "images_dir": images_dir,
        "images": images,
        "encoded": known.len(),
        "skipped": images.saturating_sub(known.len()),
        "people": people,
    })
}

fn report(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let records = read_log(&config.attendance_path)
        .with_context(|| format!("reading {}", config.attendance_path.display()))?;

    let shown = filter_by_date(&records, date);
    if shown.is_empty() {
        println!("No attendance recorded");
    }
    for record in shown {
        println!("{:<24} {} {}", record.name, record.date, record.time.format("%H:%M:%S"));
    }
    Ok(())
}

fn filter_by_date(records: &[AttendanceRecord], date: Option<NaiveDate>) -> Vec<&AttendanceRecord> {
    records
        .iter()
        .filter(|r| date.is_none() || date == Some(r.date))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rollcall_core::Embedding;

    fn record(name: &str, date: &str) -> AttendanceRecord {
        AttendanceRecord {
            name: name.to_string(),
            date: date.parse().unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_filter_by_date() {
        let records = vec![
            record("ALICE", "2026-03-02"),
            record("BOB", "2026-03-03"),
            record("CAROL", "2026-03-02"),
        ];

        let day: NaiveDate = "2026-03-02".parse().unwrap();
        let names: Vec<_> = filter_by_date(&records, Some(day))
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["ALICE", "CAROL"]);

        assert_eq!(filter_by_date(&records, None).len(), 3);
        let empty_day: NaiveDate = "2026-01-01".parse().unwrap();
        assert!(filter_by_date(&records, Some(empty_day)).is_empty());
    }

    #[test]
    fn test_encode_summary_counts_people() {
        let known: KnownFaces = [
            ("Bob", Embedding::new(vec![0.0, 1.0])),
            ("Alice", Embedding::new(vec![1.0, 0.0])),
            ("Alice", Embedding::new(vec![0.6, 0.8])),
        ]
        .into_iter()
        .collect();

        let summary = encode_summary(Path::new("images"), 5, &known);
        assert_eq!(summary["images_dir"], "images");
        assert_eq!(summary["images"], 5);
        assert_eq!(summary["encoded"], 3);
        assert_eq!(summary["skipped"], 2);
        assert_eq!(summary["people"], serde_json::json!({ "Alice": 2, "Bob": 1 }));
    }

    #[test]
    fn test_encode_summary_empty_table() {
        let summary = encode_summary(Path::new("images"), 0, &KnownFaces::new());
        assert_eq!(summary["encoded"], 0);
        assert_eq!(summary["skipped"], 0);
        assert_eq!(summary["people"], serde_json::json!({}));
    }
}
