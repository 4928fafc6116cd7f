//! Append-only CSV attendance log, at most one row per name per day.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// First line of every attendance file.
pub const HEADER: [&str; 3] = ["Name", "Date", "Time"];

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("attendance file {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("attendance file {} does not start with the Name,Date,Time header", .0.display())]
    UnexpectedHeader(PathBuf),
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: NaiveTime,
}

/// Source of the current local date and time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// The system's local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// An open attendance log.
///
/// The set of (name, date) pairs already present is rebuilt from the file
/// when it is opened and kept in step with every appended row.
pub struct AttendanceLog<C = SystemClock> {
    path: PathBuf,
    writer: csv::Writer<File>,
    seen: HashSet<(String, NaiveDate)>,
    clock: C,
}

impl AttendanceLog<SystemClock> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AttendanceError> {
        Self::open_with_clock(path, SystemClock)
    }
}

impl<C: Clock> AttendanceLog<C> {
    /// Open (or create) the log at `path`, writing the header to a new file.
    pub fn open_with_clock(path: impl AsRef<Path>, clock: C) -> Result<Self, AttendanceError> {
        let path = path.as_ref().to_path_buf();
        let contents = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(AttendanceError::Io { path, source }),
        };

        let records = parse_records(&path, &contents)?;
        let seen = records.into_iter().map(|r| (r.name, r.date)).collect::<HashSet<_>>();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AttendanceError::Io {
                path: path.clone(),
                source,
            })?;

        // A file edited by hand may lack its final newline.
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            file.write_all(b"\n").map_err(|source| AttendanceError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let mut log = Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            path,
            seen,
            clock,
        };

        if contents.is_empty() {
            log.append(|w| w.write_record(HEADER))?;
            tracing::info!(path = %log.path.display(), "created attendance file");
        } else {
            tracing::info!(
                path = %log.path.display(),
                entries = log.seen.len(),
                "loaded attendance file"
            );
        }

        Ok(log)
    }

    /// Record `name` for today unless it is already recorded.
    ///
    /// Returns `true` if a row was written.
    pub fn mark(&mut self, name: &str) -> Result<bool, AttendanceError> {
        let now = self.clock.now();
        self.mark_at(name, now)
    }

    /// Record `name` at `at` unless it is already recorded on that date.
    pub fn mark_at(&mut self, name: &str, at: NaiveDateTime) -> Result<bool, AttendanceError> {
        let key = (name.to_string(), at.date());
        if self.seen.contains(&key) {
            return Ok(false);
        }

        let record = AttendanceRecord {
            name: key.0.clone(),
            date: key.1,
            time: at.time().with_nanosecond(0).unwrap_or(at.time()),
        };
        self.append(|w| w.serialize(&record))?;
        self.seen.insert(key);

        tracing::info!(name, date = %record.date, time = %record.time, "attendance recorded");
        Ok(true)
    }

    /// Whether `name` already has a row on `date`.
    pub fn is_recorded(&self, name: &str, date: NaiveDate) -> bool {
        self.seen.contains(&(name.to_string(), date))
    }

    fn append(
        &mut self,
        write: impl FnOnce(&mut csv::Writer<File>) -> csv::Result<()>,
    ) -> Result<(), AttendanceError> {
        write(&mut self.writer).map_err(|source| AttendanceError::Csv {
            path: self.path.clone(),
            source,
        })?;
        self.writer.flush().map_err(|source| AttendanceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Read every row of the log at `path`. A missing file has no rows.
pub fn read_log(path: &Path) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    match fs::read(path) {
        Ok(bytes) => parse_records(path, &bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(AttendanceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse log contents, skipping malformed rows with a warning.
fn parse_records(path: &Path, contents: &[u8]) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    if contents.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let headers = reader.headers().map_err(|source| AttendanceError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    if headers.iter().ne(HEADER) {
        return Err(AttendanceError::UnexpectedHeader(path.to_path_buf()));
    }

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<AttendanceRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                path = %path.display(),
                row = line + 2,
                error = %e,
                "skipping malformed attendance row"
            ),
        }
    }
    Ok(records)
}
