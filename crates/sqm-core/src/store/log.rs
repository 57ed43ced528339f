//! Log file format
//!
//! One record per line, comma separated:
//!
//! ```text
//! sequence,timestamp,magnitude,frequency,period,temperature
//! 1,2024-03-01T22:00:00.000Z,19.8,19.8,0.238,25.5
//! ```
//!
//! Lines are only ever appended. A final line without a newline is the
//! remains of an interrupted write: it is ignored on load and cut off before
//! the file is reopened for appending.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Record, StoreError};
use crate::reading::Reading;

/// First line of every log file
pub const LOG_HEADER: &str = "sequence,timestamp,magnitude,frequency,period,temperature";

/// Append handle on a log file
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    last_written: u64,
}

impl RecordLog {
    /// Open `path` for appending, creating it with a header if needed
    ///
    /// `last_written` is the highest sequence already present in the file.
    pub fn open<P: AsRef<Path>>(path: P, last_written: u64) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let existing = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        // Cut off a torn final line so its bytes never merge with the next record
        let intact = existing
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if intact < existing.len() {
            warn!(
                path = %path.display(),
                bytes = existing.len() - intact,
                "truncating torn final log entry"
            );
            file.set_len(intact as u64).map_err(io_err)?;
        }

        if intact == 0 {
            file.write_all(format!("{LOG_HEADER}\n").as_bytes())
                .map_err(io_err)?;
        }

        Ok(Self {
            path,
            file,
            last_written,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest sequence number written so far
    pub fn last_written(&self) -> u64 {
        self.last_written
    }

    /// Append one record as a single write
    pub fn append(&mut self, record: &Record) -> Result<(), StoreError> {
        let line = format_record(record);
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.last_written = record.sequence;
        debug!(sequence = record.sequence, "persisted record");
        Ok(())
    }
}

fn format_record(record: &Record) -> String {
    let r = &record.reading;
    format!(
        "{},{},{},{},{},{}\n",
        record.sequence,
        r.timestamp().to_rfc3339_opts(SecondsFormat::Millis, true),
        r.magnitude(),
        r.frequency(),
        r.period(),
        r.temperature(),
    )
}

fn parse_record(line: &str, line_no: usize) -> Result<Record, StoreError> {
    let parse_err = |reason: String| StoreError::Parse {
        line: line_no,
        reason,
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [sequence, timestamp, magnitude, frequency, period, temperature] = fields.as_slice() else {
        return Err(parse_err(format!("expected 6 fields, got {}", fields.len())));
    };

    let sequence: u64 = sequence
        .parse()
        .map_err(|_| parse_err(format!("bad sequence '{sequence}'")))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| parse_err(format!("bad timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);
    let number = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| parse_err(format!("bad number '{s}'")))
    };

    let reading = Reading::new(
        timestamp,
        number(*magnitude)?,
        number(*frequency)?,
        number(*period)?,
        number(*temperature)?,
    )
    .map_err(|e| parse_err(e.to_string()))?;

    Ok(Record::new(sequence, reading))
}

/// Read all intact records from a log file, in file order
///
/// Unparsable or out-of-order lines are skipped with a warning.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, StoreError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = String::from_utf8_lossy(&bytes);

    let mut lines: Vec<&str> = content.split('\n').collect();
    // split() leaves an empty tail after a final newline, otherwise a torn line
    if let Some(tail) = lines.pop() {
        if !tail.trim().is_empty() {
            warn!(path = %path.display(), "discarding truncated final log entry");
        }
    }

    let mut records: Vec<Record> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line == LOG_HEADER {
            continue;
        }

        match parse_record(line, idx + 1) {
            Ok(record) => {
                if let Some(last) = records.last() {
                    if record.sequence <= last.sequence {
                        warn!(
                            path = %path.display(),
                            line = idx + 1,
                            sequence = record.sequence,
                            "skipping out-of-order log entry"
                        );
                        continue;
                    }
                }
                records.push(record);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping log entry"),
        }
    }

    Ok(records)
}
