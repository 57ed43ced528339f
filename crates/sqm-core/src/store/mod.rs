//! Reading Store
//!
//! Append-only log of sequence-numbered readings. A single writer (the
//! poller) appends; any number of readers take snapshots concurrently.

mod average;
mod log;

pub use average::{Average, AverageHistory, DEFAULT_HISTORY_LENGTH};
pub use log::{load_records, RecordLog, LOG_HEADER};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{error, info};

use crate::reading::Reading;

/// Errors raised by the store and its log file
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the log file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Log file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A log line could not be parsed
    #[error("line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// A loaded record does not continue the sequence
    #[error("record {sequence} does not follow {last}")]
    OutOfOrder {
        /// Sequence of the rejected record
        sequence: u64,
        /// Highest sequence already held
        last: u64,
    },
}

/// A stored, sequence-numbered reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Assigned by the store; strictly increasing, starting at 1
    pub sequence: u64,
    /// The reading itself
    #[serde(flatten)]
    pub reading: Reading,
}

impl Record {
    /// Create a new record
    pub fn new(sequence: u64, reading: Reading) -> Self {
        Self { sequence, reading }
    }
}

struct Inner {
    records: VecDeque<Arc<Record>>,
    last_sequence: u64,
}

/// Bounded-or-unbounded record log with optional file persistence
pub struct Store {
    inner: RwLock<Inner>,
    capacity: Option<usize>,
    /// Writer-side state; `None` once persistence is disabled
    log: Mutex<Option<RecordLog>>,
}

impl Store {
    /// Create an in-memory store. `capacity` of `None` keeps everything.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: VecDeque::new(),
                last_sequence: 0,
            }),
            capacity: capacity.map(|c| c.max(1)),
            log: Mutex::new(None),
        }
    }

    /// Create a store backed by a log file
    ///
    /// History already in the file is loaded first. If the history cannot be
    /// restored or the file cannot be opened for appending, the file is left
    /// untouched and the store stays usable in memory.
    pub fn with_log<P: AsRef<Path>>(capacity: Option<usize>, path: P) -> Self {
        let path = path.as_ref();
        let store = Self::new(capacity);

        if path.exists() {
            match store.load(path) {
                Ok(n) => info!(path = %path.display(), records = n, "restored reading history"),
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "could not restore history, keeping readings in memory only"
                    );
                    return store;
                }
            }
        }

        match RecordLog::open(path, store.last_sequence()) {
            Ok(log) => *store.lock_log() = Some(log),
            Err(e) => error!(error = %e, "persistence disabled, keeping readings in memory only"),
        }

        store
    }

    /// Append a reading, assigning the next sequence number
    pub fn append(&self, reading: Reading) -> Record {
        let record = {
            let mut inner = self.write();
            inner.last_sequence += 1;
            let record = Arc::new(Record::new(inner.last_sequence, reading));
            inner.records.push_back(Arc::clone(&record));
            if let Some(cap) = self.capacity {
                while inner.records.len() > cap {
                    inner.records.pop_front();
                }
            }
            record
        };

        if let Err(e) = self.persist() {
            error!(error = %e, "persistence disabled, keeping readings in memory only");
        }

        (*record).clone()
    }

    /// Most recent record
    pub fn latest(&self) -> Option<Record> {
        self.read().records.back().map(|r| (**r).clone())
    }

    /// Records with a sequence number greater than `sequence`, oldest first
    ///
    /// The result is a snapshot; records appended afterwards are not included.
    /// Gaps in the sequence mean older records were evicted.
    pub fn since(&self, sequence: u64) -> Records {
        let inner = self.read();
        let start = inner.records.partition_point(|r| r.sequence <= sequence);
        let snapshot: Arc<[Arc<Record>]> = inner.records.range(start..).cloned().collect();
        Records::new(snapshot)
    }

    /// Average over records whose timestamps fall in `[start, end)`
    pub fn average(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Average> {
        let snapshot = self.since(0);
        Average::of(
            snapshot
                .snapshot()
                .iter()
                .map(|r| &r.reading)
                .filter(|r| r.timestamp() >= start && r.timestamp() < end),
        )
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    /// Retention capacity, `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Highest sequence number assigned so far
    pub fn last_sequence(&self) -> u64 {
        self.read().last_sequence
    }

    /// Whether appended records are still written to disk
    pub fn is_persistent(&self) -> bool {
        self.lock_log().is_some()
    }

    /// Write records not yet in the log file. Returns how many were written.
    ///
    /// On failure the log is detached and the store continues in memory.
    pub fn persist(&self) -> Result<usize, StoreError> {
        let mut guard = self.lock_log();
        let Some(log) = guard.as_mut() else {
            return Ok(0);
        };

        let pending = self.since(log.last_written());
        let mut written = 0;
        for record in pending {
            if let Err(e) = log.append(&record) {
                *guard = None;
                return Err(e);
            }
            written += 1;
        }
        Ok(written)
    }

    /// Restore records from a log file, continuing its sequence numbering
    ///
    /// Records at or below the current last sequence are rejected, in which
    /// case nothing is loaded.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let records = load_records(path)?;
        let count = records.len();

        let mut inner = self.write();
        // load_records yields strictly increasing sequences, so the first one decides
        if let Some(first) = records.first() {
            if first.sequence <= inner.last_sequence {
                return Err(StoreError::OutOfOrder {
                    sequence: first.sequence,
                    last: inner.last_sequence,
                });
            }
        }
        for record in records {
            inner.last_sequence = record.sequence;
            inner.records.push_back(Arc::new(record));
            if let Some(cap) = self.capacity {
                while inner.records.len() > cap {
                    inner.records.pop_front();
                }
            }
        }
        Ok(count)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Option<RecordLog>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Snapshot iterator returned by [`Store::since`]
///
/// Cloning or calling [`Records::restart`] replays the same records.
#[derive(Debug, Clone)]
pub struct Records {
    snapshot: Arc<[Arc<Record>]>,
    position: usize,
}

impl Records {
    fn new(snapshot: Arc<[Arc<Record>]>) -> Self {
        Self {
            snapshot,
            position: 0,
        }
    }

    /// Rewind to the first record of the snapshot
    pub fn restart(&mut self) {
        self.position = 0;
    }

    fn snapshot(&self) -> &[Arc<Record>] {
        &self.snapshot
    }
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let record = self.snapshot.get(self.position)?;
        self.position += 1;
        Some((**record).clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.snapshot.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Records {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(magnitude: f64) -> Reading {
        Reading::new(Utc::now(), magnitude, 10.0, 0.1, 12.0).unwrap()
    }

    #[test]
    fn test_append_assigns_sequence() {
        let store = Store::new(None);
        assert!(store.latest().is_none());

        let a = store.append(reading(20.0));
        let b = store.append(reading(20.5));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(store.latest().unwrap(), b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_since_returns_later_records() {
        let store = Store::new(None);
        for i in 0..5 {
            store.append(reading(18.0 + i as f64));
        }

        let seqs: Vec<u64> = store.since(2).map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(store.since(5).count(), 0);
        assert_eq!(store.since(99).count(), 0);
    }

    #[test]
    fn test_since_is_restartable_snapshot() {
        let store = Store::new(None);
        store.append(reading(19.0));
        store.append(reading(19.1));

        let mut records = store.since(0);
        assert_eq!(records.len(), 2);
        store.append(reading(19.2));

        let first: Vec<u64> = records.by_ref().map(|r| r.sequence).collect();
        records.restart();
        let second: Vec<u64> = records.map(|r| r.sequence).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let store = Store::new(Some(3));
        for i in 0..7 {
            store.append(reading(15.0 + i as f64));
        }

        let seqs: Vec<u64> = store.since(0).map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![5, 6, 7]);
        // Evicted records never reappear, even when asked for explicitly
        assert_eq!(store.since(1).next().unwrap().sequence, 5);
    }

    #[test]
    fn test_rejected_load_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqm.csv");
        let mut log = RecordLog::open(&path, 0).unwrap();
        for sequence in [2, 5] {
            log.append(&Record::new(sequence, reading(19.0))).unwrap();
        }

        let store = Store::new(None);
        for _ in 0..3 {
            store.append(reading(18.0));
        }
        assert!(matches!(
            store.load(&path),
            Err(StoreError::OutOfOrder { sequence: 2, last: 3 })
        ));
        assert_eq!(store.len(), 3);
        assert_eq!(store.last_sequence(), 3);
    }

    #[test]
    fn test_average_window() {
        let store = Store::new(None);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        for (i, mag) in [20.0, 21.0, 22.0, 23.0].iter().enumerate() {
            let ts = t0 + chrono::Duration::minutes(i as i64);
            store.append(Reading::new(ts, *mag, 10.0, 0.1, 5.0).unwrap());
        }

        let avg = store
            .average(t0, t0 + chrono::Duration::minutes(3))
            .unwrap();
        assert_eq!(avg.count, 3);
        assert!((avg.magnitude - 21.0).abs() < 1e-9);
        assert_eq!(avg.time, t0);

        assert!(store
            .average(t0 - chrono::Duration::hours(1), t0)
            .is_none());
    }
}
