//! Window averages over stored readings

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::reading::Reading;

/// Default number of averages kept by [`AverageHistory`]
pub const DEFAULT_HISTORY_LENGTH: usize = 10;

/// Mean of all readings within one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Average {
    /// Timestamp of the first reading in the window
    pub time: DateTime<Utc>,
    /// Number of readings averaged
    pub count: usize,
    /// Mean sky brightness in mag/arcsec²
    pub magnitude: f64,
    /// Mean frequency in Hz
    pub frequency: f64,
    /// Mean period in s
    pub period: f64,
    /// Mean temperature in °C
    pub temperature: f64,
}

impl Average {
    /// Average a sequence of readings, `None` if it is empty
    pub fn of<'a, I>(readings: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let mut iter = readings.into_iter();
        let first = iter.next()?;

        let mut sum = Self {
            time: first.timestamp(),
            count: 1,
            magnitude: first.magnitude(),
            frequency: first.frequency(),
            period: first.period(),
            temperature: first.temperature(),
        };
        for r in iter {
            sum.count += 1;
            sum.magnitude += r.magnitude();
            sum.frequency += r.frequency();
            sum.period += r.period();
            sum.temperature += r.temperature();
        }

        let n = sum.count as f64;
        sum.magnitude /= n;
        sum.frequency /= n;
        sum.period /= n;
        sum.temperature /= n;
        Some(sum)
    }
}

/// Most recent window averages, newest first
#[derive(Debug, Clone)]
pub struct AverageHistory {
    entries: VecDeque<Average>,
    limit: usize,
}

impl AverageHistory {
    /// Create a history keeping at most `limit` averages
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// Add an average, dropping the oldest beyond the limit
    pub fn push(&mut self, average: Average) {
        self.entries.push_front(average);
        self.entries.truncate(self.limit);
    }

    /// Newest average
    pub fn latest(&self) -> Option<&Average> {
        self.entries.front()
    }

    /// All averages, newest first
    pub fn iter(&self) -> impl Iterator<Item = &Average> {
        self.entries.iter()
    }

    /// Number of averages held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AverageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH)
    }
}
