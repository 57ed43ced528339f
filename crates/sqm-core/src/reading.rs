//! Sky brightness readings
//!
//! A [`Reading`] is one validated measurement reported by the SQM.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::RangeInclusive;

use crate::protocol::FrameFault;

/// Accepted sky brightness in mag/arcsec². Negative values occur in daylight.
pub const MAGNITUDE_RANGE: RangeInclusive<f64> = -20.0..=30.0;

/// Accepted sensor frequency in Hz
pub const FREQUENCY_RANGE: RangeInclusive<f64> = 0.0..=1.0e7;

/// Accepted sensor period in seconds
pub const PERIOD_RANGE: RangeInclusive<f64> = 0.0..=1.0e6;

/// Accepted sensor temperature in °C
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -60.0..=85.0;

/// A single validated SQM measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    magnitude: f64,
    frequency: f64,
    period: f64,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    counts: Option<u64>,
}

impl Reading {
    /// Build a reading, rejecting non-finite or out-of-range values
    pub fn new(
        timestamp: DateTime<Utc>,
        magnitude: f64,
        frequency: f64,
        period: f64,
        temperature: f64,
    ) -> Result<Self, FrameFault> {
        check("magnitude", magnitude, &MAGNITUDE_RANGE)?;
        check("frequency", frequency, &FREQUENCY_RANGE)?;
        check("period", period, &PERIOD_RANGE)?;
        check("temperature", temperature, &TEMPERATURE_RANGE)?;

        Ok(Self {
            timestamp,
            magnitude,
            frequency,
            period,
            temperature,
            counts: None,
        })
    }

    /// Attach the raw period count reported by SQM-LU/LE units
    pub fn with_counts(mut self, counts: u64) -> Self {
        self.counts = Some(counts);
        self
    }

    /// Time the reply was received
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Sky brightness in mag/arcsec²
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Sensor frequency in Hz
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Sensor period in seconds
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Sensor temperature in °C
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Raw period count, if the unit reports one
    pub fn counts(&self) -> Option<u64> {
        self.counts
    }
}

fn check(name: &'static str, value: f64, range: &RangeInclusive<f64>) -> Result<(), FrameFault> {
    if !value.is_finite() {
        return Err(FrameFault::NotANumber(format!("{name}={value}")));
    }
    if !range.contains(&value) {
        return Err(FrameFault::OutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(())
}
