//! Frame encoding/decoding
//!
//! The SQM answers a reading request `rx` with one comma-separated text line:
//!
//! ```text
//! r, 19.80m,0000000019.80Hz,0000000.238s, 025.5C
//! r, 06.70m,0000022921Hz,0000000020c,0000000.000s, 039.4C
//! ```
//!
//! - echo `r`
//! - sky brightness, suffix `m` (mag/arcsec²)
//! - sensor frequency, suffix `Hz`
//! - period count, suffix `c` (SQM-LU/LE only)
//! - sensor period, suffix `s`
//! - temperature, suffix `C`

use chrono::{DateTime, Utc};

use super::{FrameFault, ProtocolError};
use crate::reading::Reading;

/// Reading request command
pub const READING_REQUEST: &[u8] = b"rx";

/// Echo prefix of a reading reply
pub const READING_ECHO: &str = "r";

/// Encode the reading request
pub fn encode_request() -> Vec<u8> {
    READING_REQUEST.to_vec()
}

/// Decode one reply line, stamping it with the current time
pub fn decode_response(line: &[u8]) -> Result<Reading, ProtocolError> {
    decode_response_at(line, Utc::now())
}

/// Decode one reply line received at `timestamp`
pub fn decode_response_at(line: &[u8], timestamp: DateTime<Utc>) -> Result<Reading, ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| FrameFault::NotText)?;
    let fields: Vec<&str> = text
        .trim_end_matches(['\r', '\n'])
        .split(',')
        .map(str::trim)
        .collect();

    if fields[0] != READING_ECHO {
        return Err(FrameFault::WrongEcho(fields[0].to_string()).into());
    }

    let (magnitude, frequency, counts, period, temperature) = match fields.as_slice() {
        [_, m, f, p, t] => (*m, *f, None, *p, *t),
        [_, m, f, c, p, t] => (*m, *f, Some(*c), *p, *t),
        _ => {
            return Err(FrameFault::FieldCount {
                expected: "5 or 6",
                actual: fields.len(),
            }
            .into())
        }
    };

    let reading = Reading::new(
        timestamp,
        number(magnitude, "m")?,
        number(frequency, "Hz")?,
        number(period, "s")?,
        number(temperature, "C")?,
    )?;

    match counts {
        Some(c) => Ok(reading.with_counts(count(c)?)),
        None => Ok(reading),
    }
}

/// Re-serialize a reading in the device's fixed-width layout (without terminator)
pub fn encode_response(reading: &Reading) -> String {
    let counts = reading
        .counts()
        .map(|c| format!("{:010}c,", c))
        .unwrap_or_default();

    format!(
        "r,{}{:05.2}m,{:013.2}Hz,{}{:011.3}s,{}{:05.1}C",
        sign(reading.magnitude()),
        reading.magnitude().abs(),
        reading.frequency(),
        counts,
        reading.period(),
        sign(reading.temperature()),
        reading.temperature().abs(),
    )
}

fn sign(value: f64) -> char {
    if value < 0.0 {
        '-'
    } else {
        ' '
    }
}

fn strip_unit<'a>(field: &'a str, unit: &'static str) -> Result<&'a str, FrameFault> {
    field
        .strip_suffix(unit)
        .map(str::trim)
        .ok_or_else(|| FrameFault::MissingUnit {
            field: field.to_string(),
            unit,
        })
}

fn number(field: &str, unit: &'static str) -> Result<f64, FrameFault> {
    let digits = strip_unit(field, unit)?;
    digits
        .parse::<f64>()
        .map_err(|_| FrameFault::NotANumber(field.to_string()))
}

fn count(field: &str) -> Result<u64, FrameFault> {
    let digits = strip_unit(field, "c")?;
    digits
        .parse::<u64>()
        .map_err(|_| FrameFault::NotANumber(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "r, 19.80m,0000000019.80Hz,0000000.238s, 025.5C";

    #[test]
    fn test_encode_request() {
        assert_eq!(encode_request(), b"rx".to_vec());
    }

    #[test]
    fn test_decode_sample() {
        let r = decode_response(SAMPLE.as_bytes()).unwrap();
        assert!((r.magnitude() - 19.80).abs() < 1e-9);
        assert!((r.frequency() - 19.80).abs() < 1e-9);
        assert!((r.period() - 0.238).abs() < 1e-9);
        assert!((r.temperature() - 25.5).abs() < 1e-9);
        assert_eq!(r.counts(), None);
    }

    #[test]
    fn test_decode_with_terminator() {
        let line = format!("{}\r\n", SAMPLE);
        assert!(decode_response(line.as_bytes()).is_ok());
    }

    #[test]
    fn test_decode_lu_frame_with_counts() {
        let line = b"r, 06.70m,0000022921Hz,0000000020c,0000000.000s, 039.4C\r\n";
        let r = decode_response(line).unwrap();
        assert_eq!(r.counts(), Some(20));
        assert!((r.frequency() - 22921.0).abs() < 1e-9);
        assert!((r.temperature() - 39.4).abs() < 1e-9);
    }

    #[test]
    fn test_decode_negative_values() {
        let line = b"r,-01.25m,0000123456.00Hz,0000000.000s,-012.0C";
        let r = decode_response(line).unwrap();
        assert!((r.magnitude() + 1.25).abs() < 1e-9);
        assert!((r.temperature() + 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_encode_response_reproduces_sample() {
        let r = decode_response(SAMPLE.as_bytes()).unwrap();
        assert_eq!(encode_response(&r), SAMPLE);
    }

    #[test]
    fn test_wrong_echo() {
        let err = decode_response(b"i,00000002,00000003,00000001,00000413").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedFrame(FrameFault::WrongEcho(ref e)) if e == "i"
        ));
    }

    #[test]
    fn test_non_numeric_field() {
        let err = decode_response(b"r, 19.x0m,0000000019.80Hz,0000000.238s, 025.5C").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedFrame(FrameFault::NotANumber(_))
        ));
    }

    #[test]
    fn test_missing_unit() {
        let err = decode_response(b"r, 19.80,0000000019.80Hz,0000000.238s, 025.5C").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedFrame(FrameFault::MissingUnit { unit: "m", .. })
        ));
    }

    #[test]
    fn test_out_of_range() {
        let err = decode_response(b"r, 19.80m,0000000019.80Hz,0000000.238s, 125.5C").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedFrame(FrameFault::OutOfRange { name: "temperature", .. })
        ));
    }

    #[test]
    fn test_field_count() {
        let err = decode_response(b"r, 19.80m,0000000019.80Hz").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MalformedFrame(FrameFault::FieldCount { actual: 3, .. })
        ));
        assert!(decode_response(b"").is_err());
    }

    #[test]
    fn test_not_text() {
        let err = decode_response(&[b'r', b',', 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(FrameFault::NotText)));
    }
}
