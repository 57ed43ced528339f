//! Protocol errors

use thiserror::Error;

/// Why a reply frame was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameFault {
    /// First field is not the `r` echo
    #[error("expected echo 'r', got '{0}'")]
    WrongEcho(String),

    /// Wrong number of comma-separated fields
    #[error("expected {expected} fields, got {actual}")]
    FieldCount {
        /// Accepted field counts
        expected: &'static str,
        /// Fields found
        actual: usize,
    },

    /// A value lacks its unit suffix
    #[error("field '{field}' is missing unit suffix '{unit}'")]
    MissingUnit {
        /// The offending field
        field: String,
        /// Expected suffix
        unit: &'static str,
    },

    /// A value is not a finite number
    #[error("field '{0}' is not a number")]
    NotANumber(String),

    /// A value is outside the instrument's range
    #[error("{name} value {value} outside {min}..={max}")]
    OutOfRange {
        /// Field name
        name: &'static str,
        /// Reported value
        value: f64,
        /// Lowest accepted value
        min: f64,
        /// Highest accepted value
        max: f64,
    },

    /// Reply grew past the length limit without a terminator
    #[error("reply exceeded {0} bytes without terminator")]
    Overlong(usize),

    /// Reply is not UTF-8
    #[error("frame is not valid text")]
    NotText,
}

/// Errors that can occur while talking to the SQM
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No complete reply within the timeout (ms)
    #[error("Timed out after {0} ms waiting for line terminator")]
    Timeout(u64),

    /// Reply arrived but was rejected
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameFault),

    /// I/O error or end of stream; the handle is gone
    #[error("Link failure: {0}")]
    LinkFailure(String),

    /// No open handle
    #[error("Not connected to SQM")]
    NotConnected,

    /// The serial device does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),
}

impl ProtocolError {
    /// Whether the failure invalidates the device handle
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::LinkFailure(_) | ProtocolError::NotConnected | ProtocolError::PortNotFound(_)
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::LinkFailure(e.to_string())
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(e.description),
            _ => ProtocolError::LinkFailure(e.description),
        }
    }
}
