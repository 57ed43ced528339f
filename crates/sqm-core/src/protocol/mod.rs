//! SQM Serial Protocol
//!
//! Line-oriented request/reply protocol of the Unihedron Sky Quality Meter:
//! the host sends `rx`, the meter answers with one comma-separated reading.

mod error;
pub mod frame;
mod link;
pub mod serial;
pub mod stream;

pub use error::{FrameFault, ProtocolError};
pub use frame::{decode_response, decode_response_at, encode_request, encode_response};
pub use link::{LinkConfig, Opener, SerialLink};
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};

/// Default device path of an SQM-LU
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate of SQM-LU units
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Reply line terminator
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest reply accepted before the exchange is abandoned
pub const MAX_LINE_LENGTH: usize = 256;
