//! Serial link management
//!
//! Owns the device handle and performs one request/reply exchange per reading.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    frame::{decode_response_at, encode_request},
    serial::open_port,
    stream::{CommunicationChannel, SerialChannel},
    FrameFault, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, LINE_TERMINATOR, MAX_LINE_LENGTH,
};
use crate::reading::Reading;

/// Delay between polls of the input buffer while waiting for a reply
const INPUT_POLL_MS: u64 = 2;

/// Opens a fresh channel for the configured device
pub type Opener =
    Box<dyn FnMut(&LinkConfig) -> Result<Box<dyn CommunicationChannel>, ProtocolError> + Send>;

/// Link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Reply timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: super::DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Serial link to a single SQM
pub struct SerialLink {
    /// Device handle, `None` while closed
    channel: Option<Box<dyn CommunicationChannel>>,
    /// Link configuration
    config: LinkConfig,
    /// Channel factory
    opener: Opener,
    /// Metrics: cumulative bytes sent & received
    tx_bytes: u64,
    rx_bytes: u64,
}

impl SerialLink {
    /// Create a link to a serial port (not yet opened)
    pub fn new(config: LinkConfig) -> Self {
        Self::with_opener(config, Box::new(open_serial_channel))
    }

    /// Create a link that obtains its channel from `opener`
    pub fn with_opener(config: LinkConfig, opener: Opener) -> Self {
        Self {
            channel: None,
            config,
            opener,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Whether a device handle is currently held
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Get cumulative tx/rx byte counters
    pub fn get_counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Acquire the device handle, replacing any handle already held
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        self.close();

        let mut channel = (self.opener)(&self.config)?;
        channel.clear_input_buffer()?;
        self.channel = Some(channel);

        info!(
            port = %self.config.port_name,
            baud = self.config.baud_rate,
            "opened SQM link"
        );
        Ok(())
    }

    /// Release the device handle
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            info!(port = %self.config.port_name, "closed SQM link");
        }
    }

    /// Request and decode one reading
    ///
    /// `Timeout` and `MalformedFrame` leave the link open. Any I/O failure
    /// drops the handle, so `open()` must succeed before the next call.
    pub fn read_one(&mut self) -> Result<Reading, ProtocolError> {
        let result = self.exchange(&encode_request());

        if let Err(e) = &result {
            if e.is_link_failure() {
                warn!(port = %self.config.port_name, error = %e, "invalidating SQM link");
                self.close();
            }
        }

        let (line, received_at) = result?;
        decode_response_at(&line, received_at)
    }

    fn exchange(
        &mut self,
        request: &[u8],
    ) -> Result<(Vec<u8>, chrono::DateTime<Utc>), ProtocolError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;

        // Drop stale bytes from an earlier timed-out exchange
        channel.clear_input_buffer()?;

        channel.write_all(request)?;
        channel.flush()?;
        self.tx_bytes = self.tx_bytes.saturating_add(request.len() as u64);
        debug!(request = %String::from_utf8_lossy(request), "sent SQM request");

        let mut line = Vec::new();
        let mut buffer = [0u8; 128];
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                debug!(partial = line.len(), "reply timed out");
                return Err(ProtocolError::Timeout(self.config.timeout_ms));
            }

            let available = channel.bytes_to_read()?;
            if available == 0 {
                std::thread::sleep(Duration::from_millis(INPUT_POLL_MS));
                continue;
            }

            let to_read = std::cmp::min(available as usize, buffer.len());
            let n = match channel.read(&mut buffer[..to_read]) {
                Ok(0) => return Err(ProtocolError::LinkFailure("end of stream".into())),
                Ok(n) => n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.rx_bytes = self.rx_bytes.saturating_add(n as u64);

            if let Some(pos) = buffer[..n].iter().position(|&b| b == LINE_TERMINATOR) {
                let received_at = Utc::now();
                line.extend_from_slice(&buffer[..=pos]);
                if pos + 1 < n {
                    debug!(dropped = n - pos - 1, "discarding bytes after reply line");
                }
                {
                    let text = String::from_utf8_lossy(&line);
                    debug!(reply = %text.trim_end(), "received SQM reply");
                }
                return Ok((line, received_at));
            }

            line.extend_from_slice(&buffer[..n]);
            if line.len() > MAX_LINE_LENGTH {
                return Err(FrameFault::Overlong(MAX_LINE_LENGTH).into());
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_serial_channel(config: &LinkConfig) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
    let port = open_port(&config.port_name, config.baud_rate)?;
    Ok(Box::new(SerialChannel::new(port)))
}
