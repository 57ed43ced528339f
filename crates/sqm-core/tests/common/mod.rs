//! Scripted SQM device for link and poller tests
#![allow(dead_code)]

use sqm_core::protocol::{CommunicationChannel, LinkConfig, Opener, ProtocolError, SerialLink};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

pub const SAMPLE: &str = "r, 19.80m,0000000019.80Hz,0000000.238s, 025.5C";

/// What the device does in response to one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with this line plus "\r\n"
    Line(String),
    /// Answer with exactly these bytes
    Raw(Vec<u8>),
    /// Say nothing
    Silence,
    /// Fail the next read as if the cable was pulled
    Disconnect,
}

#[derive(Debug, Default)]
struct DeviceState {
    replies: VecDeque<Reply>,
    input: VecDeque<u8>,
    written: Vec<u8>,
    disconnected: bool,
    open_attempts: u32,
    /// Number of opens that succeed; later ones fail
    allowed_opens: Option<u32>,
}

/// Shared handle on a scripted device
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl ScriptedDevice {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        let device = Self::default();
        device.state.lock().unwrap().replies = replies.into_iter().collect();
        device
    }

    /// Let only the first `n` opens succeed
    pub fn allow_opens(self, n: u32) -> Self {
        self.state.lock().unwrap().allowed_opens = Some(n);
        self
    }

    pub fn push(&self, reply: Reply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    pub fn open_attempts(&self) -> u32 {
        self.state.lock().unwrap().open_attempts
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn opener(&self) -> Opener {
        let device = self.clone();
        Box::new(move |config: &LinkConfig| {
            let mut state = device.state.lock().unwrap();
            state.open_attempts += 1;
            if let Some(allowed) = state.allowed_opens {
                if state.open_attempts > allowed {
                    return Err(ProtocolError::PortNotFound(config.port_name.clone()));
                }
            }
            state.disconnected = false;
            Ok(Box::new(ScriptedChannel {
                device: device.clone(),
            }) as Box<dyn CommunicationChannel>)
        })
    }

    /// A link on this device with the given reply timeout
    pub fn link(&self, timeout_ms: u64) -> SerialLink {
        let config = LinkConfig {
            port_name: "/dev/ttyTEST0".into(),
            baud_rate: 115200,
            timeout_ms,
        };
        SerialLink::with_opener(config, self.opener())
    }
}

struct ScriptedChannel {
    device: ScriptedDevice,
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state.lock().unwrap();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state.lock().unwrap();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.written.extend_from_slice(buf);
        match state.replies.pop_front() {
            Some(Reply::Line(line)) => state.input.extend(format!("{line}\r\n").into_bytes()),
            Some(Reply::Raw(bytes)) => state.input.extend(bytes),
            Some(Reply::Disconnect) => state.disconnected = true,
            Some(Reply::Silence) | None => {}
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.device.state.lock().unwrap().input.clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.device.state.lock().unwrap();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.input.len() as u32)
    }
}

/// Sample line with a distinguishable magnitude
pub fn line_with_magnitude(magnitude: f64) -> Reply {
    Reply::Line(format!(
        "r, {:05.2}m,0000000019.80Hz,0000000.238s, 025.5C",
        magnitude
    ))
}
