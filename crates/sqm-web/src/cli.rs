//! Command line arguments

use clap::Parser;
use sqm_core::config::SqmConfig;
use std::path::PathBuf;

/// Default HTTP port of the web interface
pub const DEFAULT_HTTP_PORT: u16 = 8122;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP port for the web interface
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Serial device the SQM is attached to
    #[arg(short, long)]
    pub port: Option<String>,

    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Reply timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Seconds between readings
    #[arg(long)]
    pub interval: Option<f64>,

    /// Keep at most this many readings in memory
    #[arg(long)]
    pub retention: Option<usize>,

    /// Append readings to this CSV file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// List serial ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

impl Args {
    /// Override config values given on the command line
    pub fn apply(&self, config: &mut SqmConfig) {
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_seconds = interval;
        }
        if let Some(retention) = self.retention {
            config.retention_capacity = Some(retention);
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
    }
}
