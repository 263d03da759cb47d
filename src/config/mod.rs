//! Command line configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::catalog::x55;
use crate::device::{self, DeviceDescriptor};

#[derive(Debug, Clone, Parser)]
#[command(name = "projector-bridge", version, about = "Serial projector control bridge")]
pub struct Cli {
    /// Serial device the projector is attached to
    #[arg(short = 'E', long, default_value = "/dev/ttyUSB0", global = true)]
    pub path: String,

    /// Built-in device family
    #[arg(short, long, default_value = x55::NAME, global = true)]
    pub device: String,

    /// Load the device family from a JSON file instead
    #[arg(long, global = true, conflicts_with = "device")]
    pub catalog: Option<PathBuf>,

    /// Idle time that ends a response, in milliseconds
    #[arg(long, global = true)]
    pub read_timeout_ms: Option<u64>,

    /// Upper bound on one response, in milliseconds
    #[arg(long, global = true)]
    pub response_deadline_ms: Option<u64>,

    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub bind: String,

    #[arg(short, long, default_value_t = 8888, global = true)]
    pub port: u16,

    /// Seconds to let in-flight requests finish on shutdown
    #[arg(long, default_value_t = 15, global = true)]
    pub grace_secs: u64,

    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Mode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Mode {
    /// Open the port and serve operations over TCP (default)
    Serve,
    /// Print the derived operations as JSON and exit
    Operations,
    /// Run one operation and print the reply
    Invoke { id: String },
    /// List serial ports on this host
    Ports,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        self.command.clone().unwrap_or(Mode::Serve)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", addr, e))
    }

    /// The selected device family with command line overrides applied.
    pub fn descriptor(&self) -> device::Result<DeviceDescriptor> {
        let descriptor = match &self.catalog {
            Some(path) => DeviceDescriptor::from_file(path)?,
            None => device::builtin(&self.device)?,
        };

        let mut settings = descriptor.settings();
        if let Some(ms) = self.read_timeout_ms {
            settings = settings.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.response_deadline_ms {
            settings = settings.with_response_deadline(Duration::from_millis(ms));
        }
        Ok(descriptor.with_settings(settings))
    }
}
