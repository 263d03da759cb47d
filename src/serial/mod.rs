pub mod interface;
pub mod protocol;

pub use interface::{Completion, Response, SerialInterface, SerialPortIO, READ_CHUNK_SIZE};
pub use protocol::{encode, ActionCode, CodecInput, Frame};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read timeout used when a device family does not specify one.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on a single drain, after which the partial response is returned.
pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Line settings for one device family.
///
/// The read timeout doubles as the end-of-response signal: the drain loop
/// stops at the first read that stays idle this long, so a value that is too
/// short silently truncates replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub response_deadline: Duration,
}

impl TransportSettings {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
            response_deadline: DEFAULT_RESPONSE_DEADLINE,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_response_deadline(mut self, response_deadline: Duration) -> Self {
        self.response_deadline = response_deadline;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Serial port {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
