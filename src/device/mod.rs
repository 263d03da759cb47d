pub mod manager;
pub mod models;

pub use manager::DeviceManager;
pub use models::*;

use crate::catalog::{x55, CatalogError};
use crate::commands::InvokeError;

/// Device families compiled into the binary.
pub const BUILTIN_DEVICES: &[&str] = &[x55::NAME];

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Unknown device type: {0} (known: {known})", known = BUILTIN_DEVICES.join(", "))]
    UnknownDevice(String),

    #[error("Invalid catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid device file {path}: {source}")]
    DeviceFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Build the descriptor of a built-in device family.
pub fn builtin(name: &str) -> Result<DeviceDescriptor> {
    match name.to_ascii_lowercase().as_str() {
        x55::NAME => Ok(DeviceDescriptor::new(x55::NAME, x55::settings(), x55::catalog())?),
        _ => Err(DeviceError::UnknownDevice(name.to_string())),
    }
}
