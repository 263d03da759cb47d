use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DeviceError, Result};
use crate::catalog::{Catalog, CatalogError};
use crate::commands::{derive_operations, Command};
use crate::serial::{TransportSettings, DEFAULT_READ_TIMEOUT, DEFAULT_RESPONSE_DEADLINE};

/// One projector family: its line settings and the operations derived from
/// its catalog.
///
/// The catalog is validated and every frame is encoded when the descriptor
/// is built; afterwards the descriptor is read-only.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    name: String,
    settings: TransportSettings,
    catalog: Catalog,
    commands: Vec<Arc<Command>>,
}

impl DeviceDescriptor {
    pub fn new(
        name: impl Into<String>,
        settings: TransportSettings,
        catalog: Catalog,
    ) -> std::result::Result<Self, CatalogError> {
        let name = name.into();
        let commands = derive_operations(&catalog)?
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();

        log::info!("Loaded {} with {} operations", name, commands.len());
        Ok(Self {
            name,
            settings,
            catalog,
            commands,
        })
    }

    /// Load a device family from a JSON device file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let file: DeviceFile =
            serde_json::from_str(&text).map_err(|source| DeviceError::DeviceFile {
                path: path.display().to_string(),
                source,
            })?;
        file.into_descriptor()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> TransportSettings {
        self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn commands(&self) -> &[Arc<Command>] {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Option<&Arc<Command>> {
        self.commands.iter().find(|c| c.id() == id)
    }

    /// Same commands with different line settings.
    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// On-disk form of a device family.
///
/// ```json
/// {
///   "name": "x55",
///   "baud_rate": 19200,
///   "read_timeout_ms": 100,
///   "commands": [
///     { "name": "Power", "actions": [
///       { "kind": "get", "input": { "crc": "19d3", "class": "0060", "code": "0000" } }
///     ] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFile {
    pub name: String,
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_response_deadline_ms")]
    pub response_deadline_ms: u64,
    pub commands: Catalog,
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

fn default_response_deadline_ms() -> u64 {
    DEFAULT_RESPONSE_DEADLINE.as_millis() as u64
}

impl DeviceFile {
    pub fn into_descriptor(self) -> Result<DeviceDescriptor> {
        let settings = TransportSettings::new(self.baud_rate)
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_response_deadline(Duration::from_millis(self.response_deadline_ms));
        Ok(DeviceDescriptor::new(self.name, settings, self.commands)?)
    }
}
