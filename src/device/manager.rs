use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{DeviceDescriptor, DeviceError, Result};
use crate::commands::{register_all, CommandHandler, OperationRegistry, Reply};
use crate::serial::{SerialError, SerialInterface};

/// Owns the one open projector connection and binds the descriptor's
/// operations to it.
pub struct DeviceManager {
    descriptor: Arc<DeviceDescriptor>,
    transport: Mutex<Option<Arc<SerialInterface>>>,
}

impl DeviceManager {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            transport: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Open the serial port at `path` with the descriptor's settings.
    pub async fn connect(&self, path: &str) -> Result<Arc<SerialInterface>> {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            return Err(DeviceError::AlreadyConnected);
        }

        log::info!("Connecting {} on {}", self.descriptor.name(), path);
        let transport = Arc::new(SerialInterface::connect(path, self.descriptor.settings())?);
        *guard = Some(transport.clone());
        Ok(transport)
    }

    /// Use an already open transport.
    pub async fn attach(&self, transport: SerialInterface) -> Result<Arc<SerialInterface>> {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            return Err(DeviceError::AlreadyConnected);
        }

        let transport = Arc::new(transport);
        *guard = Some(transport.clone());
        Ok(transport)
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    async fn current(&self) -> Result<Arc<SerialInterface>> {
        self.transport
            .lock()
            .await
            .clone()
            .ok_or(DeviceError::NotConnected)
    }

    /// One handler per operation, bound to the open transport.
    pub async fn handlers(&self) -> Result<Vec<CommandHandler>> {
        let transport = self.current().await?;
        Ok(self
            .descriptor
            .commands()
            .iter()
            .map(|command| CommandHandler::new(command.clone(), transport.clone()))
            .collect())
    }

    /// Run the operation with id `id` once.
    pub async fn invoke(&self, id: &str) -> Result<Reply> {
        let command = self
            .descriptor
            .command(id)
            .ok_or_else(|| DeviceError::UnknownOperation(id.to_string()))?
            .clone();
        let transport = self.current().await?;

        let reply = CommandHandler::new(command, transport).call().await?;
        Ok(reply)
    }

    /// Hand every operation to `registry`.
    pub async fn register_with<R>(&self, registry: &mut R) -> Result<usize>
    where
        R: OperationRegistry,
        R::Error: std::fmt::Display,
    {
        let transport = self.current().await?;
        let count = register_all(registry, self.descriptor.commands(), &transport)
            .map_err(|e| DeviceError::Registration(e.to_string()))?;
        log::info!(
            "Registered {} operations for {}",
            count,
            self.descriptor.name()
        );
        Ok(count)
    }

    /// Close the port, waiting for any in-flight transaction.
    pub async fn disconnect(&self) -> Result<()> {
        let transport = self
            .transport
            .lock()
            .await
            .take()
            .ok_or(DeviceError::NotConnected)?;
        transport.disconnect().await?;
        Ok(())
    }

    /// Close the port, aborting a transaction that outlives `grace`.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        let Some(transport) = self.transport.lock().await.take() else {
            log::debug!("Shutdown with no open transport");
            return Ok(());
        };
        match transport.shutdown(grace).await {
            // The line was already lost mid-transaction
            Err(SerialError::NotConnected) => Ok(()),
            other => Ok(other?),
        }
    }
}
