use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serialport::SerialPortType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::protocol::Frame;
use super::{Result, SerialDeviceInfo, SerialError, TransportSettings};

/// Maximum number of bytes requested per read while draining a response.
pub const READ_CHUNK_SIZE: usize = 8;

/// Byte level access to an open line.
///
/// Implemented for real ports and for scripted ports in tests.
#[async_trait]
pub trait SerialPortIO: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;

    /// Read into `buf`. Returns `Ok(0)` when nothing arrived within `idle`.
    async fn read_data(&mut self, buf: &mut [u8], idle: Duration) -> Result<usize>;

    async fn flush(&mut self) -> Result<()>;
}

struct NativePort {
    stream: SerialStream,
}

#[async_trait]
impl SerialPortIO for NativePort {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    async fn read_data(&mut self, buf: &mut [u8], idle: Duration) -> Result<usize> {
        match timeout(idle, self.stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Ok(Err(e)) => Err(SerialError::IoError(e)),
            Err(_) => Ok(0),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The line went quiet for one read timeout.
    Idle,
    /// The device kept sending past the response deadline; the bytes are partial.
    Deadline,
}

/// Bytes collected after one frame was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub bytes: Vec<u8>,
    pub completion: Completion,
}

impl Response {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.completion == Completion::Deadline
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// The single open connection to the projector.
///
/// Every transaction holds the port lock from the first written byte until
/// the drain finishes, so concurrent callers never interleave on the line.
pub struct SerialInterface {
    port: Mutex<Option<Box<dyn SerialPortIO>>>,
    port_name: String,
    settings: TransportSettings,
    accepting: AtomicBool,
    abort_tx: watch::Sender<bool>,
}

impl SerialInterface {
    /// List serial ports present on this host
    pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::with_capacity(ports.len());

        for port in ports {
            let device = match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            };
            devices.push(device);
        }

        Ok(devices)
    }

    /// Open `path` with the given settings. Must be called inside a Tokio runtime.
    pub fn connect(path: &str, settings: TransportSettings) -> Result<Self> {
        let stream = tokio_serial::new(path, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open_native_async()
            .map_err(|source| SerialError::Unavailable {
                path: path.to_string(),
                source,
            })?;

        log::info!(
            "Connected to {} at {} baud (read timeout {:?})",
            path,
            settings.baud_rate,
            settings.read_timeout
        );
        Ok(Self::from_io(path, Box::new(NativePort { stream }), settings))
    }

    /// Wrap an already open port.
    pub fn from_io(
        port_name: impl Into<String>,
        io: Box<dyn SerialPortIO>,
        settings: TransportSettings,
    ) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            port: Mutex::new(Some(io)),
            port_name: port_name.into(),
            settings,
            accepting: AtomicBool::new(true),
            abort_tx,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Whether new transactions are still admitted
    pub fn is_open(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Write `frame` and collect the reply until the line goes idle.
    pub async fn transact(&self, frame: &Frame) -> Result<Response> {
        if !self.is_open() {
            return Err(SerialError::Closed);
        }

        let mut abort_rx = self.abort_tx.subscribe();
        let mut guard = self.port.lock().await;

        // Shutdown may have started while we waited for the lock
        if !self.is_open() {
            return Err(SerialError::Closed);
        }
        let port = guard.as_mut().ok_or(SerialError::Closed)?;

        log::debug!("{} <- {}", self.port_name, frame);
        let outcome = tokio::select! {
            res = write_and_drain(port.as_mut(), frame, &self.settings) => res,
            _ = abort_rx.wait_for(|aborted| *aborted) => Err(SerialError::Closed),
        };

        match outcome {
            Ok(response) => {
                log::debug!("{} -> {} ({:?})", self.port_name, response.to_hex(), response.completion);
                if response.is_truncated() {
                    log::warn!(
                        "Response to {} exceeded {:?}; returning {} partial bytes",
                        frame,
                        self.settings.response_deadline,
                        response.bytes.len()
                    );
                }
                Ok(response)
            }
            Err(SerialError::IoError(e)) if line_lost(&e) => {
                log::error!("Lost {} during transaction: {}", self.port_name, e);
                *guard = None;
                self.accepting.store(false, Ordering::Release);
                Err(SerialError::Closed)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`transact`](Self::transact), giving up after `deadline`.
    ///
    /// The frame may already be on the wire when the deadline fires.
    pub async fn transact_within(&self, frame: &Frame, deadline: Duration) -> Result<Response> {
        timeout(deadline, self.transact(frame))
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    /// Close the port, waiting for any in-flight transaction.
    pub async fn disconnect(&self) -> Result<()> {
        self.accepting.store(false, Ordering::Release);
        let mut guard = self.port.lock().await;
        self.release(&mut guard)
    }

    /// Stop admitting transactions, give the in-flight one `grace` to finish,
    /// then close. A transaction still running after `grace` fails with
    /// [`SerialError::Closed`].
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.accepting.store(false, Ordering::Release);

        let mut guard = match timeout(grace, self.port.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                log::warn!(
                    "Transaction on {} still running after {:?}; aborting it",
                    self.port_name,
                    grace
                );
                self.abort_tx.send_replace(true);
                self.port.lock().await
            }
        };
        self.release(&mut guard)
    }

    fn release(&self, slot: &mut Option<Box<dyn SerialPortIO>>) -> Result<()> {
        match slot.take() {
            Some(_port) => {
                log::info!("Disconnected from {}", self.port_name);
                Ok(())
            }
            None => Err(SerialError::NotConnected),
        }
    }
}

async fn write_and_drain(
    port: &mut dyn SerialPortIO,
    frame: &Frame,
    settings: &TransportSettings,
) -> Result<Response> {
    port.send_data(frame.as_bytes()).await?;
    port.flush().await?;

    let started = Instant::now();
    let mut bytes = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = port.read_data(&mut chunk, settings.read_timeout).await?;
        if n == 0 {
            return Ok(Response {
                bytes,
                completion: Completion::Idle,
            });
        }
        bytes.extend_from_slice(&chunk[..n]);

        if started.elapsed() >= settings.response_deadline {
            return Ok(Response {
                bytes,
                completion: Completion::Deadline,
            });
        }
    }
}

fn line_lost(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
            | ErrorKind::PermissionDenied
    )
}
