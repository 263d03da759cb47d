#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use projector_bridge_lib::serial::{Result, SerialError, SerialInterface, SerialPortIO, TransportSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Read(usize),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send>;

/// A port whose replies are computed from the written frame.
///
/// Each reply chunk is handed out by one read; once the chunks run out the
/// port reports idle.
pub struct ScriptedPort {
    respond: Responder,
    pending: VecDeque<Vec<u8>>,
    read_delay: Duration,
    fail_reads: Option<ErrorKind>,
    log: EventLog,
}

impl ScriptedPort {
    pub fn new(respond: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            pending: VecDeque::new(),
            read_delay: Duration::ZERO,
            fail_reads: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer with the same chunks.
    pub fn replying(chunks: &[&[u8]]) -> Self {
        let chunks: Vec<Vec<u8>> = chunks.iter().map(|c| c.to_vec()).collect();
        Self::new(move |_| chunks.clone())
    }

    /// Never go quiet after a write.
    pub fn chattering(byte: u8) -> Self {
        Self::new(move |_| vec![vec![byte; 4]; 10_000])
    }

    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn fail_reads(mut self, kind: ErrorKind) -> Self {
        self.fail_reads = Some(kind);
        self
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn into_interface(self, settings: TransportSettings) -> (SerialInterface, EventLog) {
        let log = self.log();
        (SerialInterface::from_io("scripted", Box::new(self), settings), log)
    }
}

#[async_trait]
impl SerialPortIO for ScriptedPort {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.log.lock().unwrap().push(Event::Write(data.to_vec()));
        self.pending = (self.respond)(data).into();
        Ok(())
    }

    async fn read_data(&mut self, buf: &mut [u8], _idle: Duration) -> Result<usize> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if let Some(kind) = self.fail_reads {
            return Err(SerialError::IoError(std::io::Error::new(kind, "scripted failure")));
        }

        let n = match self.pending.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    chunk.drain(..n);
                    self.pending.push_front(chunk);
                }
                n
            }
            None => 0,
        };
        self.log.lock().unwrap().push(Event::Read(n));
        Ok(n)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn settings() -> TransportSettings {
    TransportSettings::new(19200)
        .with_read_timeout(Duration::from_millis(20))
        .with_response_deadline(Duration::from_secs(2))
}
