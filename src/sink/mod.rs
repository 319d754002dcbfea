//! Displacement output collaborators.
//!
//! Every finalized [`DisplacementRecord`] is forwarded to one sink, synchronously,
//! from the work unit that produced it. Sinks observe records in completion order,
//! not sequence order. Write failures are logged and counted, never fatal.
//!
//! Available sinks:
//! - `log`: one `info` line per record
//! - `file:<path>`: JSON lines file
//! - `tcp://host:port`: JSON lines over a TCP socket
//! - in-memory collector (library callers and tests)

mod file;
mod memory;
mod tcp;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::DisplacementRecord;

pub use file::JsonLinesSink;
pub use memory::MemorySink;
pub use tcp::TcpSink;

/// Output sink contract.
pub trait DisplacementSink: Send {
    /// Sink identifier for logs.
    fn name(&self) -> &'static str;

    /// Acquire the underlying resource (file, socket).
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, record: &DisplacementRecord) -> Result<()>;

    /// Flush and release the underlying resource.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that logs every record.
#[derive(Default)]
pub struct LogSink;

impl DisplacementSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn write(&mut self, record: &DisplacementRecord) -> Result<()> {
        log::info!(
            "displacement seq={} x={:.2} y={:.2}",
            record.sequence,
            record.x,
            record.y
        );
        Ok(())
    }
}

/// Where displacement records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkTarget {
    Log,
    File(PathBuf),
    Tcp(String),
}

impl FromStr for SinkTarget {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value == "log" {
            return Ok(SinkTarget::Log);
        }
        if let Some(path) = value.strip_prefix("file:") {
            if path.is_empty() {
                return Err(anyhow!("file sink requires a path (file:<path>)"));
            }
            return Ok(SinkTarget::File(PathBuf::from(path)));
        }
        if let Some(addr) = value.strip_prefix("tcp://") {
            if !addr.contains(':') {
                return Err(anyhow!("tcp sink requires host:port, got '{}'", addr));
            }
            return Ok(SinkTarget::Tcp(addr.to_string()));
        }
        Err(anyhow!(
            "unknown sink '{}' (expected log, file:<path> or tcp://host:port)",
            value
        ))
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkTarget::Log => write!(f, "log"),
            SinkTarget::File(path) => write!(f, "file:{}", path.display()),
            SinkTarget::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Build the sink for `target`. The sink is opened by the pipeline.
pub fn sink_for(target: &SinkTarget) -> Box<dyn DisplacementSink> {
    match target {
        SinkTarget::Log => Box::new(LogSink),
        SinkTarget::File(path) => Box::new(JsonLinesSink::new(path.clone())),
        SinkTarget::Tcp(addr) => Box::new(TcpSink::new(addr.clone())),
    }
}

/// Serializing adapter between work units and the output sink.
pub(crate) struct ResultSink {
    inner: Mutex<Box<dyn DisplacementSink>>,
    errors: AtomicU64,
}

impl ResultSink {
    pub(crate) fn new(sink: Box<dyn DisplacementSink>) -> Self {
        Self {
            inner: Mutex::new(sink),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn open(&self) {
        let mut sink = self.inner.lock();
        if let Err(e) = sink.open() {
            self.errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("sink {} failed to open: {:#}", sink.name(), e);
        }
    }

    pub(crate) fn emit(&self, record: &DisplacementRecord) {
        let mut sink = self.inner.lock();
        if let Err(e) = sink.write(record) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "sink {} dropped record for sequence {}: {:#}",
                sink.name(),
                record.sequence,
                e
            );
        }
    }

    pub(crate) fn close(&self) {
        let mut sink = self.inner.lock();
        if let Err(e) = sink.close() {
            self.errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("sink {} failed to close: {:#}", sink.name(), e);
        }
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}
