use anyhow::{anyhow, Context, Result};
use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};

use super::DisplacementSink;
use crate::DisplacementRecord;

/// Streams records as JSON lines to a listening TCP peer (plotting tools, bridges).
///
/// Each record is flushed immediately so the peer sees displacements live.
pub struct TcpSink {
    addr: String,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpSink {
    pub fn new(addr: String) -> Self {
        Self { addr, stream: None }
    }
}

impl DisplacementSink for TcpSink {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn open(&mut self) -> Result<()> {
        let stream =
            TcpStream::connect(&self.addr).with_context(|| format!("failed to connect to {}", self.addr))?;
        stream.set_nodelay(true)?;
        log::info!("TcpSink: connected to {}", self.addr);
        self.stream = Some(BufWriter::new(stream));
        Ok(())
    }

    fn write(&mut self, record: &DisplacementRecord) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("not connected to {}", self.addr))?;
        serde_json::to_writer(&mut *stream, record)?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            if let Ok(inner) = stream.into_inner() {
                let _ = inner.shutdown(Shutdown::Write);
            }
        }
        Ok(())
    }
}
