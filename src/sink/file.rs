use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use super::DisplacementSink;
use crate::DisplacementRecord;

/// Appends one JSON object per record to a local file.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, writer: None }
    }
}

impl DisplacementSink for JsonLinesSink {
    fn name(&self) -> &'static str {
        "jsonl-file"
    }

    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn write(&mut self, record: &DisplacementRecord) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not open", self.path.display()))?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Displacement;

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = JsonLinesSink::new(path.clone());
        assert!(sink.write(&DisplacementRecord::degraded(0)).is_err());

        sink.open().unwrap();
        sink.write(&DisplacementRecord::new(2, Displacement::new(3.0, -1.5)))
            .unwrap();
        sink.write(&DisplacementRecord::degraded(1)).unwrap();
        sink.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<DisplacementRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], DisplacementRecord::new(2, Displacement::new(3.0, -1.5)));
        assert_eq!(records[1].sequence, 1);
    }
}
