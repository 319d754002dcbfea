use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

use super::DisplacementSink;
use crate::DisplacementRecord;

/// Collects records in memory. Clones share the same buffer, so a caller can
/// keep one handle and give the other to the pipeline.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DisplacementRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far, in arrival order.
    pub fn records(&self) -> Vec<DisplacementRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl DisplacementSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write(&mut self, record: &DisplacementRecord) -> Result<()> {
        self.records.lock().push(*record);
        Ok(())
    }
}
