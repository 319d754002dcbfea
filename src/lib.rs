//! Displacement Kernel
//!
//! This crate implements the frame pipeline scheduler behind adjacent-frame
//! motion estimation: every pair of temporally adjacent frames in a video
//! stream gets a 2-D displacement, computed by matching features detected
//! against a slowly adapting background model.
//!
//! # Architecture
//!
//! The scheduler is a producer/worker dataflow:
//!
//! 1. **Driver**: pulls frames from an [`InputSource`], assigns sequence numbers,
//!    arms ring slots and dispatches work units to a bounded worker pool.
//! 2. **Descriptor Ring**: fixed-capacity circular array of per-frame feature slots.
//! 3. **Neighbor Resolver**: decides, under out-of-order completion, which side of
//!    an adjacent pair computes its displacement. Exactly one side does.
//! 4. **Background Model**: exponential moving average of folded frames.
//! 5. **Result Sink**: forwards every finalized record to the output collaborator.
//!
//! # Module Structure
//!
//! - `frame`: Frame buffers handed from ingestion to work units
//! - `background`: Shared background model
//! - `ring`: Descriptor ring, slot phases and leases
//! - `resolver`: Neighbor pairing protocol
//! - `pipeline`: Driver loop, worker pool, per-run state
//! - `detect`: Vision collaborator traits, reference algorithms, suite registry
//! - `ingest`: Frame sources (synthetic, image sequences)
//! - `sink`: Displacement output collaborators
//! - `render`: Optional diagnostic correspondence images
//! - `config`: Layered run settings (defaults, file, environment)
//! - `ui`: Terminal progress for the `track_displacement` binary
//! - Core types: DisplacementRecord, DisplacementTable, CancelToken

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod background;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod resolver;
pub mod ring;
pub mod sink;
pub mod ui;

pub use background::{Background, BackgroundModel, DEFAULT_BACKGROUND_RATIO};
pub use detect::{
    AlgorithmSuite, Correspondence, DescriptorExtractor, Descriptors, Displacement,
    DisplacementSolver, FeatureDetector, FeatureMatcher, Keypoint, MatchSet, SuiteRegistry,
};
pub use frame::{Frame, FrameSample};
pub use ingest::{InputSource, SyntheticConfig, SyntheticSource};
pub use pipeline::{
    AbortReason, Pipeline, PipelineBuilder, PipelineConfig, PipelineStats, RunOutcome,
};
pub use render::{DiagnosticRenderer, PairView};
pub use ring::{DescriptorRing, SlotFeatures, SlotPhase, DEFAULT_RING_CAPACITY};
pub use sink::{DisplacementSink, LogSink, MemorySink, SinkTarget};

// -------------------- Displacement Records --------------------

/// Estimated motion between sequence number `sequence` and `sequence + 1`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DisplacementRecord {
    pub sequence: u64,
    pub x: f32,
    pub y: f32,
}

impl DisplacementRecord {
    pub fn new(sequence: u64, displacement: Displacement) -> Self {
        Self {
            sequence,
            x: displacement.x,
            y: displacement.y,
        }
    }

    /// Record for a pair whose displacement could not be estimated.
    pub fn degraded(sequence: u64) -> Self {
        Self::new(sequence, Displacement::ZERO)
    }
}

/// Ring-indexed table of displacement records, one entry per ring slot.
///
/// Entry `i` holds the record for the most recent pair `(s, s + 1)` with
/// `s mod capacity == i`. Entries never written stay `None`.
pub struct DisplacementTable {
    entries: Vec<Mutex<Option<DisplacementRecord>>>,
}

impl DisplacementTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Overwrite the entry at `index`.
    pub fn write(&self, index: usize, record: DisplacementRecord) {
        *self.entries[index].lock() = Some(record);
    }

    pub fn get(&self, index: usize) -> Option<DisplacementRecord> {
        self.entries.get(index).and_then(|entry| *entry.lock())
    }

    /// Copy of every entry, in ring order.
    pub fn snapshot(&self) -> Vec<Option<DisplacementRecord>> {
        self.entries.iter().map(|entry| *entry.lock()).collect()
    }
}

// -------------------- Cancellation --------------------

/// Cooperative cancellation flag shared by the caller, the driver and every work unit.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
