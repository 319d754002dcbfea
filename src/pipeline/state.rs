//! Per-run pipeline state shared by the driver and every work unit.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::background::BackgroundModel;
use crate::detect::AlgorithmSuite;
use crate::ingest::InputSource;
use crate::render::DiagnosticRenderer;
use crate::ring::DescriptorRing;
use crate::sink::ResultSink;
use crate::{CancelToken, DisplacementTable};

/// State scoped to one `Pipeline::run`, shared by `Arc`.
pub(crate) struct PipelineState {
    pub(crate) ring: Arc<DescriptorRing>,
    pub(crate) background: BackgroundModel,
    pub(crate) displacements: DisplacementTable,
    pub(crate) suite: AlgorithmSuite,
    pub(crate) sink: ResultSink,
    pub(crate) renderer: Option<Arc<dyn DiagnosticRenderer>>,
    /// Polled by the driver, re-read by the resolver for diagnostics.
    pub(crate) source: Mutex<Box<dyn InputSource>>,
    pub(crate) cancel: CancelToken,
    pub(crate) counters: Counters,
}

impl PipelineState {
    pub(crate) fn stats(&self) -> PipelineStats {
        let mut stats = self.counters.snapshot();
        stats.sink_errors = self.sink.errors();
        stats
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) frames_dispatched: AtomicU64,
    pub(crate) empty_polls: AtomicU64,
    pub(crate) fetch_errors: AtomicU64,
    pub(crate) pairs_resolved: AtomicU64,
    pub(crate) degraded_pairs: AtomicU64,
    pub(crate) continuity_warnings: AtomicU64,
    pub(crate) slot_overruns: AtomicU64,
    pub(crate) cancelled_units: AtomicU64,
    pub(crate) background_rejections: AtomicU64,
    pub(crate) worker_panics: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PipelineStats {
            frames_dispatched: load(&self.frames_dispatched),
            empty_polls: load(&self.empty_polls),
            fetch_errors: load(&self.fetch_errors),
            pairs_resolved: load(&self.pairs_resolved),
            degraded_pairs: load(&self.degraded_pairs),
            continuity_warnings: load(&self.continuity_warnings),
            slot_overruns: load(&self.slot_overruns),
            cancelled_units: load(&self.cancelled_units),
            background_rejections: load(&self.background_rejections),
            worker_panics: load(&self.worker_panics),
            sink_errors: 0,
        }
    }
}

/// End-of-run counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_dispatched: u64,
    /// Polls that returned no frame.
    pub empty_polls: u64,
    pub fetch_errors: u64,
    /// Adjacent pairs for which a record was written (degraded ones included).
    pub pairs_resolved: u64,
    /// Pairs recorded as `(0, 0)` because no displacement could be estimated.
    pub degraded_pairs: u64,
    pub continuity_warnings: u64,
    /// Times the driver had to wait for a slot's previous occupant.
    pub slot_overruns: u64,
    pub cancelled_units: u64,
    pub background_rejections: u64,
    pub worker_panics: u64,
    pub sink_errors: u64,
}

#[cfg(test)]
impl PipelineState {
    /// State around an unstarted synthetic source and a uniform background.
    pub(crate) fn for_tests(
        capacity: usize,
        suite: AlgorithmSuite,
        sink: Box<dyn crate::sink::DisplacementSink>,
    ) -> Self {
        use crate::background::Background;
        use crate::ingest::{SyntheticConfig, SyntheticSource};

        Self {
            ring: DescriptorRing::new(capacity),
            background: BackgroundModel::new(Background::uniform(4, 4, 1, 0.0), 0.96),
            displacements: DisplacementTable::new(capacity),
            suite,
            sink: ResultSink::new(sink),
            renderer: None,
            source: Mutex::new(Box::new(SyntheticSource::new(SyntheticConfig::default()))),
            cancel: CancelToken::new(),
            counters: Counters::default(),
        }
    }
}
