//! Pipeline driver.
//!
//! One driver thread pulls frames, arms ring slots and dispatches work units to a
//! fixed worker pool; it never waits on individual units except through queue
//! backpressure, a slot overrun, and the final drain.
//!
//! ```text
//!  InputSource --poll--> driver --arm slot s mod N--> bounded queue --> workers
//!                                                                        |
//!        detect/describe -> publish Ready -> resolve neighbors -> fold background
//! ```

mod pool;
pub(crate) mod state;
mod work_unit;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::background::{BackgroundModel, DEFAULT_BACKGROUND_RATIO};
use crate::detect::{AlgorithmSuite, SuiteRegistry};
use crate::frame::{Frame, FrameSample};
use crate::ingest::InputSource;
use crate::render::DiagnosticRenderer;
use crate::ring::{DescriptorRing, DEFAULT_RING_CAPACITY};
use crate::sink::{DisplacementSink, LogSink, ResultSink};
use crate::{CancelToken, DisplacementRecord, DisplacementTable};

use pool::WorkerPool;
use state::{Counters, PipelineState};
use work_unit::WorkUnit;

pub use state::PipelineStats;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(20);
const DEFAULT_SEED_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_DEFAULT_WORKERS: usize = 8;

/// Scheduler parameters.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub ring_capacity: usize,
    pub background_ratio: f32,
    /// Sleep between polls that produced no frame.
    pub backoff: Duration,
    /// How long the driver retries "no frame yet" while acquiring the seed frame.
    pub seed_timeout: Duration,
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            backoff: DEFAULT_BACKOFF,
            seed_timeout: DEFAULT_SEED_TIMEOUT,
            workers,
            queue_depth: workers,
        }
    }
}

/// Available parallelism, capped.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity < 2 {
            return Err(anyhow!("ring_capacity must be at least 2"));
        }
        if !(self.background_ratio > 0.0 && self.background_ratio < 1.0) {
            return Err(anyhow!(
                "background_ratio must be in (0, 1), got {}",
                self.background_ratio
            ));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.workers + self.queue_depth >= self.ring_capacity {
            return Err(anyhow!(
                "workers + queue_depth ({} + {}) must be less than ring_capacity ({})",
                self.workers,
                self.queue_depth,
                self.ring_capacity
            ));
        }
        if self.backoff.is_zero() {
            return Err(anyhow!("backoff must be greater than zero"));
        }
        Ok(())
    }
}

/// Why a run ended without processing the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    SourceStart(String),
    SeedFrame(String),
    WorkerPool(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::SourceStart(e) => write!(f, "input source failed to start: {}", e),
            AbortReason::SeedFrame(e) => write!(f, "seed frame unavailable: {}", e),
            AbortReason::WorkerPool(e) => write!(f, "worker pool unavailable: {}", e),
        }
    }
}

/// Result of one `Pipeline::run`.
#[derive(Debug)]
pub struct RunOutcome {
    /// Ring-indexed displacement table, length `ring_capacity`; empty when aborted.
    pub records: Vec<Option<DisplacementRecord>>,
    pub stats: PipelineStats,
    pub abort: Option<AbortReason>,
}

impl RunOutcome {
    fn aborted(reason: AbortReason) -> Self {
        log::error!("pipeline aborted: {}", reason);
        Self {
            records: Vec::new(),
            stats: PipelineStats::default(),
            abort: Some(reason),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Written records ordered by sequence number.
    pub fn sorted_records(&self) -> Vec<DisplacementRecord> {
        let mut records: Vec<_> = self.records.iter().flatten().copied().collect();
        records.sort_by_key(|record| record.sequence);
        records
    }
}

type DispatchObserver = Box<dyn Fn(u64) + Send + Sync>;

/// Assembles a [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    suite: Option<AlgorithmSuite>,
    sink: Option<Box<dyn DisplacementSink>>,
    renderer: Option<Arc<dyn DiagnosticRenderer>>,
    cancel: CancelToken,
    on_dispatch: Option<DispatchObserver>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            suite: None,
            sink: None,
            renderer: None,
            cancel: CancelToken::new(),
            on_dispatch: None,
        }
    }

    pub fn suite(mut self, suite: AlgorithmSuite) -> Self {
        self.suite = Some(suite);
        self
    }

    pub fn sink(mut self, sink: Box<dyn DisplacementSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enable diagnostics.
    pub fn renderer(mut self, renderer: Arc<dyn DiagnosticRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called on the driver thread with every dispatched sequence number.
    pub fn on_dispatch(mut self, observer: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_dispatch = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let suite = match self.suite {
            Some(suite) => suite,
            None => SuiteRegistry::with_builtin().select(None)?,
        };
        Ok(Pipeline {
            config: self.config,
            suite,
            sink: self.sink.unwrap_or_else(|| Box::new(LogSink)),
            renderer: self.renderer,
            cancel: self.cancel,
            on_dispatch: self.on_dispatch,
        })
    }
}

/// A configured scheduler, consumed by [`Pipeline::run`].
pub struct Pipeline {
    config: PipelineConfig,
    suite: AlgorithmSuite,
    sink: Box<dyn DisplacementSink>,
    renderer: Option<Arc<dyn DiagnosticRenderer>>,
    cancel: CancelToken,
    on_dispatch: Option<DispatchObserver>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process the stream `id` until the source runs dry or the run is cancelled.
    pub fn run(self, mut source: Box<dyn InputSource>, id: &str) -> RunOutcome {
        let Pipeline {
            config,
            suite,
            sink,
            renderer,
            cancel,
            on_dispatch,
        } = self;

        log::info!(
            "starting pipeline: source={} id={} suite={} ring={} workers={} queue={}",
            source.name(),
            id,
            suite.describe(),
            config.ring_capacity,
            config.workers,
            config.queue_depth
        );
        if let Err(e) = source.start(id) {
            return RunOutcome::aborted(AbortReason::SourceStart(format!("{:#}", e)));
        }

        let seed = match acquire_seed(source.as_mut(), &config, &cancel) {
            Ok(seed) => seed,
            Err(e) => {
                source.stop();
                return RunOutcome::aborted(AbortReason::SeedFrame(format!("{:#}", e)));
            }
        };
        log::info!(
            "seeded background from frame {} ({}x{}x{})",
            seed.index(),
            seed.width(),
            seed.height(),
            seed.channels()
        );

        let ring = DescriptorRing::new(config.ring_capacity);
        let state = Arc::new(PipelineState {
            ring: Arc::clone(&ring),
            background: BackgroundModel::seeded(&seed, config.background_ratio),
            displacements: DisplacementTable::new(config.ring_capacity),
            suite,
            sink: ResultSink::new(sink),
            renderer,
            source: Mutex::new(source),
            cancel: cancel.clone(),
            counters: Counters::default(),
        });
        drop(seed);

        let pool = match WorkerPool::spawn(config.workers, config.queue_depth, &state) {
            Ok(pool) => pool,
            Err(e) => {
                state.source.lock().stop();
                return RunOutcome::aborted(AbortReason::WorkerPool(format!("{:#}", e)));
            }
        };
        state.sink.open();

        let started = Instant::now();
        let mut sequence: u64 = 0;
        let mut index: usize = 0;
        while !cancel.is_cancelled() {
            let polled = {
                let mut source = state.source.lock();
                if !source.has_more() {
                    break;
                }
                source.poll_frame()
            };
            let frame = match polled {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    Counters::bump(&state.counters.empty_polls);
                    thread::sleep(config.backoff);
                    continue;
                }
                Err(e) => {
                    Counters::bump(&state.counters.fetch_errors);
                    log::warn!("frame fetch failed, retrying: {:#}", e);
                    thread::sleep(config.backoff);
                    continue;
                }
            };

            let Some(lease) = ring.arm(index, sequence, frame.index(), &cancel) else {
                break;
            };
            if lease.waited_for_reuse() {
                Counters::bump(&state.counters.slot_overruns);
            }
            log::debug!(
                "dispatching sequence {} (frame {}) to slot {}",
                sequence,
                frame.index(),
                index
            );
            if let Err(e) = pool.dispatch(WorkUnit::new(FrameSample::new(sequence, frame), lease)) {
                log::error!("dispatch of sequence {} failed: {:#}", sequence, e);
                break;
            }
            Counters::bump(&state.counters.frames_dispatched);
            if let Some(observer) = &on_dispatch {
                observer(sequence);
            }

            sequence += 1;
            index = ring.next_index(index);
        }

        if cancel.is_cancelled() {
            log::info!("pipeline cancelled after {} frames; draining", sequence);
        }
        {
            let mut source = state.source.lock();
            source.stop();
            let source_stats = source.stats();
            log::info!(
                "source {} stopped after {} frames",
                source_stats.id,
                source_stats.frames_delivered
            );
        }
        pool.drain();
        state.sink.close();

        let stats = state.stats();
        log::info!(
            "pipeline finished in {:.2}s: {} frames, {} pairs ({} degraded), {} continuity warnings, {} overruns",
            started.elapsed().as_secs_f64(),
            stats.frames_dispatched,
            stats.pairs_resolved,
            stats.degraded_pairs,
            stats.continuity_warnings,
            stats.slot_overruns
        );
        RunOutcome {
            records: state.displacements.snapshot(),
            stats,
            abort: None,
        }
    }
}

/// First frame of the stream, retried while the source reports "no frame yet".
fn acquire_seed(
    source: &mut dyn InputSource,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Frame> {
    let deadline = Instant::now() + config.seed_timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled before the first frame"));
        }
        if !source.has_more() {
            return Err(anyhow!("source ended before the first frame"));
        }
        if let Some(frame) = source.poll_frame()? {
            return Ok(frame);
        }
        if Instant::now() >= deadline {
            return Err(anyhow!(
                "no frame within {} ms",
                config.seed_timeout.as_millis()
            ));
        }
        thread::sleep(config.backoff);
    }
}
