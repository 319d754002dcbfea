use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rand::Rng;

use displacement_kernel::{
    AbortReason, AlgorithmSuite, Background, CancelToken, Correspondence, DescriptorExtractor,
    Descriptors, DiagnosticRenderer, Displacement, DisplacementSolver, FeatureDetector,
    FeatureMatcher, Frame, InputSource, Keypoint, MemorySink, PairView, Pipeline,
    PipelineConfig, SyntheticConfig, SyntheticSource,
};
use displacement_kernel::ingest::SourceStats;

// -------------------- Stub source --------------------

#[derive(Clone, Default)]
struct SourceWatch {
    delivered: Arc<AtomicU64>,
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    /// `frame_at` calls, failed ones included.
    refetches: Arc<AtomicU64>,
}

/// Delivers `total` 4x4 frames (0 = unbounded), the first being the background seed.
struct ScriptedSource {
    total: u64,
    next: u64,
    fail_start: bool,
    /// Every k-th poll alternates between "no frame yet" and a fetch error.
    hiccup_every: u64,
    polls: u64,
    /// Delivered frames can no longer be fetched again.
    forgetful: bool,
    watch: SourceWatch,
}

impl ScriptedSource {
    fn new(total: u64) -> Self {
        Self {
            total,
            next: 0,
            fail_start: false,
            hiccup_every: 0,
            polls: 0,
            forgetful: false,
            watch: SourceWatch::default(),
        }
    }

    fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new(10)
        }
    }

    fn watch(&self) -> SourceWatch {
        self.watch.clone()
    }
}

impl InputSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn start(&mut self, _id: &str) -> Result<()> {
        if self.fail_start {
            return Err(anyhow!("camera offline"));
        }
        self.watch.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_more(&self) -> bool {
        !self.watch.stopped.load(Ordering::SeqCst) && (self.total == 0 || self.next < self.total)
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        self.polls += 1;
        if self.hiccup_every > 0 && self.polls % self.hiccup_every == 0 {
            if (self.polls / self.hiccup_every) % 2 == 0 {
                return Err(anyhow!("transient read error"));
            }
            return Ok(None);
        }
        let frame = Frame::filled(self.next, 4, 4, (self.next % 256) as u8);
        self.next += 1;
        self.watch.delivered.store(self.next, Ordering::SeqCst);
        Ok(Some(frame))
    }

    fn frame_at(&mut self, index: u64) -> Result<Frame> {
        self.watch.refetches.fetch_add(1, Ordering::SeqCst);
        if self.forgetful {
            return Err(anyhow!("frame {} already released", index));
        }
        Ok(Frame::filled(index, 4, 4, (index % 256) as u8))
    }

    fn stop(&mut self) {
        self.watch.stopped.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.next,
            empty_polls: 0,
            id: "scripted".to_string(),
        }
    }
}

// -------------------- Stub vision collaborators --------------------

/// Blocks detection of one frame until the source has delivered `until` frames.
struct Gate {
    frame_index: u64,
    until: u64,
    delivered: Arc<AtomicU64>,
    /// Extra hold after opening, so the driver finds the slot still leased.
    hold: Duration,
}

/// One keypoint at `x = 3 * frame index`: every adjacent pair moves by +3 px.
#[derive(Default)]
struct ShiftDetector {
    calls: Arc<AtomicUsize>,
    featureless: Vec<u64>,
    jitter_ms: u64,
    gate: Option<Gate>,
}

impl FeatureDetector for ShiftDetector {
    fn name(&self) -> &'static str {
        "shift"
    }

    fn detect(&self, frame: &Frame, _background: &Background) -> Result<Vec<Keypoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.jitter_ms > 0 {
            let ms = rand::thread_rng().gen_range(0..=self.jitter_ms);
            thread::sleep(Duration::from_millis(ms));
        }
        if let Some(gate) = &self.gate {
            if gate.frame_index == frame.index() {
                let deadline = Instant::now() + Duration::from_secs(5);
                while gate.delivered.load(Ordering::SeqCst) < gate.until && Instant::now() < deadline
                {
                    thread::sleep(Duration::from_millis(1));
                }
                thread::sleep(gate.hold);
            }
        }
        if self.featureless.contains(&frame.index()) {
            return Ok(Vec::new());
        }
        Ok(vec![Keypoint::new(frame.index() as f32 * 3.0, 0.0, 1.0)])
    }
}

/// Descriptor row carries the frame index so the matcher can see what it pairs.
struct IndexExtractor;

impl DescriptorExtractor for IndexExtractor {
    fn name(&self) -> &'static str {
        "index"
    }

    fn describe(&self, frame: &Frame, keypoints: &[Keypoint]) -> Result<Descriptors> {
        let mut descriptors = Descriptors::new(1);
        for _ in keypoints {
            descriptors.push_row(&[frame.index() as f32])?;
        }
        Ok(descriptors)
    }
}

/// Records every (frame index, frame index) pair it is asked to match.
#[derive(Clone, Default)]
struct RecordingMatcher {
    pairs: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl RecordingMatcher {
    fn pairs(&self) -> Vec<(u64, u64)> {
        self.pairs.lock().unwrap().clone()
    }
}

impl FeatureMatcher for RecordingMatcher {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn match_descriptors(&self, a: &Descriptors, b: &Descriptors) -> Result<Vec<Correspondence>> {
        let pair = (a.row(0)[0] as u64, b.row(0)[0] as u64);
        self.pairs.lock().unwrap().push(pair);
        Ok(vec![Correspondence::new(0, 0, 0.0)])
    }
}

struct FirstKeypointSolver;

impl DisplacementSolver for FirstKeypointSolver {
    fn name(&self) -> &'static str {
        "first-keypoint"
    }

    fn solve(
        &self,
        _matches: &[Correspondence],
        a: &[Keypoint],
        b: &[Keypoint],
    ) -> Result<Displacement> {
        Ok(Displacement::new(b[0].x - a[0].x, b[0].y - a[0].y))
    }
}

/// What the renderer saw for one pair.
#[derive(Clone, Debug, PartialEq)]
struct RenderedPair {
    first_sequence: u64,
    first_frame: u64,
    second_frame: u64,
    first_x: f32,
    second_x: f32,
    matches: usize,
}

#[derive(Clone, Default)]
struct RecordingRenderer {
    pairs: Arc<Mutex<Vec<RenderedPair>>>,
}

impl RecordingRenderer {
    fn sorted(&self) -> Vec<RenderedPair> {
        let mut pairs = self.pairs.lock().unwrap().clone();
        pairs.sort_by_key(|p| p.first_sequence);
        pairs
    }
}

impl DiagnosticRenderer for RecordingRenderer {
    fn render(&self, pair: &PairView<'_>) -> Result<()> {
        self.pairs.lock().unwrap().push(RenderedPair {
            first_sequence: pair.first_sequence,
            first_frame: pair.first_frame.index(),
            second_frame: pair.second_frame.index(),
            first_x: pair.first.keypoints[0].x,
            second_x: pair.second.keypoints[0].x,
            matches: pair.matches.matches.len(),
        });
        Ok(())
    }
}

fn suite(detector: ShiftDetector, matcher: &RecordingMatcher) -> AlgorithmSuite {
    AlgorithmSuite::new(detector, IndexExtractor, matcher.clone(), FirstKeypointSolver)
}

fn config(ring_capacity: usize, workers: usize, queue_depth: usize) -> PipelineConfig {
    PipelineConfig {
        ring_capacity,
        workers,
        queue_depth,
        backoff: Duration::from_millis(1),
        seed_timeout: Duration::from_millis(500),
        ..PipelineConfig::default()
    }
}

// -------------------- Tests --------------------

#[test]
fn constant_shift_yields_one_record_per_adjacent_pair() {
    let matcher = RecordingMatcher::default();
    let sink = MemorySink::new();
    let pipeline = Pipeline::builder(config(50, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    // Seed frame followed by f0..f4.
    let source = ScriptedSource::new(6);
    let watch = source.watch();
    let outcome = pipeline.run(Box::new(source), "stub://shift");

    assert!(!outcome.is_aborted());
    assert_eq!(outcome.records.len(), 50);
    let records = outcome.sorted_records();
    assert_eq!(records.len(), 4);
    for (expected_seq, record) in records.iter().enumerate() {
        assert_eq!(record.sequence, expected_seq as u64);
        assert_eq!((record.x, record.y), (3.0, 0.0));
    }
    assert!(outcome.records[4..].iter().all(Option::is_none));
    assert_eq!(outcome.stats.frames_dispatched, 5);
    assert_eq!(outcome.stats.pairs_resolved, 4);
    assert_eq!(outcome.stats.degraded_pairs, 0);
    assert_eq!(matcher.pairs().len(), 4);
    assert_eq!(sink.len(), 4);
    // No renderer configured: frames are never fetched again.
    assert_eq!(watch.refetches.load(Ordering::SeqCst), 0);
}

#[test]
fn failing_source_start_aborts_without_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let detector = ShiftDetector {
        calls: Arc::clone(&calls),
        ..ShiftDetector::default()
    };
    let matcher = RecordingMatcher::default();
    let sink = MemorySink::new();
    let pipeline = Pipeline::builder(config(8, 2, 2))
        .suite(suite(detector, &matcher))
        .sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(ScriptedSource::failing()), "rtsp://offline");

    assert!(outcome.records.is_empty());
    assert!(matches!(outcome.abort, Some(AbortReason::SourceStart(_))));
    assert_eq!(outcome.stats.frames_dispatched, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(sink.is_empty());
}

#[test]
fn missing_seed_frame_aborts() {
    let matcher = RecordingMatcher::default();
    let pipeline = Pipeline::builder(config(8, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .build()
        .unwrap();
    let source = ScriptedSource::new(0);
    let watch = source.watch();
    // Stopped before the run: started, but never delivers a frame.
    watch.stopped.store(true, Ordering::SeqCst);

    let outcome = pipeline.run(Box::new(source), "stub://empty");

    assert!(outcome.records.is_empty());
    assert!(matches!(outcome.abort, Some(AbortReason::SeedFrame(_))));
    assert!(watch.started.load(Ordering::SeqCst));
}

#[test]
fn every_adjacent_pair_is_matched_exactly_once_under_jitter() {
    let matcher = RecordingMatcher::default();
    let detector = ShiftDetector {
        jitter_ms: 3,
        ..ShiftDetector::default()
    };
    let pipeline = Pipeline::builder(config(16, 4, 4))
        .suite(suite(detector, &matcher))
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(ScriptedSource::new(201)), "stub://jitter");

    assert_eq!(outcome.stats.frames_dispatched, 200);
    assert_eq!(outcome.stats.continuity_warnings, 0);
    assert_eq!(outcome.stats.pairs_resolved, 199);

    let mut seen: HashMap<(u64, u64), usize> = HashMap::new();
    for pair in matcher.pairs() {
        *seen.entry(pair).or_default() += 1;
    }
    assert_eq!(seen.len(), 199);
    // Frame indices are sequence + 1 (index 0 seeded the background).
    for s in 0..199u64 {
        assert_eq!(seen.get(&(s + 1, s + 2)), Some(&1), "pair ({}, {})", s, s + 1);
    }

    // The table keeps the most recent record per ring index.
    let records = outcome.sorted_records();
    assert_eq!(records.len(), 16);
    assert_eq!(records.last().map(|r| r.sequence), Some(198));
    assert!(records.iter().all(|r| r.x == 3.0 && r.y == 0.0));
}

#[test]
fn lagging_unit_skips_overwritten_neighbor() {
    let matcher = RecordingMatcher::default();
    let sink = MemorySink::new();
    let source = ScriptedSource::new(9);
    let watch = source.watch();
    // Sequence 1 (frame 2) stalls until sequence 5 (frame 6) has been delivered,
    // by which time slot 0 already holds sequence 4.
    let detector = ShiftDetector {
        gate: Some(Gate {
            frame_index: 2,
            until: 7,
            delivered: Arc::clone(&watch.delivered),
            hold: Duration::from_millis(100),
        }),
        ..ShiftDetector::default()
    };
    let pipeline = Pipeline::builder(config(4, 2, 1))
        .suite(suite(detector, &matcher))
        .sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(source), "stub://lag");

    assert_eq!(outcome.stats.frames_dispatched, 8);
    assert!(outcome.stats.continuity_warnings >= 1);
    assert!(outcome.stats.slot_overruns >= 1);
    // Never matched across a gap.
    for (a, b) in matcher.pairs() {
        assert_eq!(b, a + 1, "matched non-adjacent frames {} and {}", a, b);
    }
    // Pair (0, 1) was lost, the rest were resolved.
    let sequences: Vec<u64> = sink.records().iter().map(|r| r.sequence).collect();
    assert!(!sequences.contains(&0));
    for s in 1..7u64 {
        assert!(sequences.contains(&s), "missing pair ({}, {})", s, s + 1);
    }
}

#[test]
fn featureless_frame_degrades_its_pairs_without_matching() {
    let matcher = RecordingMatcher::default();
    // Frame 3 carries sequence 2.
    let detector = ShiftDetector {
        featureless: vec![3],
        ..ShiftDetector::default()
    };
    let pipeline = Pipeline::builder(config(10, 2, 2))
        .suite(suite(detector, &matcher))
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(ScriptedSource::new(6)), "stub://blank");

    let xs: Vec<(u64, f32)> = outcome
        .sorted_records()
        .iter()
        .map(|r| (r.sequence, r.x))
        .collect();
    assert_eq!(xs, vec![(0, 3.0), (1, 0.0), (2, 0.0), (3, 3.0)]);
    assert_eq!(outcome.stats.degraded_pairs, 2);
    assert!(matcher.pairs().iter().all(|&(a, b)| a != 3 && b != 3));
}

#[test]
fn cancellation_mid_stream_drains_and_returns_full_table() {
    let matcher = RecordingMatcher::default();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let source = ScriptedSource::new(0);
    let watch = source.watch();
    let pipeline = Pipeline::builder(config(8, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .cancel_token(cancel)
        .on_dispatch(move |sequence| {
            if sequence == 30 {
                trigger.cancel();
            }
        })
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(source), "stub://endless");

    assert!(!outcome.is_aborted());
    assert_eq!(outcome.records.len(), 8);
    assert_eq!(outcome.stats.frames_dispatched, 31);
    assert!(watch.stopped.load(Ordering::SeqCst));
    assert!(outcome
        .records
        .iter()
        .flatten()
        .all(|record| record.sequence < 30));
}

#[test]
fn empty_polls_and_fetch_errors_are_retried() {
    let matcher = RecordingMatcher::default();
    let mut source = ScriptedSource::new(12);
    source.hiccup_every = 3;
    let pipeline = Pipeline::builder(config(10, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .build()
        .unwrap();

    let outcome = pipeline.run(Box::new(source), "stub://flaky");

    assert!(!outcome.is_aborted());
    assert_eq!(outcome.stats.frames_dispatched, 11);
    assert_eq!(outcome.stats.pairs_resolved, 10);
    assert!(outcome.stats.empty_polls >= 1);
    assert!(outcome.stats.fetch_errors >= 1);
    assert!(outcome.sorted_records().iter().all(|r| r.x == 3.0));
}

#[test]
fn diagnostics_render_each_pair_in_frame_order() {
    let matcher = RecordingMatcher::default();
    let sink = MemorySink::new();
    let renderer = RecordingRenderer::default();
    let pipeline = Pipeline::builder(config(10, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .sink(Box::new(sink.clone()))
        .renderer(Arc::new(renderer.clone()))
        .build()
        .unwrap();
    let source = ScriptedSource::new(8);
    let watch = source.watch();

    let outcome = pipeline.run(Box::new(source), "stub://diag");

    assert_eq!(outcome.stats.pairs_resolved, 6);
    let rendered = renderer.sorted();
    assert_eq!(rendered.len(), 6);
    for (s, pair) in rendered.iter().enumerate() {
        let s = s as u64;
        assert_eq!(pair.first_sequence, s);
        // Lower sequence on the left whichever side resolved the pair.
        assert_eq!(pair.first_frame, s + 1);
        assert_eq!(pair.second_frame, pair.first_frame + 1);
        assert_eq!(pair.first_x, pair.first_frame as f32 * 3.0);
        assert_eq!(pair.second_x, pair.first_x + 3.0);
        assert_eq!(pair.matches, 1);
    }
    let mut sequences: Vec<u64> = sink.records().iter().map(|r| r.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(
        sequences,
        rendered.iter().map(|p| p.first_sequence).collect::<Vec<_>>()
    );
    // Exactly the neighbor side of each pair is fetched again.
    assert_eq!(watch.refetches.load(Ordering::SeqCst), 6);
}

#[test]
fn diagnostics_skip_pairs_whose_neighbor_frame_is_gone() {
    let matcher = RecordingMatcher::default();
    let sink = MemorySink::new();
    let renderer = RecordingRenderer::default();
    let pipeline = Pipeline::builder(config(10, 2, 2))
        .suite(suite(ShiftDetector::default(), &matcher))
        .sink(Box::new(sink.clone()))
        .renderer(Arc::new(renderer.clone()))
        .build()
        .unwrap();
    let mut source = ScriptedSource::new(8);
    source.forgetful = true;
    let watch = source.watch();

    let outcome = pipeline.run(Box::new(source), "stub://diag-gone");

    assert!(!outcome.is_aborted());
    assert!(renderer.sorted().is_empty());
    assert_eq!(watch.refetches.load(Ordering::SeqCst), 6);
    assert_eq!(outcome.stats.pairs_resolved, 6);
    assert_eq!(outcome.stats.degraded_pairs, 0);
    assert_eq!(sink.len(), 6);
    assert!(outcome.sorted_records().iter().all(|r| r.x == 3.0));
}

#[test]
fn reference_suites_recover_the_synthetic_shift() {
    let scenes = [(96, 64), (160, 120)];
    let suites = [
        ("patch-bf", AlgorithmSuite::patch_brute_force()),
        ("patch-cross", AlgorithmSuite::patch_cross_checked()),
    ];
    for (width, height) in scenes {
        for (name, suite) in &suites {
            let sink = MemorySink::new();
            let synthetic = SyntheticConfig {
                width,
                height,
                frames: 12,
                shift_x: 3,
                shift_y: 0,
                ..SyntheticConfig::default()
            };
            let pipeline = Pipeline::builder(config(20, 2, 2))
                .suite(suite.clone())
                .sink(Box::new(sink.clone()))
                .build()
                .unwrap();

            let outcome = pipeline.run(Box::new(SyntheticSource::new(synthetic)), "stub://scene");

            assert!(!outcome.is_aborted());
            assert_eq!(outcome.stats.frames_dispatched, 11);
            assert_eq!(outcome.stats.pairs_resolved, 10);
            assert_eq!(outcome.stats.degraded_pairs, 0, "{} on {}x{}", name, width, height);
            assert_eq!(outcome.stats.continuity_warnings, 0);
            let records = outcome.sorted_records();
            assert_eq!(
                records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
                (0..10).collect::<Vec<_>>()
            );
            for r in &records {
                assert_eq!(
                    (r.x, r.y),
                    (3.0, 0.0),
                    "{} on {}x{}: pair {}",
                    name,
                    width,
                    height,
                    r.sequence
                );
            }
            assert_eq!(sink.len(), 10);
        }
    }
}
