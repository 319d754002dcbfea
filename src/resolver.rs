//! Neighbor pairing.
//!
//! A work unit that has just published slot `i` for sequence `s` looks at slot
//! `i - 1` (backward, pair `(s - 1, s)`) and slot `i + 1` (forward, pair
//! `(s, s + 1)`). Both members of a pair publish before they look, so at least one
//! of them sees the other Ready. The pair is computed by whichever side wins the
//! claim flag stored on the slot of the lower sequence.

use std::sync::Arc;

use crate::detect::{Displacement, MatchSet};
use crate::frame::Frame;
use crate::pipeline::state::{Counters, PipelineState};
use crate::render::PairView;
use crate::ring::{Claim, SlotFeatures, SlotView};
use crate::DisplacementRecord;

/// What one side of the pairing protocol did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PairOutcome {
    /// This unit computed the pair and wrote the record.
    Computed(DisplacementRecord),
    /// The neighbor already claimed the pair.
    AlreadyClaimed,
    /// The neighbor is not Ready yet; its own check will resolve the pair.
    NotArrived,
    /// `s = 0` has no backward neighbor.
    NoPredecessor,
    /// The neighbor slot holds a non-adjacent sequence.
    ContinuityMismatch { expected: u64, found: Option<u64> },
}

/// Both sides of one resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    pub backward: PairOutcome,
    pub forward: PairOutcome,
}

/// One member of a pair being computed.
struct PairSide<'a> {
    sequence: u64,
    frame_index: u64,
    features: &'a SlotFeatures,
    /// Present for the resolving unit's own side.
    frame: Option<&'a Frame>,
}

pub(crate) struct NeighborResolver<'a> {
    state: &'a PipelineState,
}

impl<'a> NeighborResolver<'a> {
    pub(crate) fn new(state: &'a PipelineState) -> Self {
        Self { state }
    }

    pub(crate) fn resolve(
        &self,
        sequence: u64,
        index: usize,
        features: &Arc<SlotFeatures>,
        frame: &Frame,
    ) -> Resolution {
        let own = PairSide {
            sequence,
            frame_index: frame.index(),
            features: features.as_ref(),
            frame: Some(frame),
        };
        Resolution {
            backward: self.backward(index, &own),
            forward: self.forward(index, &own),
        }
    }

    fn backward(&self, index: usize, own: &PairSide<'_>) -> PairOutcome {
        let Some(expected) = own.sequence.checked_sub(1) else {
            return PairOutcome::NoPredecessor;
        };
        let ring = &self.state.ring;
        let p = ring.previous_index(index);
        let view = ring.inspect(p);
        match view.sequence {
            Some(found) if found == expected => {
                if !view.is_ready() {
                    log::debug!(
                        "sequence {}: predecessor {} still pending",
                        own.sequence,
                        expected
                    );
                    return PairOutcome::NotArrived;
                }
                match ring.try_claim_pair(p, expected) {
                    Claim::Granted => {
                        let record = self.compute(&neighbor_side(&view, expected), own);
                        PairOutcome::Computed(record)
                    }
                    Claim::AlreadyClaimed => PairOutcome::AlreadyClaimed,
                    Claim::Superseded(found) => self.continuity(own.sequence, expected, found),
                }
            }
            // The driver arms `s - 1` before dispatching `s`, so an older sequence
            // here means arming went out of order; it is still a gap, not a wait.
            Some(found) => self.continuity(own.sequence, expected, Some(found)),
            None => {
                log::debug!(
                    "sequence {}: predecessor slot {} never armed, expected {}",
                    own.sequence,
                    p,
                    expected
                );
                PairOutcome::NotArrived
            }
        }
    }

    fn forward(&self, index: usize, own: &PairSide<'_>) -> PairOutcome {
        let expected = own.sequence + 1;
        let ring = &self.state.ring;
        let q = ring.next_index(index);
        let view = ring.inspect(q);
        match view.sequence {
            Some(found) if found == expected => {
                if !view.is_ready() {
                    log::debug!(
                        "sequence {}: successor {} still pending",
                        own.sequence,
                        expected
                    );
                    return PairOutcome::NotArrived;
                }
                match ring.try_claim_pair(index, own.sequence) {
                    Claim::Granted => {
                        let record = self.compute(own, &neighbor_side(&view, expected));
                        PairOutcome::Computed(record)
                    }
                    Claim::AlreadyClaimed => PairOutcome::AlreadyClaimed,
                    // Our own slot cannot move while we hold its lease.
                    Claim::Superseded(found) => self.continuity(own.sequence, own.sequence, found),
                }
            }
            Some(found) if found > expected => self.continuity(own.sequence, expected, Some(found)),
            _ => {
                log::debug!(
                    "sequence {}: successor {} not arrived yet",
                    own.sequence,
                    expected
                );
                PairOutcome::NotArrived
            }
        }
    }

    fn continuity(&self, sequence: u64, expected: u64, found: Option<u64>) -> PairOutcome {
        Counters::bump(&self.state.counters.continuity_warnings);
        log::warn!(
            "continuity mismatch at sequence {}: expected neighbor {} but slot holds {:?}; pair skipped",
            sequence,
            expected,
            found
        );
        PairOutcome::ContinuityMismatch { expected, found }
    }

    /// Match, solve, record, emit and optionally render the pair `(first, second)`.
    fn compute(&self, first: &PairSide<'_>, second: &PairSide<'_>) -> DisplacementRecord {
        let state = self.state;
        let suite = &state.suite;
        let sequence = first.sequence;

        let matches = if !first.features.is_valid() || !second.features.is_valid() {
            log::warn!(
                "pair ({}, {}): no usable descriptors; displacement set to zero",
                sequence,
                second.sequence
            );
            MatchSet::invalid()
        } else {
            match suite
                .matcher
                .match_descriptors(&first.features.descriptors, &second.features.descriptors)
            {
                Ok(matches) => MatchSet::new(matches),
                Err(e) => {
                    log::warn!(
                        "pair ({}, {}): matcher {} failed: {:#}",
                        sequence,
                        second.sequence,
                        suite.matcher.name(),
                        e
                    );
                    MatchSet::invalid()
                }
            }
        };

        let displacement = if !matches.valid {
            None
        } else {
            match suite.solver.solve(
                &matches.matches,
                &first.features.keypoints,
                &second.features.keypoints,
            ) {
                Ok(displacement) => Some(displacement),
                Err(e) => {
                    log::error!(
                        "pair ({}, {}): solver {} failed: {:#}",
                        sequence,
                        second.sequence,
                        suite.solver.name(),
                        e
                    );
                    None
                }
            }
        };
        if displacement.is_none() {
            Counters::bump(&state.counters.degraded_pairs);
            if first.features.is_valid() && second.features.is_valid() && matches.matches.is_empty()
            {
                log::warn!(
                    "pair ({}, {}): no matches; displacement set to zero",
                    sequence,
                    second.sequence
                );
            }
        }

        let record = DisplacementRecord::new(sequence, displacement.unwrap_or(Displacement::ZERO));
        state
            .displacements
            .write(state.ring.index_of(sequence), record);
        Counters::bump(&state.counters.pairs_resolved);
        log::info!(
            "pair ({}, {}): displacement x={:.2} y={:.2} ({} matches)",
            sequence,
            second.sequence,
            record.x,
            record.y,
            matches.matches.len()
        );
        state.sink.emit(&record);

        if state.renderer.is_some() {
            self.render(first, second, &matches);
        }
        record
    }

    fn render(&self, first: &PairSide<'_>, second: &PairSide<'_>, matches: &MatchSet) {
        let Some(renderer) = self.state.renderer.as_ref() else {
            return;
        };
        // Exactly one side carries the resolving unit's frame; re-fetch the other.
        let refetch = |side: &PairSide<'_>| self.state.source.lock().frame_at(side.frame_index);
        let fetched = match (first.frame, second.frame) {
            (Some(_), None) => refetch(second),
            (None, Some(_)) => refetch(first),
            _ => return,
        };
        let neighbor = match fetched {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!(
                    "pair ({}, {}): diagnostics skipped, neighbor frame unavailable: {:#}",
                    first.sequence,
                    second.sequence,
                    e
                );
                return;
            }
        };
        let first_frame = first.frame.unwrap_or(&neighbor);
        let second_frame = second.frame.unwrap_or(&neighbor);
        let view = PairView {
            first_sequence: first.sequence,
            first_frame,
            second_frame,
            first: first.features,
            second: second.features,
            matches,
        };
        if let Err(e) = renderer.render(&view) {
            log::warn!("pair ({}, {}): render failed: {:#}", first.sequence, second.sequence, e);
        }
    }
}

fn neighbor_side(view: &SlotView, sequence: u64) -> PairSide<'_> {
    PairSide {
        sequence,
        frame_index: view.frame_index,
        features: view.features.as_ref(),
        frame: None,
    }
}
