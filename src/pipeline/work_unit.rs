use crate::background::Background;
use crate::detect::{AlgorithmSuite, Descriptors};
use crate::frame::{Frame, FrameSample};
use crate::resolver::NeighborResolver;
use crate::ring::{SlotFeatures, SlotLease};

use super::state::{Counters, PipelineState};

/// One dispatched frame: detection, description, pairing, background fold.
pub(crate) struct WorkUnit {
    sample: FrameSample,
    lease: SlotLease,
}

impl WorkUnit {
    pub(crate) fn new(sample: FrameSample, lease: SlotLease) -> Self {
        Self { sample, lease }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sample.sequence
    }

    /// Runs to completion unless cancelled at a phase boundary. The lease is
    /// released when `self` drops.
    pub(crate) fn run(self, state: &PipelineState) {
        let sequence = self.sample.sequence;
        if state.cancel.is_cancelled() {
            Counters::bump(&state.counters.cancelled_units);
            log::debug!("sequence {} skipped: run cancelled", sequence);
            return;
        }

        let background = state.background.snapshot();
        let features = extract(&state.suite, &self.sample, &background);
        if state.cancel.is_cancelled() {
            Counters::bump(&state.counters.cancelled_units);
            log::debug!("sequence {} cancelled after detection", sequence);
            return;
        }

        let features = state.ring.publish(&self.lease, features);
        NeighborResolver::new(state).resolve(
            sequence,
            self.lease.index(),
            &features,
            &self.sample.frame,
        );

        if let Err(e) = state.background.update(&self.sample.frame) {
            Counters::bump(&state.counters.background_rejections);
            log::warn!("sequence {} not folded into background: {:#}", sequence, e);
        }
    }
}

/// Detection and description with every failure degraded to an empty feature set.
fn extract(suite: &AlgorithmSuite, sample: &FrameSample, background: &Background) -> SlotFeatures {
    let sequence = sample.sequence;
    let frame: &Frame = &sample.frame;

    let keypoints = match suite.detector.detect(frame, background) {
        Ok(keypoints) => keypoints,
        Err(e) => {
            log::warn!("sequence {}: detector {} failed: {:#}", sequence, suite.detector.name(), e);
            Vec::new()
        }
    };
    if keypoints.is_empty() {
        log::debug!("sequence {}: no keypoints", sequence);
        return SlotFeatures::default();
    }

    let descriptors = match suite.extractor.describe(frame, &keypoints) {
        Ok(descriptors) => descriptors,
        Err(e) => {
            log::warn!(
                "sequence {}: extractor {} failed: {:#}",
                sequence,
                suite.extractor.name(),
                e
            );
            return SlotFeatures::default();
        }
    };
    if descriptors.rows() != keypoints.len() {
        log::warn!(
            "sequence {}: {} descriptor rows for {} keypoints; discarding features",
            sequence,
            descriptors.rows(),
            keypoints.len()
        );
        return SlotFeatures::new(Vec::new(), Descriptors::default());
    }

    log::debug!("sequence {}: {} features", sequence, keypoints.len());
    SlotFeatures::new(keypoints, descriptors)
}
