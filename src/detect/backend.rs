use anyhow::Result;

use crate::background::Background;
use crate::detect::types::{Correspondence, Descriptors, Displacement, Keypoint};
use crate::frame::Frame;

/// Feature detector.
///
/// Implementations are shared by every worker, so `detect` takes `&self` and
/// must be a pure function of the frame and the background snapshot it is given.
/// Errors are not fatal: the pipeline degrades them to an empty keypoint set.
pub trait FeatureDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect keypoints in `frame`, biased by the pre-update `background`.
    fn detect(&self, frame: &Frame, background: &Background) -> Result<Vec<Keypoint>>;
}

/// Descriptor extractor.
pub trait DescriptorExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Describe every keypoint. The result MUST hold exactly one row per keypoint;
    /// zero keypoints yield a zero-row matrix.
    fn describe(&self, frame: &Frame, keypoints: &[Keypoint]) -> Result<Descriptors>;
}

/// Descriptor matcher.
pub trait FeatureMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Match rows of `first` (query) against rows of `second` (train).
    /// An empty result is a valid answer, not an error.
    fn match_descriptors(
        &self,
        first: &Descriptors,
        second: &Descriptors,
    ) -> Result<Vec<Correspondence>>;
}

/// Displacement solver.
pub trait DisplacementSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Estimate the motion from the first keypoint set to the second.
    /// Failure makes the caller substitute a zero displacement.
    fn solve(
        &self,
        matches: &[Correspondence],
        first: &[Keypoint],
        second: &[Keypoint],
    ) -> Result<Displacement>;
}
