mod backend;
mod backends;
mod registry;
mod types;

pub use backend::{DescriptorExtractor, DisplacementSolver, FeatureDetector, FeatureMatcher};
pub use backends::{BackgroundDiffDetector, BruteForceMatcher, MedianShiftSolver, PatchDescriptor};
pub use registry::{AlgorithmSuite, SuiteRegistry};
pub use types::{Correspondence, Descriptors, Displacement, Keypoint, MatchSet};
