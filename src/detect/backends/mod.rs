pub mod background_diff;
pub mod brute_force;
pub mod median;
pub mod patch;

pub use background_diff::BackgroundDiffDetector;
pub use brute_force::BruteForceMatcher;
pub use median::MedianShiftSolver;
pub use patch::PatchDescriptor;
