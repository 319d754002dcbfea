use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::{DescriptorExtractor, DisplacementSolver, FeatureDetector, FeatureMatcher};
use super::backends::{BackgroundDiffDetector, BruteForceMatcher, MedianShiftSolver, PatchDescriptor};

/// The four vision collaborators one pipeline run uses.
#[derive(Clone)]
pub struct AlgorithmSuite {
    pub detector: Arc<dyn FeatureDetector>,
    pub extractor: Arc<dyn DescriptorExtractor>,
    pub matcher: Arc<dyn FeatureMatcher>,
    pub solver: Arc<dyn DisplacementSolver>,
}

impl AlgorithmSuite {
    pub fn new(
        detector: impl FeatureDetector + 'static,
        extractor: impl DescriptorExtractor + 'static,
        matcher: impl FeatureMatcher + 'static,
        solver: impl DisplacementSolver + 'static,
    ) -> Self {
        Self {
            detector: Arc::new(detector),
            extractor: Arc::new(extractor),
            matcher: Arc::new(matcher),
            solver: Arc::new(solver),
        }
    }

    /// Background-difference detector, patch descriptor, brute-force matcher, median solver.
    pub fn patch_brute_force() -> Self {
        Self::new(
            BackgroundDiffDetector::default(),
            PatchDescriptor::default(),
            BruteForceMatcher::default(),
            MedianShiftSolver::default(),
        )
    }

    /// Same as [`AlgorithmSuite::patch_brute_force`] with cross-checked matching.
    pub fn patch_cross_checked() -> Self {
        Self::new(
            BackgroundDiffDetector::default(),
            PatchDescriptor::default(),
            BruteForceMatcher::new(0.5, true),
            MedianShiftSolver::default(),
        )
    }

    /// `detector+extractor+matcher+solver` backend names.
    pub fn describe(&self) -> String {
        format!(
            "{}+{}+{}+{}",
            self.detector.name(),
            self.extractor.name(),
            self.matcher.name(),
            self.solver.name()
        )
    }
}

/// Named algorithm suites, selectable from configuration.
pub struct SuiteRegistry {
    suites: BTreeMap<String, AlgorithmSuite>,
    default_name: Option<String>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self {
            suites: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry holding the built-in suites; `patch-bf` is the default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("patch-bf", AlgorithmSuite::patch_brute_force());
        registry.register("patch-cross", AlgorithmSuite::patch_cross_checked());
        registry
    }

    /// Register a suite. The first registered suite becomes the default.
    pub fn register(&mut self, name: &str, suite: AlgorithmSuite) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.suites.insert(name.to_string(), suite);
    }

    /// Set default suite by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.suites.contains_key(name) {
            return Err(anyhow!("algorithm suite '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<AlgorithmSuite> {
        self.suites.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.suites.contains_key(name)
    }

    pub fn default_suite(&self) -> Option<AlgorithmSuite> {
        self.default_name.as_deref().and_then(|name| self.get(name))
    }

    /// Suite by name, or the default suite when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<AlgorithmSuite> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "unknown algorithm suite '{}' (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_suite()
                .ok_or_else(|| anyhow!("no algorithm suite registered")),
        }
    }

    /// Registered suite names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.suites.keys().cloned().collect()
    }
}

impl Default for SuiteRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
