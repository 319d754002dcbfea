use anyhow::{anyhow, Result};

use crate::detect::backend::DisplacementSolver;
use crate::detect::types::{Correspondence, Displacement, Keypoint};

/// Per-axis median of the keypoint offsets of all correspondences.
#[derive(Clone, Debug)]
pub struct MedianShiftSolver {
    pub min_matches: usize,
}

impl Default for MedianShiftSolver {
    fn default() -> Self {
        Self { min_matches: 3 }
    }
}

impl MedianShiftSolver {
    pub fn new(min_matches: usize) -> Self {
        Self { min_matches }
    }
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl DisplacementSolver for MedianShiftSolver {
    fn name(&self) -> &'static str {
        "median-shift"
    }

    fn solve(
        &self,
        matches: &[Correspondence],
        first: &[Keypoint],
        second: &[Keypoint],
    ) -> Result<Displacement> {
        if matches.is_empty() || matches.len() < self.min_matches {
            return Err(anyhow!(
                "{} matches, need at least {}",
                matches.len(),
                self.min_matches.max(1)
            ));
        }
        let mut dx = Vec::with_capacity(matches.len());
        let mut dy = Vec::with_capacity(matches.len());
        for m in matches {
            let (Some(a), Some(b)) = (first.get(m.query), second.get(m.train)) else {
                return Err(anyhow!(
                    "correspondence ({}, {}) out of range",
                    m.query,
                    m.train
                ));
            };
            dx.push(b.x - a.x);
            dy.push(b.y - a.y);
        }
        Ok(Displacement::new(median(&mut dx), median(&mut dy)))
    }
}
