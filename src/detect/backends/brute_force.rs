use anyhow::{anyhow, Result};

use crate::detect::backend::FeatureMatcher;
use crate::detect::types::{Correspondence, Descriptors};

/// Exhaustive nearest-neighbour matcher on L2 distance.
///
/// Rows with no energy (flat patches) never take part: they sit at the same
/// distance from everything and would pair arbitrarily.
#[derive(Clone, Debug)]
pub struct BruteForceMatcher {
    /// Matches farther apart than this are dropped.
    pub max_distance: f32,
    /// Nearest must beat `ratio` times the second nearest.
    pub ratio: f32,
    /// Keep only mutual nearest neighbours.
    pub cross_check: bool,
}

const DEFAULT_RATIO: f32 = 0.75;
const FLAT_ROW: f32 = 1e-6;

impl Default for BruteForceMatcher {
    fn default() -> Self {
        Self {
            max_distance: 0.5,
            ratio: DEFAULT_RATIO,
            cross_check: false,
        }
    }
}

impl BruteForceMatcher {
    pub fn new(max_distance: f32, cross_check: bool) -> Self {
        Self {
            max_distance,
            ratio: DEFAULT_RATIO,
            cross_check,
        }
    }

    /// Ratio of 1.0 or more disables the ambiguity check.
    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn is_flat(row: &[f32]) -> bool {
    row.iter().map(|v| v * v).sum::<f32>().sqrt() <= FLAT_ROW
}

/// Nearest and second-nearest non-flat candidate.
fn two_nearest(row: &[f32], candidates: &Descriptors) -> (Option<(usize, f32)>, Option<f32>) {
    let mut best: Option<(usize, f32)> = None;
    let mut second: Option<f32> = None;
    for (i, candidate) in candidates.iter_rows().enumerate() {
        if is_flat(candidate) {
            continue;
        }
        let distance = l2(row, candidate);
        match best {
            Some((_, d)) if distance >= d => {
                if second.is_none_or(|s| distance < s) {
                    second = Some(distance);
                }
            }
            _ => {
                second = best.map(|(_, d)| d);
                best = Some((i, distance));
            }
        }
    }
    (best, second)
}

impl FeatureMatcher for BruteForceMatcher {
    fn name(&self) -> &'static str {
        if self.cross_check {
            "brute-force-cross"
        } else {
            "brute-force"
        }
    }

    fn match_descriptors(
        &self,
        first: &Descriptors,
        second: &Descriptors,
    ) -> Result<Vec<Correspondence>> {
        if !first.is_empty() && !second.is_empty() && first.dim() != second.dim() {
            return Err(anyhow!(
                "descriptor dimensions differ ({} vs {})",
                first.dim(),
                second.dim()
            ));
        }

        let mut matches = Vec::new();
        for (query, row) in first.iter_rows().enumerate() {
            if is_flat(row) {
                continue;
            }
            let (Some((train, distance)), runner_up) = two_nearest(row, second) else {
                break;
            };
            if distance > self.max_distance {
                continue;
            }
            if runner_up.is_some_and(|next| distance >= self.ratio * next) {
                continue;
            }
            if self.cross_check {
                let back = two_nearest(second.row(train), first).0.map(|(i, _)| i);
                if back != Some(query) {
                    continue;
                }
            }
            matches.push(Correspondence::new(query, train, distance));
        }
        Ok(matches)
    }
}
