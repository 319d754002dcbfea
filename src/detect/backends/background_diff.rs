use anyhow::{anyhow, Result};
use std::ops::Range;

use crate::background::Background;
use crate::detect::backend::FeatureDetector;
use crate::detect::types::Keypoint;
use crate::frame::Frame;

/// Foreground detector on a fixed grid.
///
/// A cell is active when some pixel in it departs from the background by more
/// than `threshold`. Each active cell contributes its strongest corner, scored on
/// the frame alone so the same scene point is picked again after it moves.
#[derive(Clone, Debug)]
pub struct BackgroundDiffDetector {
    /// Minimum absolute luma difference that activates a cell.
    pub threshold: f32,
    /// Minimum corner strength for a keypoint; flat cells yield nothing.
    pub min_corner: f32,
    /// Grid cell edge in pixels.
    pub cell_size: u32,
    /// Pixels excluded along every image edge.
    pub border: u32,
    /// Strongest keypoints kept.
    pub max_keypoints: usize,
}

impl Default for BackgroundDiffDetector {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            min_corner: 10.0,
            cell_size: 16,
            border: 4,
            max_keypoints: 256,
        }
    }
}

impl BackgroundDiffDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell_is_active(
        &self,
        frame: &Frame,
        background: &Background,
        xs: Range<u32>,
        ys: Range<u32>,
    ) -> bool {
        for y in ys {
            for x in xs.clone() {
                if (frame.luma(x, y) - background.luma(x, y)).abs() > self.threshold {
                    return true;
                }
            }
        }
        false
    }

    fn strongest_corner(&self, frame: &Frame, xs: Range<u32>, ys: Range<u32>) -> Option<Keypoint> {
        let mut best: Option<Keypoint> = None;
        for y in ys {
            for x in xs.clone() {
                let strength = corner_strength(frame, x, y);
                if strength > self.min_corner && best.is_none_or(|b| strength > b.response) {
                    best = Some(Keypoint::new(x as f32, y as f32, strength));
                }
            }
        }
        best
    }
}

/// Smaller of the horizontal and vertical luma steps into `(x, y)`. Nonzero
/// only where the image changes along both axes. Needs `x, y >= 1`.
fn corner_strength(frame: &Frame, x: u32, y: u32) -> f32 {
    let here = frame.luma(x, y);
    let step_x = (here - frame.luma(x - 1, y)).abs();
    let step_y = (here - frame.luma(x, y - 1)).abs();
    step_x.min(step_y)
}

impl FeatureDetector for BackgroundDiffDetector {
    fn name(&self) -> &'static str {
        "background-diff"
    }

    fn detect(&self, frame: &Frame, background: &Background) -> Result<Vec<Keypoint>> {
        if !background.matches(frame) {
            return Err(anyhow!(
                "background geometry {}x{} does not match frame {}x{}",
                background.width(),
                background.height(),
                frame.width(),
                frame.height()
            ));
        }
        if self.cell_size == 0 {
            return Err(anyhow!("cell_size must be > 0"));
        }
        let (w, h) = (frame.width(), frame.height());
        let margin = self.border.max(1);
        if w <= 2 * margin || h <= 2 * margin {
            return Ok(Vec::new());
        }

        let mut keypoints = Vec::new();
        let mut cell_y = margin;
        while cell_y < h - margin {
            let cell_bottom = (cell_y + self.cell_size).min(h - margin);
            let mut cell_x = margin;
            while cell_x < w - margin {
                let cell_right = (cell_x + self.cell_size).min(w - margin);
                let (xs, ys) = (cell_x..cell_right, cell_y..cell_bottom);
                if self.cell_is_active(frame, background, xs.clone(), ys.clone()) {
                    keypoints.extend(self.strongest_corner(frame, xs, ys));
                }
                cell_x = cell_right;
            }
            cell_y = cell_bottom;
        }

        keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
        keypoints.truncate(self.max_keypoints);
        Ok(keypoints)
    }
}
