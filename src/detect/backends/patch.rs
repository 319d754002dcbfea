use anyhow::Result;

use crate::detect::backend::DescriptorExtractor;
use crate::detect::types::{Descriptors, Keypoint};
use crate::frame::Frame;

/// Square luma patch around each keypoint, mean-subtracted and L2-normalized.
///
/// Samples outside the image are clamped to the nearest edge pixel, so every
/// keypoint gets a row. A flat patch stays all zeros.
#[derive(Clone, Debug)]
pub struct PatchDescriptor {
    pub radius: u32,
}

impl Default for PatchDescriptor {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

impl PatchDescriptor {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    pub fn dim(&self) -> usize {
        let side = 2 * self.radius as usize + 1;
        side * side
    }
}

impl DescriptorExtractor for PatchDescriptor {
    fn name(&self) -> &'static str {
        "patch"
    }

    fn describe(&self, frame: &Frame, keypoints: &[Keypoint]) -> Result<Descriptors> {
        let mut descriptors = Descriptors::new(self.dim());
        let r = self.radius as i64;
        let max_x = frame.width() as i64 - 1;
        let max_y = frame.height() as i64 - 1;
        let mut row = Vec::with_capacity(self.dim());

        for kp in keypoints {
            row.clear();
            let (cx, cy) = (kp.x.round() as i64, kp.y.round() as i64);
            for dy in -r..=r {
                for dx in -r..=r {
                    let x = (cx + dx).clamp(0, max_x) as u32;
                    let y = (cy + dy).clamp(0, max_y) as u32;
                    row.push(frame.luma(x, y));
                }
            }
            let mean = row.iter().sum::<f32>() / row.len() as f32;
            row.iter_mut().for_each(|v| *v -= mean);
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                row.iter_mut().for_each(|v| *v /= norm);
            }
            descriptors.push_row(&row)?;
        }
        Ok(descriptors)
    }
}
