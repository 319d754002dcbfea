//! Diagnostic correspondence rendering.
//!
//! When diagnostics are enabled, every resolved pair is handed to a
//! [`DiagnosticRenderer`] together with both frames, both slots' features and the
//! match set. The bundled renderer (feature `diagnostics`) writes a side-by-side
//! PNG per pair with a line for every correspondence.

use anyhow::Result;

use crate::detect::MatchSet;
use crate::frame::Frame;
use crate::ring::SlotFeatures;

/// Everything known about one resolved pair `(first_sequence, first_sequence + 1)`.
pub struct PairView<'a> {
    pub first_sequence: u64,
    pub first_frame: &'a Frame,
    pub second_frame: &'a Frame,
    pub first: &'a SlotFeatures,
    pub second: &'a SlotFeatures,
    pub matches: &'a MatchSet,
}

pub trait DiagnosticRenderer: Send + Sync {
    fn render(&self, pair: &PairView<'_>) -> Result<()>;
}

#[cfg(feature = "diagnostics")]
pub use image_writer::CorrespondenceImageWriter;

#[cfg(feature = "diagnostics")]
mod image_writer {
    use super::{DiagnosticRenderer, PairView};
    use crate::frame::Frame;
    use anyhow::{Context, Result};
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    const KEYPOINT: Rgb<u8> = Rgb([255, 64, 64]);
    const MATCH: Rgb<u8> = Rgb([64, 255, 64]);

    /// Writes `correspondence_frame_<seq>.png` files into a directory.
    pub struct CorrespondenceImageWriter {
        dir: PathBuf,
    }

    impl CorrespondenceImageWriter {
        /// Creates `dir` if needed.
        pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
            let dir = dir.into();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Ok(Self { dir })
        }

        pub fn path_for(&self, sequence: u64) -> PathBuf {
            self.dir
                .join(format!("correspondence_frame_{:06}.png", sequence))
        }
    }

    impl DiagnosticRenderer for CorrespondenceImageWriter {
        fn render(&self, pair: &PairView<'_>) -> Result<()> {
            let left_width = pair.first_frame.width();
            let width = left_width + pair.second_frame.width();
            let height = pair.first_frame.height().max(pair.second_frame.height());
            let mut canvas = RgbImage::new(width, height);
            blit(&mut canvas, pair.first_frame, 0);
            blit(&mut canvas, pair.second_frame, left_width);

            for kp in &pair.first.keypoints {
                mark(&mut canvas, kp.x as i64, kp.y as i64);
            }
            for kp in &pair.second.keypoints {
                mark(&mut canvas, kp.x as i64 + left_width as i64, kp.y as i64);
            }
            for m in &pair.matches.matches {
                let (Some(a), Some(b)) = (
                    pair.first.keypoints.get(m.query),
                    pair.second.keypoints.get(m.train),
                ) else {
                    continue;
                };
                line(
                    &mut canvas,
                    (a.x as i64, a.y as i64),
                    (b.x as i64 + left_width as i64, b.y as i64),
                );
            }

            let path = self.path_for(pair.first_sequence);
            canvas
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::debug!("wrote {}", path.display());
            Ok(())
        }
    }

    fn blit(canvas: &mut RgbImage, frame: &Frame, x_offset: u32) {
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let pixel = if frame.channels() == 3 {
                    Rgb([
                        frame.sample(x, y, 0),
                        frame.sample(x, y, 1),
                        frame.sample(x, y, 2),
                    ])
                } else {
                    let v = frame.sample(x, y, 0);
                    Rgb([v, v, v])
                };
                canvas.put_pixel(x + x_offset, y, pixel);
            }
        }
    }

    fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }

    fn mark(canvas: &mut RgbImage, x: i64, y: i64) {
        for d in -2..=2 {
            put(canvas, x + d, y, KEYPOINT);
            put(canvas, x, y + d, KEYPOINT);
        }
    }

    // Bresenham.
    fn line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64)) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            put(canvas, x, y, MATCH);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

}
