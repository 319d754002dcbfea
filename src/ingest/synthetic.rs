//! Synthetic frame source (`stub://`).
//!
//! Renders a deterministic block-textured scene translated by a fixed shift per
//! frame, so every adjacent pair has a known ground-truth displacement. Optional
//! per-frame noise is seeded by the frame index, which keeps `frame_at` exact.
//! `stall_every` makes every k-th poll report "no frame yet" to exercise the
//! driver's backoff path.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{InputSource, SourceStats};
use crate::frame::Frame;

const BLOCK: i64 = 8;

/// Configuration for the synthetic source.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Frames to deliver, including the background seed. 0 = unbounded.
    pub frames: u64,
    /// Scene translation between consecutive frames, in pixels.
    pub shift_x: i32,
    pub shift_y: i32,
    /// Maximum absolute per-pixel noise.
    pub noise: u8,
    pub seed: u64,
    /// Every k-th poll returns no frame. 0 = never.
    pub stall_every: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            frames: 100,
            shift_x: 3,
            shift_y: 0,
            noise: 0,
            seed: 7,
            stall_every: 0,
        }
    }
}

/// Synthetic frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    id: String,
    started: bool,
    stopped: bool,
    delivered: u64,
    polls: u64,
    empty_polls: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            id: String::new(),
            started: false,
            stopped: false,
            delivered: 0,
            polls: 0,
            empty_polls: 0,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn exhausted(&self) -> bool {
        self.config.frames != 0 && self.delivered >= self.config.frames
    }

    /// Render frame `index` of the sequence.
    pub fn render(&self, index: u64) -> Result<Frame> {
        let SyntheticConfig {
            width,
            height,
            shift_x,
            shift_y,
            noise,
            seed,
            ..
        } = self.config;
        let offset_x = shift_x as i64 * index as i64;
        let offset_y = shift_y as i64 * index as i64;
        let mut rng = (noise > 0).then(|| StdRng::seed_from_u64(seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15)));

        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let mut value = scene_value(seed, x - offset_x, y - offset_y) as i32;
                if let Some(rng) = rng.as_mut() {
                    value += rng.gen_range(-(noise as i32)..=noise as i32);
                }
                data.push(value.clamp(0, 255) as u8);
            }
        }
        Frame::from_luma(index, width, height, data)
    }
}

/// Block texture: every 8x8 world block gets a pseudo-random level in 40..=215.
fn scene_value(seed: u64, u: i64, v: i64) -> u8 {
    let bx = u.div_euclid(BLOCK) as u64;
    let by = v.div_euclid(BLOCK) as u64;
    let mut h = seed ^ bx.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ by.wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    40 + (h % 176) as u8
}

impl InputSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn start(&mut self, id: &str) -> Result<()> {
        if !id.starts_with("stub://") {
            return Err(anyhow!("synthetic source requires a stub:// id, got '{}'", id));
        }
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic frame dimensions must be non-zero"));
        }
        self.id = id.to_string();
        self.started = true;
        self.stopped = false;
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, shift=({}, {}))",
            id,
            self.config.width,
            self.config.height,
            self.config.shift_x,
            self.config.shift_y
        );
        Ok(())
    }

    fn has_more(&self) -> bool {
        self.started && !self.stopped && !self.exhausted()
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        if !self.started || self.stopped {
            return Err(anyhow!("synthetic source is not running"));
        }
        if self.exhausted() {
            return Ok(None);
        }
        self.polls += 1;
        if self.config.stall_every > 0 && self.polls % self.config.stall_every as u64 == 0 {
            self.empty_polls += 1;
            return Ok(None);
        }
        let frame = self.render(self.delivered)?;
        self.delivered += 1;
        Ok(Some(frame))
    }

    fn frame_at(&mut self, index: u64) -> Result<Frame> {
        if index >= self.delivered {
            return Err(anyhow!(
                "frame {} has not been delivered yet ({} delivered)",
                index,
                self.delivered
            ));
        }
        self.render(index)
    }

    fn stop(&mut self) {
        if self.started && !self.stopped {
            log::info!(
                "SyntheticSource: stopped {} after {} frames",
                self.id,
                self.delivered
            );
        }
        self.stopped = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.delivered,
            empty_polls: self.empty_polls,
            id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(config: SyntheticConfig) -> SyntheticSource {
        let mut source = SyntheticSource::new(config);
        source.start("stub://test").unwrap();
        source
    }

    #[test]
    fn consecutive_frames_are_shifted_copies() {
        let mut source = started(SyntheticConfig {
            width: 40,
            height: 20,
            shift_x: 3,
            shift_y: 1,
            ..SyntheticConfig::default()
        });
        let a = source.poll_frame().unwrap().unwrap();
        let b = source.poll_frame().unwrap().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        for y in 0..19 {
            for x in 0..37 {
                assert_eq!(a.sample(x, y, 0), b.sample(x + 3, y + 1, 0));
            }
        }
    }

    #[test]
    fn delivers_configured_frame_count() {
        let mut source = started(SyntheticConfig {
            frames: 3,
            ..SyntheticConfig::default()
        });
        let mut delivered = 0;
        while source.has_more() {
            if source.poll_frame().unwrap().is_some() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 3);
        assert!(source.poll_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_delivered, 3);
    }

    #[test]
    fn stalls_report_no_frame_without_consuming() {
        let mut source = started(SyntheticConfig {
            frames: 4,
            stall_every: 2,
            ..SyntheticConfig::default()
        });
        assert!(source.poll_frame().unwrap().is_some());
        assert!(source.poll_frame().unwrap().is_none());
        let next = source.poll_frame().unwrap().unwrap();
        assert_eq!(next.index(), 1);
        assert_eq!(source.stats().empty_polls, 1);
    }

    #[test]
    fn frame_at_regenerates_noisy_frames_exactly() {
        let mut source = started(SyntheticConfig {
            noise: 12,
            ..SyntheticConfig::default()
        });
        let first = source.poll_frame().unwrap().unwrap();
        let again = source.frame_at(0).unwrap();
        assert_eq!(first.pixels(), again.pixels());
        assert!(source.frame_at(5).is_err());
    }

    #[test]
    fn start_requires_stub_scheme_and_stop_ends_stream() {
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        assert!(source.poll_frame().is_err());
        assert!(source.start("/tmp/frames").is_err());
        source.start("stub://ok").unwrap();
        assert!(source.has_more());
        source.stop();
        assert!(!source.has_more());
    }
}
