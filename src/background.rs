//! Background model.
//!
//! A single shared `f32` image holding an exponential moving average of every
//! folded frame: `background = ratio * background + (1 - ratio) * frame`.
//!
//! Folds are serialized by one lock. Readers take a copy-on-write snapshot
//! (`Arc<Background>`), so a work unit always detects against the background as
//! it was *before* its own frame is folded, and never blocks on a fold in progress.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::frame::{luma_of, Frame};

/// Default decay applied to the previous background on every fold.
pub const DEFAULT_BACKGROUND_RATIO: f32 = 0.96;

/// Background image with the geometry of the input frames.
#[derive(Clone, Debug)]
pub struct Background {
    width: u32,
    height: u32,
    channels: u8,
    values: Vec<f32>,
}

impl Background {
    /// Background initialized from a seed frame.
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            channels: frame.channels(),
            values: frame.pixels().iter().map(|&p| p as f32).collect(),
        }
    }

    /// Background with every sample set to `value`.
    pub fn uniform(width: u32, height: u32, channels: u8, value: f32) -> Self {
        Self {
            width,
            height,
            channels,
            values: vec![value; width as usize * height as usize * channels as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn value(&self, x: u32, y: u32, c: u8) -> f32 {
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        self.values[offset + c as usize]
    }

    pub fn luma(&self, x: u32, y: u32) -> f32 {
        luma_of(&self.values, self.width, self.channels, x, y)
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        self.width == frame.width()
            && self.height == frame.height()
            && self.channels == frame.channels()
    }

    /// Fold `frame` into the background in place, per channel, per pixel.
    pub fn fold(&mut self, frame: &Frame, ratio: f32) -> Result<()> {
        if !self.matches(frame) {
            return Err(anyhow!(
                "frame {}x{}x{} does not match background {}x{}x{}",
                frame.width(),
                frame.height(),
                frame.channels(),
                self.width,
                self.height,
                self.channels
            ));
        }
        let keep = ratio;
        let take = 1.0 - ratio;
        for (bg, &px) in self.values.iter_mut().zip(frame.pixels()) {
            *bg = keep * *bg + take * px as f32;
        }
        Ok(())
    }
}

/// Process-wide background shared by every work unit of one run.
pub struct BackgroundModel {
    current: Mutex<Arc<Background>>,
    ratio: f32,
}

impl BackgroundModel {
    pub fn new(background: Background, ratio: f32) -> Self {
        Self {
            current: Mutex::new(Arc::new(background)),
            ratio,
        }
    }

    /// Model seeded with the first frame of the stream.
    pub fn seeded(frame: &Frame, ratio: f32) -> Self {
        Self::new(Background::from_frame(frame), ratio)
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Current background. Later folds do not affect the returned snapshot.
    pub fn snapshot(&self) -> Arc<Background> {
        Arc::clone(&self.current.lock())
    }

    /// Fold a frame into the shared background.
    ///
    /// Clones the buffer only when a snapshot of the current version is still alive.
    pub fn update(&self, frame: &Frame) -> Result<()> {
        let mut current = self.current.lock();
        Arc::make_mut(&mut current).fold(frame, self.ratio)
    }
}
