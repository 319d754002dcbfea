//! Frame buffers.
//!
//! - `Frame`: Immutable image buffer produced by an input source.
//! - `FrameSample`: A frame plus the sequence number the driver assigned to it.
//!
//! Frames are deliberately not `Clone`: a sample is owned by exactly one work unit
//! until it has been folded into the background model, then dropped. Sources that
//! need a frame again (diagnostics) regenerate it through `InputSource::frame_at`.

use anyhow::{anyhow, Result};
use std::fmt;

/// Immutable image buffer, row-major, interleaved channels.
pub struct Frame {
    /// Source-local delivery index (0 = first frame the source ever produced).
    index: u64,
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Frame {
    /// Create a frame. `channels` must be 1 (luma) or 3 (RGB).
    pub fn new(index: u64, width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if channels != 1 && channels != 3 {
            return Err(anyhow!("unsupported channel count {}", channels));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, expected {} for {}x{}x{}",
                data.len(),
                expected,
                width,
                height,
                channels
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            channels,
            data,
        })
    }

    /// Single-channel frame.
    pub fn from_luma(index: u64, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(index, width, height, 1, data)
    }

    /// Single-channel frame filled with one value.
    pub fn filled(index: u64, width: u32, height: u32, value: u8) -> Self {
        Self {
            index,
            width,
            height,
            channels: 1,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn index(&self) -> u64 {
        self.index
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

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Raw sample at `(x, y)` in channel `c`.
    pub fn sample(&self, x: u32, y: u32, c: u8) -> u8 {
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        self.data[offset + c as usize]
    }

    /// Luma at `(x, y)` (BT.601 weights for RGB frames).
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        luma_of(&self.data, self.width, self.channels, x, y)
    }

    pub fn same_geometry(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }
}

// Pixel content is never logged; only geometry.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish()
    }
}

pub(crate) fn luma_of<T: Copy + Into<f32>>(
    data: &[T],
    width: u32,
    channels: u8,
    x: u32,
    y: u32,
) -> f32 {
    let offset = (y as usize * width as usize + x as usize) * channels as usize;
    if channels == 1 {
        data[offset].into()
    } else {
        0.299 * data[offset].into() + 0.587 * data[offset + 1].into() + 0.114 * data[offset + 2].into()
    }
}

/// A frame together with the sequence number assigned by the driver.
#[derive(Debug)]
pub struct FrameSample {
    pub sequence: u64,
    pub frame: Frame,
}

impl FrameSample {
    pub fn new(sequence: u64, frame: Frame) -> Self {
        Self { sequence, frame }
    }
}
