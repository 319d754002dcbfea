//! Image-sequence frame source.
//!
//! Reads every image file of a local directory in file-name order, one frame per
//! file. Frames are decoded in memory on demand; nothing is cached beyond the
//! file list.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{InputSource, SourceStats};
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pgm", "ppm", "bmp"];

/// Directory-of-images source.
#[derive(Default)]
pub struct ImageSequenceSource {
    /// Decode to RGB instead of luma.
    pub color: bool,
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    stopped: bool,
}

impl ImageSequenceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn load(&self, index: u64) -> Result<Frame> {
        let path = self
            .files
            .get(index as usize)
            .ok_or_else(|| anyhow!("frame {} out of range ({} files)", index, self.files.len()))?;
        let image = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
        let (width, height) = (image.width(), image.height());
        if self.color {
            Frame::new(index, width, height, 3, image.to_rgb8().into_raw())
        } else {
            Frame::new(index, width, height, 1, image.to_luma8().into_raw())
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl InputSource for ImageSequenceSource {
    fn name(&self) -> &'static str {
        "image-sequence"
    }

    fn start(&mut self, id: &str) -> Result<()> {
        let dir = PathBuf::from(id);
        let files = list_images(&dir)?;
        if files.is_empty() {
            return Err(anyhow!("no image files in {}", dir.display()));
        }
        log::info!(
            "ImageSequenceSource: {} frames in {}",
            files.len(),
            dir.display()
        );
        self.dir = dir;
        self.files = files;
        self.next = 0;
        self.stopped = false;
        Ok(())
    }

    fn has_more(&self) -> bool {
        !self.stopped && self.next < self.files.len()
    }

    fn poll_frame(&mut self) -> Result<Option<Frame>> {
        if !self.has_more() {
            return Ok(None);
        }
        let index = self.next as u64;
        // Advance first: an undecodable file is skipped, not retried forever.
        self.next += 1;
        self.load(index).map(Some)
    }

    fn frame_at(&mut self, index: u64) -> Result<Frame> {
        self.load(index)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.next as u64,
            empty_polls: 0,
            id: self.dir.display().to_string(),
        }
    }
}
