//! Frame ingestion sources.
//!
//! This module provides the sources the driver pulls frames from:
//! - Synthetic `stub://` scenes (testing, demos)
//! - Local image-sequence directories (feature: image-io)
//!
//! Sources are polled without blocking. `poll_frame` distinguishes "no frame yet"
//! (`Ok(None)`) from a failed fetch (`Err`); the driver retries both after a backoff.
//! Every delivered frame carries the source's own delivery index, which is what
//! `frame_at` takes to regenerate or reload it later.

#[cfg(feature = "image-io")]
pub mod sequence;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "image-io")]
pub use sequence::ImageSequenceSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Input source contract consumed by the driver.
pub trait InputSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &'static str;

    /// Open the stream identified by `id`.
    fn start(&mut self, id: &str) -> Result<()>;

    /// True while the stream may still deliver frames.
    fn has_more(&self) -> bool;

    /// Next frame, `Ok(None)` if none is available yet.
    fn poll_frame(&mut self) -> Result<Option<Frame>>;

    /// Frame previously delivered with delivery index `index`.
    fn frame_at(&mut self, index: u64) -> Result<Frame>;

    /// Close the stream. Idempotent.
    fn stop(&mut self);

    /// Statistics for health logging.
    fn stats(&self) -> SourceStats;
}

/// Statistics for an input source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_delivered: u64,
    pub empty_polls: u64,
    pub id: String,
}

/// Build the source matching `id`: `stub://...` selects the synthetic source,
/// a local path selects the image-sequence source.
pub fn source_for(id: &str, synthetic: &SyntheticConfig) -> Result<Box<dyn InputSource>> {
    if id.trim().is_empty() {
        return Err(anyhow!("source id must not be empty"));
    }
    if id.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(synthetic.clone())));
    }
    if id.contains("://") {
        return Err(anyhow!(
            "unsupported source '{}': only stub:// and local paths are supported",
            id
        ));
    }
    #[cfg(feature = "image-io")]
    {
        Ok(Box::new(ImageSequenceSource::new()))
    }
    #[cfg(not(feature = "image-io"))]
    {
        Err(anyhow!(
            "image sequence ingestion requires the image-io feature"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_synthetic_source_for_stub_ids() {
        let source = source_for("stub://demo", &SyntheticConfig::default()).unwrap();
        assert_eq!(source.name(), "synthetic");
    }

    #[test]
    fn rejects_remote_and_empty_ids() {
        assert!(source_for("rtsp://camera/stream", &SyntheticConfig::default()).is_err());
        assert!(source_for("  ", &SyntheticConfig::default()).is_err());
    }
}
