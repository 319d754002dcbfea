use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::background::DEFAULT_BACKGROUND_RATIO;
use crate::detect::SuiteRegistry;
use crate::ingest::SyntheticConfig;
use crate::pipeline::{default_workers, PipelineConfig};
use crate::ring::DEFAULT_RING_CAPACITY;
use crate::sink::SinkTarget;

const DEFAULT_SOURCE: &str = "stub://synthetic";
const DEFAULT_BACKOFF_MS: u64 = 20;
const DEFAULT_SEED_TIMEOUT_MS: u64 = 2000;
const DEFAULT_ALGORITHM: &str = "patch-bf";

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    source: Option<String>,
    ring_capacity: Option<usize>,
    background_ratio: Option<f32>,
    backoff_ms: Option<u64>,
    seed_timeout_ms: Option<u64>,
    workers: Option<usize>,
    queue_depth: Option<usize>,
    algorithm: Option<String>,
    sink: Option<String>,
    diagnostics_dir: Option<PathBuf>,
    synthetic: Option<SyntheticConfig>,
}

/// Settings for one `track_displacement` run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source: String,
    pub ring_capacity: usize,
    pub background_ratio: f32,
    pub backoff: Duration,
    pub seed_timeout: Duration,
    pub workers: usize,
    /// Pending-unit queue length; `None` follows `workers`.
    pub queue_depth: Option<usize>,
    pub algorithm: String,
    pub sink: SinkTarget,
    pub diagnostics_dir: Option<PathBuf>,
    pub synthetic: SyntheticConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            seed_timeout: Duration::from_millis(DEFAULT_SEED_TIMEOUT_MS),
            workers: default_workers(),
            queue_depth: None,
            algorithm: DEFAULT_ALGORITHM.to_string(),
            sink: SinkTarget::Log,
            diagnostics_dir: None,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl PipelineSettings {
    /// Defaults, then the file named by `DISPLACEMENT_CONFIG`, then environment
    /// overrides. Call [`PipelineSettings::validate`] after applying CLI flags.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DISPLACEMENT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: SettingsFile) -> Result<Self> {
        let defaults = Self::default();
        let sink = match file.sink.as_deref() {
            Some(raw) => raw.parse()?,
            None => defaults.sink,
        };
        Ok(Self {
            source: file.source.unwrap_or(defaults.source),
            ring_capacity: file.ring_capacity.unwrap_or(defaults.ring_capacity),
            background_ratio: file.background_ratio.unwrap_or(defaults.background_ratio),
            backoff: file
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            seed_timeout: file
                .seed_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.seed_timeout),
            workers: file.workers.unwrap_or(defaults.workers),
            queue_depth: file.queue_depth,
            algorithm: file.algorithm.unwrap_or(defaults.algorithm),
            sink,
            diagnostics_dir: file.diagnostics_dir,
            synthetic: file.synthetic.unwrap_or(defaults.synthetic),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("DISPLACEMENT_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(capacity) = std::env::var("DISPLACEMENT_RING_CAPACITY") {
            self.ring_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("DISPLACEMENT_RING_CAPACITY must be a positive integer"))?;
        }
        if let Ok(ratio) = std::env::var("DISPLACEMENT_BACKGROUND_RATIO") {
            self.background_ratio = ratio
                .trim()
                .parse()
                .map_err(|_| anyhow!("DISPLACEMENT_BACKGROUND_RATIO must be a number"))?;
        }
        if let Ok(workers) = std::env::var("DISPLACEMENT_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("DISPLACEMENT_WORKERS must be a positive integer"))?;
        }
        if let Ok(algorithm) = std::env::var("DISPLACEMENT_ALGORITHM") {
            if !algorithm.trim().is_empty() {
                self.algorithm = algorithm.trim().to_string();
            }
        }
        if let Ok(sink) = std::env::var("DISPLACEMENT_SINK") {
            if !sink.trim().is_empty() {
                self.sink = sink.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("DISPLACEMENT_DIAGNOSTICS_DIR") {
            if !dir.trim().is_empty() {
                self.diagnostics_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    /// Check the final settings against the scheduler's constraints and the
    /// algorithm registry.
    pub fn validate(&self, registry: &SuiteRegistry) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if !registry.contains(&self.algorithm) {
            return Err(anyhow!(
                "unknown algorithm '{}' (available: {})",
                self.algorithm,
                registry.list().join(", ")
            ));
        }
        self.pipeline_config().validate()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ring_capacity: self.ring_capacity,
            background_ratio: self.background_ratio,
            backoff: self.backoff,
            seed_timeout: self.seed_timeout,
            workers: self.workers,
            queue_depth: self.queue_depth.unwrap_or(self.workers),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SettingsFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
