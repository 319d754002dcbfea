//! track_displacement - adjacent-frame displacement for a frame stream
//!
//! Reads frames from a synthetic `stub://` scene or an image-sequence directory,
//! runs the pipeline scheduler and prints the final displacement table as JSON.
//! Ctrl-C stops ingestion; work already dispatched drains before exit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use displacement_kernel::config::PipelineSettings;
use displacement_kernel::ingest::source_for;
use displacement_kernel::sink::sink_for;
use displacement_kernel::ui::{self, Ui};
use displacement_kernel::{CancelToken, Pipeline, SuiteRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream id: `stub://<name>` or a directory of images.
    #[arg(long)]
    source: Option<String>,
    /// Number of descriptor ring slots.
    #[arg(long)]
    ring_capacity: Option<usize>,
    /// Background update ratio in (0, 1).
    #[arg(long)]
    background_ratio: Option<f32>,
    /// Worker threads.
    #[arg(long)]
    workers: Option<usize>,
    /// Pending work units (defaults to the worker count).
    #[arg(long)]
    queue_depth: Option<usize>,
    /// Algorithm suite name.
    #[arg(long, short = 'c')]
    algorithm: Option<String>,
    /// Output sink: log, file:<path> or tcp://host:port.
    #[arg(long)]
    sink: Option<String>,
    /// Write correspondence images here (requires the diagnostics feature).
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,
    /// Synthetic source: frames to deliver including the seed (0 = unbounded).
    #[arg(long)]
    frames: Option<u64>,
    /// Synthetic source: horizontal shift per frame.
    #[arg(long, allow_hyphen_values = true)]
    shift_x: Option<i32>,
    /// Synthetic source: vertical shift per frame.
    #[arg(long, allow_hyphen_values = true)]
    shift_y: Option<i32>,
    /// Synthetic source: per-pixel noise amplitude.
    #[arg(long)]
    noise: Option<u8>,
    /// Write the JSON table here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
    /// List algorithm suites and exit.
    #[arg(long)]
    list_algorithms: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let registry = SuiteRegistry::with_builtin();
    if args.list_algorithms {
        for name in registry.list() {
            if let Some(suite) = registry.get(&name) {
                println!("{:<12} {}", name, suite.describe());
            }
        }
        return Ok(());
    }

    let ui = Ui::from_flag(Some(&args.ui), std::io::stderr().is_terminal());

    let settings = {
        let _stage = ui.stage("Load settings");
        let mut settings = PipelineSettings::load()?;
        apply_args(&mut settings, &args)?;
        settings.validate(&registry)?;
        settings
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, draining pipeline...");
        handler_token.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let suite = registry.select(Some(&settings.algorithm))?;
    let source = source_for(&settings.source, &settings.synthetic)?;
    let total = if settings.source.starts_with("stub://") && settings.synthetic.frames > 0 {
        Some(settings.synthetic.frames - 1)
    } else {
        None
    };
    let progress = ui.frames(total);
    let dispatch_progress = progress.clone();

    let mut builder = Pipeline::builder(settings.pipeline_config())
        .suite(suite)
        .sink(sink_for(&settings.sink))
        .cancel_token(cancel)
        .on_dispatch(move |_| dispatch_progress.advance());
    if let Some(dir) = &settings.diagnostics_dir {
        builder = builder.renderer(diagnostics_renderer(dir)?);
    }
    let pipeline = builder.build()?;

    let started = std::time::Instant::now();
    let outcome = pipeline.run(source, &settings.source);
    progress.finish();
    if let Some(reason) = &outcome.abort {
        return Err(anyhow!("{}", reason));
    }

    let report = serde_json::json!({
        "source": settings.source,
        "ring_capacity": settings.ring_capacity,
        "table": outcome.records,
        "stats": outcome.stats,
    });
    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            let _stage = ui.stage("Write displacement table");
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => println!("{}", rendered),
    }

    let stats = &outcome.stats;
    eprintln!(
        "processed {} frames in {}: {} pairs ({} degraded), {} continuity warnings, {} slot overruns, {} sink errors",
        stats.frames_dispatched,
        ui::format_duration(started.elapsed()),
        stats.pairs_resolved,
        stats.degraded_pairs,
        stats.continuity_warnings,
        stats.slot_overruns,
        stats.sink_errors
    );
    Ok(())
}

fn apply_args(settings: &mut PipelineSettings, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        settings.source = source.clone();
    }
    if let Some(capacity) = args.ring_capacity {
        settings.ring_capacity = capacity;
    }
    if let Some(ratio) = args.background_ratio {
        settings.background_ratio = ratio;
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(depth) = args.queue_depth {
        settings.queue_depth = Some(depth);
    }
    if let Some(algorithm) = &args.algorithm {
        settings.algorithm = algorithm.clone();
    }
    if let Some(sink) = &args.sink {
        settings.sink = sink.parse()?;
    }
    if let Some(dir) = &args.diagnostics_dir {
        settings.diagnostics_dir = Some(dir.clone());
    }
    if let Some(frames) = args.frames {
        settings.synthetic.frames = frames;
    }
    if let Some(shift) = args.shift_x {
        settings.synthetic.shift_x = shift;
    }
    if let Some(shift) = args.shift_y {
        settings.synthetic.shift_y = shift;
    }
    if let Some(noise) = args.noise {
        settings.synthetic.noise = noise;
    }
    Ok(())
}

#[cfg(feature = "diagnostics")]
fn diagnostics_renderer(
    dir: &std::path::Path,
) -> Result<Arc<dyn displacement_kernel::DiagnosticRenderer>> {
    let writer = displacement_kernel::render::CorrespondenceImageWriter::new(dir)?;
    log::info!("writing correspondence images to {}", dir.display());
    Ok(Arc::new(writer))
}

#[cfg(not(feature = "diagnostics"))]
fn diagnostics_renderer(
    _dir: &std::path::Path,
) -> Result<Arc<dyn displacement_kernel::DiagnosticRenderer>> {
    Err(anyhow!(
        "diagnostics_dir requires building with the diagnostics feature"
    ))
}
