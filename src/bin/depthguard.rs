//! depthguard - depth-aware proximity stop signal
//!
//! This binary:
//! 1. Loads configuration (file named by DEPTHGUARD_CONFIG, then env overrides)
//! 2. Opens the frame source and resolves stream profiles for its device
//! 3. Runs the detector on every paired frame and samples depth at the primary centroid
//! 4. Sends each decision to the configured sink (log or MQTT)
//! 5. Stops on Ctrl-C, end of a recording, or --max-frames

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use depth_guard::config::PipelineMode;
use depth_guard::ingest::{self, record_device_info, record_pair};
use depth_guard::{DepthGuardConfig, Pipeline, PipelineStats, ProximityThreshold};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Warn when the detected object is closer than a distance threshold"
)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "DEPTHGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the stop distance in meters.
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the source URI (stub://<name> or a recording directory).
    #[arg(long)]
    source: Option<String>,

    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Record every processed pair into this directory for playback.
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Capture on a separate thread, always processing the newest pair.
    #[arg(long)]
    threaded: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = DepthGuardConfig::load_from(args.config.as_deref())?;
    if let Some(meters) = args.threshold {
        config.threshold = ProximityThreshold::new(meters)?;
    }
    if let Some(uri) = args.source {
        config.source.uri = uri;
    }
    if args.threaded {
        config.pipeline.mode = PipelineMode::Threaded;
    }

    let mut source = ingest::open_source(&config.source)?;
    ingest::start_source(source.as_mut(), &config.streams)?;
    if let Some(dir) = &args.record_dir {
        record_device_info(dir, source.device_info())?;
        log::info!("recording processed pairs to {}", dir.display());
    }

    let detector = config.detector.build()?;
    let sink = config.sink.build()?;
    let mut pipeline = Pipeline::new(detector, sink, config.threshold)
        .with_health_log_interval(config.pipeline.health_log_interval);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "depthguard running. source={} threshold={:.2}m mode={:?}",
        config.source.uri,
        pipeline.threshold().meters(),
        config.pipeline.mode
    );

    let record_dir = args.record_dir.clone();
    let observer = move |pair: &depth_guard::PairedFrame, report: &depth_guard::FrameReport| {
        for (detection, item) in report.detections.iter().zip(&report.overlay) {
            log::debug!("frame {} {} label {:?}", report.sequence, detection, item.label);
        }
        match &record_dir {
            Some(dir) => record_pair(dir, pair),
            None => Ok(()),
        }
    };

    let stats = match config.pipeline.mode {
        PipelineMode::Sequential => {
            pipeline.run_with(source.as_mut(), &shutdown, args.max_frames, observer)?
        }
        PipelineMode::Threaded => {
            pipeline.run_threaded_with(source, Arc::clone(&shutdown), args.max_frames, observer)?
        }
    };
    log_summary(&stats);
    Ok(())
}

fn log_summary(stats: &PipelineStats) {
    log::info!(
        "depthguard stopped. processed={} skipped={} superseded={} warnings={} source={}",
        stats.frames_processed,
        stats.frames_skipped,
        stats.superseded,
        stats.warnings,
        stats.source.uri
    );
}
