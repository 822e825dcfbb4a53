//! Frame ingestion sources.
//!
//! This module provides sources of paired color + depth frames:
//! - Synthetic scenes (`stub://<name>`) for tests and demos
//! - Recorded playback from a local directory of PNG pairs
//!
//! Every source follows the same lifecycle:
//! 1. Report the device it stands for (`device_info`)
//! 2. Start streaming with a resolved `StreamPlan`
//! 3. Block in `wait_for_paired_frame` until a color and a depth frame exist for the
//!    same instant
//!
//! A source that gets only one half of a pair reports `Acquired::Unavailable`; the
//! caller skips that iteration.

pub mod playback;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::device::{DeviceInfo, StreamPlan, StreamSettings};
use crate::frame::PairedFrame;

pub use playback::{record_device_info, record_pair, PlaybackSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Outcome of one blocking wait.
#[derive(Debug)]
pub enum Acquired {
    Pair(PairedFrame),
    /// Color or depth was missing for this instant.
    Unavailable,
    /// The source has no more frames.
    Finished,
}

/// Source of paired frames.
pub trait FrameSource: Send {
    /// Device this source reads from.
    fn device_info(&self) -> &DeviceInfo;

    /// Start streaming with the given profiles.
    fn start(&mut self, plan: &StreamPlan) -> Result<()>;

    /// Block until the next pair (or a reason there is none).
    fn wait_for_paired_frame(&mut self) -> Result<Acquired>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_delivered: u64,
    pub frames_unavailable: u64,
    pub uri: String,
}

/// Open the source named by `settings.uri`.
///
/// `stub://` URIs select the synthetic scene; anything without a scheme is a
/// playback directory.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("source uri must not be empty"));
    }
    if let Some(name) = uri.strip_prefix("stub://") {
        let config = SyntheticConfig::from_settings(name, settings);
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "unsupported source uri {} (expected stub://<name> or a local directory)",
            uri
        ));
    }
    Ok(Box::new(PlaybackSource::open(uri, settings.depth_scale)?))
}

/// Resolve the stream plan for the source's device and start it.
pub fn start_source(source: &mut dyn FrameSource, streams: &StreamSettings) -> Result<StreamPlan> {
    let device = source.device_info().clone();
    let plan = streams.resolve(&device)?;
    log::info!(
        "device {} (product line {}): depth {} color {}{}",
        device.name,
        device.product_line,
        plan.depth.resolution,
        plan.color.resolution,
        if plan.needs_resize() {
            ", color resized to depth for detection"
        } else {
            ""
        }
    );
    source.start(&plan)?;
    Ok(plan)
}
