//! Per-frame processing loop.
//!
//! One iteration: wait for a paired frame, match color to depth resolution, detect,
//! take the primary centroid, sample depth, hand the decision to the sink, build
//! overlay labels. Nothing is carried between iterations except counters.
//!
//! Two drivers share `Pipeline::process`:
//! - `run`: capture and processing on the calling thread, strictly in order
//! - `run_threaded`: capture on its own thread feeding a single-slot channel where the
//!   newest pair replaces an unprocessed one, so processing always sees the latest
//!   frame and frames are never queued behind a slow detector

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::detect::{Detection, DetectorBackend};
use crate::frame::PairedFrame;
use crate::ingest::{Acquired, FrameSource, SourceStats};
use crate::overlay::{self, OverlayItem};
use crate::proximity::{
    evaluate_proximity, extract_primary_centroid, ProximityDecision, ProximityThreshold,
};
use crate::sink::WarningSink;

const DEFAULT_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const RECV_POLL: Duration = Duration::from_millis(200);

/// Everything produced for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub decision: ProximityDecision,
    pub overlay: Vec<OverlayItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    /// Iterations where the source had no complete pair.
    pub frames_skipped: u64,
    /// Frames whose decision was too close.
    pub warnings: u64,
    /// Pairs replaced in the latest-frame slot before processing (threaded only).
    pub superseded: u64,
    pub source: SourceStats,
}

pub struct Pipeline {
    detector: Box<dyn DetectorBackend>,
    sink: Box<dyn WarningSink>,
    threshold: ProximityThreshold,
    health_log_interval: Duration,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        sink: Box<dyn WarningSink>,
        threshold: ProximityThreshold,
    ) -> Self {
        Self {
            detector,
            sink,
            threshold,
            health_log_interval: DEFAULT_HEALTH_LOG_INTERVAL,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_health_log_interval(mut self, interval: Duration) -> Self {
        self.health_log_interval = interval;
        self
    }

    pub fn threshold(&self) -> ProximityThreshold {
        self.threshold
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Run one frame through detection, the proximity decision and the sink.
    pub fn process(&mut self, pair: &PairedFrame) -> Result<FrameReport> {
        let color = pair.color_in_depth_space();
        let detections = self.detector.detect(&color)?;
        let centroid = extract_primary_centroid(&detections);
        let decision = evaluate_proximity(centroid, &pair.depth, self.threshold);
        self.sink.signal(&decision)?;

        self.stats.frames_processed += 1;
        if decision.too_close {
            self.stats.warnings += 1;
        }
        log::debug!(
            "frame {}: detections={} centroid={:?} distance={:?} too_close={}",
            pair.sequence,
            detections.len(),
            decision.centroid,
            decision.distance_m,
            decision.too_close
        );

        Ok(FrameReport {
            sequence: pair.sequence,
            overlay: overlay::annotate(&detections, &decision),
            detections,
            decision,
        })
    }

    /// Sequential loop until `shutdown`, the source finishes, or `max_frames` frames
    /// have been processed.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        shutdown: &AtomicBool,
        max_frames: Option<u64>,
    ) -> Result<PipelineStats> {
        self.run_with(source, shutdown, max_frames, |_, _| Ok(()))
    }

    /// `run`, calling `observer` after every processed frame.
    pub fn run_with<F>(
        &mut self,
        source: &mut dyn FrameSource,
        shutdown: &AtomicBool,
        max_frames: Option<u64>,
        mut observer: F,
    ) -> Result<PipelineStats>
    where
        F: FnMut(&PairedFrame, &FrameReport) -> Result<()>,
    {
        log::info!(
            "pipeline running (sequential) detector={} sink={} threshold={:.2}m",
            self.detector.name(),
            self.sink.name(),
            self.threshold.meters()
        );
        let mut last_health_log = Instant::now();

        while !shutdown.load(Ordering::SeqCst) && !self.reached(max_frames) {
            match source.wait_for_paired_frame()? {
                Acquired::Pair(pair) => {
                    let report = self.process(&pair)?;
                    observer(&pair, &report)?;
                }
                Acquired::Unavailable => {
                    self.stats.frames_skipped += 1;
                }
                Acquired::Finished => {
                    log::info!("source finished");
                    break;
                }
            }

            if last_health_log.elapsed() >= self.health_log_interval {
                self.log_health(&source.stats(), source.is_healthy());
                last_health_log = Instant::now();
            }
        }

        self.stats.source = source.stats();
        Ok(self.stats.clone())
    }

    /// Capture on a dedicated thread, process the latest pair on this one.
    pub fn run_threaded(
        &mut self,
        source: Box<dyn FrameSource>,
        shutdown: Arc<AtomicBool>,
        max_frames: Option<u64>,
    ) -> Result<PipelineStats> {
        self.run_threaded_with(source, shutdown, max_frames, |_, _| Ok(()))
    }

    pub fn run_threaded_with<F>(
        &mut self,
        mut source: Box<dyn FrameSource>,
        shutdown: Arc<AtomicBool>,
        max_frames: Option<u64>,
        mut observer: F,
    ) -> Result<PipelineStats>
    where
        F: FnMut(&PairedFrame, &FrameReport) -> Result<()>,
    {
        log::info!(
            "pipeline running (threaded) detector={} sink={} threshold={:.2}m",
            self.detector.name(),
            self.sink.name(),
            self.threshold.meters()
        );

        let (slot, frames) = LatestSlot::new();
        let stop = Arc::new(AtomicBool::new(false));
        let capture_stop = Arc::clone(&stop);
        let capture_shutdown = Arc::clone(&shutdown);
        let capture = thread::Builder::new()
            .name("depthguard-capture".to_string())
            .spawn(move || -> Result<CaptureReport> {
                let mut report = CaptureReport::default();
                while !capture_shutdown.load(Ordering::SeqCst)
                    && !capture_stop.load(Ordering::SeqCst)
                {
                    match source.wait_for_paired_frame()? {
                        Acquired::Pair(pair) => {
                            if slot.offer(pair)? == Offer::Superseded {
                                report.superseded += 1;
                            }
                        }
                        Acquired::Unavailable => report.skipped += 1,
                        Acquired::Finished => {
                            log::info!("source finished");
                            break;
                        }
                    }
                }
                report.healthy = source.is_healthy();
                report.source = source.stats();
                Ok(report)
            })?;

        let mut last_health_log = Instant::now();
        let mut outcome = Ok(());
        while !shutdown.load(Ordering::SeqCst) && !self.reached(max_frames) {
            match frames.recv_timeout(RECV_POLL) {
                Ok(pair) => {
                    if let Err(e) = self
                        .process(&pair)
                        .and_then(|report| observer(&pair, &report))
                    {
                        outcome = Err(e);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_health_log.elapsed() >= self.health_log_interval {
                log::info!(
                    "pipeline health: processed={} warnings={}",
                    self.stats.frames_processed,
                    self.stats.warnings
                );
                last_health_log = Instant::now();
            }
        }

        stop.store(true, Ordering::SeqCst);
        drop(frames);
        let capture = capture
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))?;
        outcome?;
        let capture = capture?;

        self.stats.frames_skipped += capture.skipped;
        self.stats.superseded += capture.superseded;
        self.log_health(&capture.source, capture.healthy);
        self.stats.source = capture.source;
        Ok(self.stats.clone())
    }

    fn reached(&self, max_frames: Option<u64>) -> bool {
        max_frames.is_some_and(|max| self.stats.frames_processed >= max)
    }

    fn log_health(&self, source: &SourceStats, healthy: bool) {
        log::info!(
            "source health={} pairs={} unavailable={} processed={} warnings={} uri={}",
            healthy,
            source.frames_delivered,
            source.frames_unavailable,
            self.stats.frames_processed,
            self.stats.warnings,
            source.uri
        );
    }
}

#[derive(Debug, Default)]
struct CaptureReport {
    skipped: u64,
    superseded: u64,
    healthy: bool,
    source: SourceStats,
}

// ---- Latest-frame slot ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty.
    Queued,
    /// An unconsumed item was dropped to make room.
    Superseded,
}

/// Sending half of a one-item channel where a new item replaces a stale one.
///
/// Only one thread may offer into a slot.
pub struct LatestSlot<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(1);
        let drain = rx.clone();
        (Self { tx, drain }, rx)
    }

    /// Never blocks.
    pub fn offer(&self, item: T) -> Result<Offer> {
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(Offer::Queued),
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Disconnected(_)) => return Err(anyhow!("latest-frame slot closed")),
        };
        // the consumer may take the stale item first
        let superseded = self.drain.try_recv().is_ok();
        match self.tx.try_send(item) {
            Ok(()) if superseded => Ok(Offer::Superseded),
            Ok(()) => Ok(Offer::Queued),
            Err(TrySendError::Full(_)) => Err(anyhow!("latest-frame slot has a second producer")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("latest-frame slot closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MarkerBackend;
    use crate::device::StreamSettings;
    use crate::ingest::{SyntheticConfig, SyntheticSource};
    use crate::sink::MemorySink;

    fn synthetic(config: SyntheticConfig) -> Result<SyntheticSource> {
        let mut source = SyntheticSource::new(config);
        crate::ingest::start_source(&mut source, &StreamSettings::default())?;
        Ok(source)
    }

    fn pipeline(sink: &MemorySink) -> Pipeline {
        Pipeline::new(
            Box::new(MarkerBackend::default()),
            Box::new(sink.clone()),
            ProximityThreshold::default(),
        )
    }

    #[test]
    fn slot_keeps_only_the_newest_item() -> Result<()> {
        let (slot, rx) = LatestSlot::new();
        assert_eq!(slot.offer(1)?, Offer::Queued);
        assert_eq!(slot.offer(2)?, Offer::Superseded);
        assert_eq!(slot.offer(3)?, Offer::Superseded);
        assert_eq!(rx.try_recv()?, 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(slot.offer(4)?, Offer::Queued);
        Ok(())
    }

    #[test]
    fn dropping_the_slot_disconnects_the_receiver() -> Result<()> {
        let (slot, rx) = LatestSlot::new();
        slot.offer("last")?;
        drop(slot);
        assert_eq!(rx.recv()?, "last");
        assert!(rx.recv().is_err());
        Ok(())
    }

    #[test]
    fn process_signals_once_per_frame() -> Result<()> {
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&sink);
        let mut source = synthetic(SyntheticConfig::new("cam"))?;
        let Acquired::Pair(pair) = source.wait_for_paired_frame()? else {
            return Err(anyhow!("expected a pair"));
        };

        assert_eq!(pipeline.threshold(), ProximityThreshold::default());
        let report = pipeline.process(&pair)?;
        assert_eq!(report.sequence, 1);
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.overlay[0].label, "person 2.50");
        assert!(!report.decision.too_close);
        assert_eq!(sink.signals()?, vec![report.decision]);
        Ok(())
    }

    #[test]
    fn run_stops_at_max_frames_and_counts_skips() -> Result<()> {
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&sink);
        let mut source = synthetic(SyntheticConfig::new("cam").with_drop_every(3))?;
        let shutdown = AtomicBool::new(false);

        let stats = pipeline.run(&mut source, &shutdown, Some(4))?;
        assert_eq!(stats.frames_processed, 4);
        assert_eq!(stats.frames_skipped, 1);
        assert_eq!(stats.source.frames_delivered, 4);
        assert_eq!(sink.signals()?.len(), 4);
        Ok(())
    }

    #[test]
    fn run_returns_immediately_when_shut_down() -> Result<()> {
        let sink = MemorySink::new();
        let mut pipeline = pipeline(&sink);
        let mut source = synthetic(SyntheticConfig::new("cam"))?;
        let shutdown = AtomicBool::new(true);

        let stats = pipeline.run(&mut source, &shutdown, None)?;
        assert_eq!(stats.frames_processed, 0);
        Ok(())
    }
}
