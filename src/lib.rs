//! Depth Guard
//!
//! Depth-aware object detection with a proximity stop signal.
//!
//! # Architecture
//!
//! Every iteration flows one way:
//!
//! 1. A `FrameSource` blocks until a color and a depth frame exist for the same instant.
//! 2. The color frame is matched to the depth resolution and handed to a `DetectorBackend`.
//! 3. The proximity engine takes the centroid of the first detection, samples the depth map
//!    there and decides whether the object is closer than the configured threshold.
//! 4. A `WarningSink` receives the decision once per frame.
//!
//! Nothing survives an iteration except configuration.
//!
//! # Module Structure
//!
//! - `frame`: Color/depth frame types and the `DepthMap` view
//! - `device`: Device capabilities and stream resolution planning
//! - `ingest`: Frame sources (synthetic, recorded playback)
//! - `detect`: Detection records and detector backends
//! - `proximity`: Centroid extraction and the threshold decision
//! - `overlay`: Label text for annotated frames
//! - `sink`: Warning/actuator sinks (log, MQTT, memory)
//! - `pipeline`: The per-frame loop, sequential or with a latest-frame slot
//! - `coverage`: Text rendering of near-field depth coverage
//! - `config`: File + environment configuration

pub mod config;
pub mod coverage;
pub mod detect;
pub mod device;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod proximity;
pub mod sink;

pub use config::DepthGuardConfig;
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, MarkerBackend};
pub use device::{DeviceInfo, Resolution, StreamPlan, StreamSettings};
pub use frame::{ColorFrame, DepthFrame, DepthMap, PairedFrame};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use ingest::{Acquired, FrameSource, PlaybackSource, SourceStats, SyntheticSource};
pub use pipeline::{FrameReport, LatestSlot, Offer, Pipeline, PipelineStats};
pub use proximity::{
    evaluate_proximity, extract_primary_centroid, Centroid, ProximityDecision,
    ProximityThreshold,
};
pub use sink::{LogSink, MemorySink, MqttSink, WarningSink};
