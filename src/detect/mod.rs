//! Object detection.
//!
//! Backends turn a color frame into an ordered list of `Detection`s. The order is
//! whatever the backend produces; the proximity engine treats the first entry as
//! the primary object.

mod backend;
mod backends;
mod postprocess;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{MarkerBackend, MARKER_COLOR};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use postprocess::{decode_yolov8, non_max_suppression, DecodeParams};
pub use registry::BackendRegistry;
pub use result::{class_name, BoundingBox, Detection, COCO_CLASSES};
