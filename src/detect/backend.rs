use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::ColorFrame;

/// Detector backend trait.
///
/// Implementations receive a color frame in depth pixel space and return detections
/// in the same coordinates. The order of the returned list is backend-defined and is
/// passed through untouched.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &ColorFrame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
