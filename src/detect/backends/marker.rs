use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::ColorFrame;

/// Color the synthetic source paints objects with.
pub const MARKER_COLOR: [u8; 3] = [255, 0, 255];

const DEFAULT_TOLERANCE: u8 = 40;
const DEFAULT_MIN_PIXELS: usize = 16;
const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Stub backend for synthetic scenes. Reports the bounding box of all pixels near
/// `MARKER_COLOR` as a single detection.
pub struct MarkerBackend {
    marker: [u8; 3],
    tolerance: u8,
    min_pixels: usize,
    class_id: usize,
}

impl MarkerBackend {
    pub fn new(marker: [u8; 3], class_id: usize) -> Self {
        Self {
            marker,
            tolerance: DEFAULT_TOLERANCE,
            min_pixels: DEFAULT_MIN_PIXELS,
            class_id,
        }
    }

    /// Fewer matching pixels than this is treated as noise.
    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels;
        self
    }

    fn matches(&self, px: &[u8]) -> bool {
        px.iter()
            .zip(self.marker.iter())
            .all(|(p, m)| p.abs_diff(*m) <= self.tolerance)
    }
}

impl Default for MarkerBackend {
    fn default() -> Self {
        Self::new(MARKER_COLOR, 0)
    }
}

impl DetectorBackend for MarkerBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &ColorFrame) -> Result<Vec<Detection>> {
        let width = frame.width() as usize;
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            if !self.matches(px) {
                continue;
            }
            let (x, y) = (i % width, i / width);
            count += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        if count < self.min_pixels.max(1) {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        );
        Ok(vec![Detection::new(bbox, DEFAULT_CONFIDENCE, self.class_id)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_marker(x0: u32, y0: u32, w: u32, h: u32) -> ColorFrame {
        let mut image = RgbImage::from_pixel(64, 48, Rgb([90, 90, 90]));
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, Rgb(MARKER_COLOR));
            }
        }
        ColorFrame::new(image)
    }

    #[test]
    fn marker_region_becomes_one_detection() -> Result<()> {
        let mut backend = MarkerBackend::default();
        let detections = backend.detect(&frame_with_marker(10, 8, 20, 12))?;
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(10.0, 8.0, 30.0, 20.0));
        assert_eq!(detections[0].class_name(), "person");
        Ok(())
    }

    #[test]
    fn tiny_regions_are_ignored() -> Result<()> {
        let mut backend = MarkerBackend::default();
        assert!(backend.detect(&frame_with_marker(10, 8, 3, 3))?.is_empty());
        let mut backend = MarkerBackend::default().with_min_pixels(4);
        assert_eq!(backend.detect(&frame_with_marker(10, 8, 3, 3))?.len(), 1);
        Ok(())
    }
}
