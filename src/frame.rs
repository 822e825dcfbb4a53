//! Frame types shared by sources, detectors and the proximity engine.
//!
//! - `ColorFrame`: RGB image delivered by the color sensor.
//! - `DepthFrame`: z16 depth samples plus the device depth scale.
//! - `DepthMap`: the read-only view the proximity engine samples from.
//! - `PairedFrame`: one color and one depth frame captured for the same instant.

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

/// Meters per z16 unit on most depth cameras (1 mm).
pub const DEFAULT_DEPTH_SCALE: f32 = 0.001;

// ----------------------------------------------------------------------------
// DepthMap: what the proximity engine is allowed to see
// ----------------------------------------------------------------------------

/// Per-pixel distance samples.
///
/// `distance_at` is only defined inside `[0, width) x [0, height)`. Callers check
/// bounds with `contains` first; implementations may panic on out-of-range queries.
pub trait DepthMap {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Distance in meters at pixel `(x, y)`. `0.0` means no valid reading.
    fn distance_at(&self, x: u32, y: u32) -> f32;

    fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width()) && y < i64::from(self.height())
    }
}

// ----------------------------------------------------------------------------
// ColorFrame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ColorFrame {
    image: RgbImage,
}

impl ColorFrame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = packed_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { image })
    }

    /// Build from packed BGR24 bytes, the layout depth cameras stream by default.
    pub fn from_bgr(width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let mut rgb = pixels.to_vec();
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self::from_rgb(width, height, rgb)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Resample to `width x height`.
    ///
    /// Shrinking uses area averaging; enlarging falls back to bilinear filtering.
    pub fn resized_to(&self, width: u32, height: u32) -> ColorFrame {
        if width == self.width() && height == self.height() {
            return self.clone();
        }
        let image = if width <= self.width() && height <= self.height() {
            imageops::thumbnail(&self.image, width, height)
        } else {
            imageops::resize(&self.image, width, height, imageops::FilterType::Triangle)
        };
        ColorFrame { image }
    }
}

// ----------------------------------------------------------------------------
// DepthFrame
// ----------------------------------------------------------------------------

/// Raw z16 depth frame. Distances are `raw * depth_scale` meters; raw 0 is "no reading".
#[derive(Clone, Debug)]
pub struct DepthFrame {
    data: Vec<u16>,
    width: u32,
    height: u32,
    depth_scale: f32,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, data: Vec<u16>, depth_scale: f32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("depth frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "depth frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        if !(depth_scale.is_finite() && depth_scale > 0.0) {
            return Err(anyhow!("depth scale must be a positive number of meters"));
        }
        Ok(Self {
            data,
            width,
            height,
            depth_scale,
        })
    }

    /// Frame where every pixel reads `meters`.
    pub fn filled(width: u32, height: u32, meters: f32, depth_scale: f32) -> Result<Self> {
        let raw = meters_to_raw(meters, depth_scale);
        Self::new(
            width,
            height,
            vec![raw; width as usize * height as usize],
            depth_scale,
        )
    }

    pub fn depth_scale(&self) -> f32 {
        self.depth_scale
    }

    pub fn raw_at(&self, x: u32, y: u32) -> u16 {
        self.data[self.index(x, y)]
    }

    pub fn raw_data(&self) -> &[u16] {
        &self.data
    }

    /// Overwrite one sample. Out-of-range coordinates are ignored.
    pub fn set_distance(&mut self, x: u32, y: u32, meters: f32) {
        if x < self.width && y < self.height {
            let idx = self.index(x, y);
            self.data[idx] = meters_to_raw(meters, self.depth_scale);
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl DepthMap for DepthFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn distance_at(&self, x: u32, y: u32) -> f32 {
        f32::from(self.raw_at(x, y)) * self.depth_scale
    }
}

fn meters_to_raw(meters: f32, depth_scale: f32) -> u16 {
    if !meters.is_finite() || meters <= 0.0 {
        return 0;
    }
    (meters / depth_scale).round().clamp(0.0, f32::from(u16::MAX)) as u16
}

fn packed_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// PairedFrame
// ----------------------------------------------------------------------------

/// Color and depth captured for the same instant.
#[derive(Clone, Debug)]
pub struct PairedFrame {
    pub sequence: u64,
    pub color: ColorFrame,
    pub depth: DepthFrame,
}

impl PairedFrame {
    pub fn new(sequence: u64, color: ColorFrame, depth: DepthFrame) -> Self {
        Self {
            sequence,
            color,
            depth,
        }
    }

    pub fn resolutions_match(&self) -> bool {
        self.color.width() == self.depth.width() && self.color.height() == self.depth.height()
    }

    /// The color frame in depth pixel space.
    ///
    /// Detections made on this frame can be sampled against `depth` directly.
    pub fn color_in_depth_space(&self) -> Cow<'_, ColorFrame> {
        if self.resolutions_match() {
            Cow::Borrowed(&self.color)
        } else {
            Cow::Owned(self.color.resized_to(self.depth.width(), self.depth.height()))
        }
    }
}
