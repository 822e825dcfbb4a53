//! Device capabilities and stream planning.
//!
//! A depth camera reports its product line and the sensors it carries. The stream
//! plan is resolved from that report and the configured resolutions before any
//! frame is requested:
//! - the depth stream always uses the configured depth resolution (z16)
//! - the color stream uses a product-line override when one matches, else the default
//! - a device without a color sensor cannot run the demo at all

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Sensor name a device must report to provide color frames.
pub const COLOR_SENSOR_NAME: &str = "RGB Camera";

/// Identification reported by a device (or a synthetic stand-in).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub product_line: String,
    pub sensors: Vec<String>,
}

impl DeviceInfo {
    pub fn has_color_sensor(&self) -> bool {
        self.sensors.iter().any(|s| s == COLOR_SENSOR_NAME)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("{} resolution must be non-zero", what));
        }
        if self.fps == 0 {
            return Err(anyhow!("{} fps must be >= 1", what));
        }
        Ok(())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.fps)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Depth,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Z16,
    Bgr8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamProfile {
    pub stream: StreamKind,
    pub format: PixelFormat,
    pub resolution: Resolution,
}

/// Configured stream resolutions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub depth: Resolution,
    pub color: Resolution,
    /// Color resolution per product line, e.g. `L515C -> 960x540`.
    pub color_overrides: BTreeMap<String, Resolution>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let mut color_overrides = BTreeMap::new();
        color_overrides.insert("L515C".to_string(), Resolution::new(960, 540, 30));
        Self {
            depth: Resolution::new(640, 480, 30),
            color: Resolution::new(640, 480, 30),
            color_overrides,
        }
    }
}

impl StreamSettings {
    /// Choose stream profiles for `device`.
    ///
    /// Fails when the device cannot deliver color frames.
    pub fn resolve(&self, device: &DeviceInfo) -> Result<StreamPlan> {
        if !device.has_color_sensor() {
            return Err(anyhow!("The demo requires Depth camera with Color sensor"));
        }
        let color = self
            .color_overrides
            .get(&device.product_line)
            .copied()
            .unwrap_or(self.color);
        Ok(StreamPlan {
            depth: StreamProfile {
                stream: StreamKind::Depth,
                format: PixelFormat::Z16,
                resolution: self.depth,
            },
            color: StreamProfile {
                stream: StreamKind::Color,
                format: PixelFormat::Bgr8,
                resolution: color,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.depth.validate("depth stream")?;
        self.color.validate("color stream")?;
        for (line, res) in &self.color_overrides {
            res.validate(&format!("color stream override {}", line))?;
        }
        Ok(())
    }
}

/// Resolved depth + color stream pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamPlan {
    pub depth: StreamProfile,
    pub color: StreamProfile,
}

impl StreamPlan {
    pub fn needs_resize(&self) -> bool {
        self.depth.resolution.width != self.color.resolution.width
            || self.depth.resolution.height != self.color.resolution.height
    }
}
