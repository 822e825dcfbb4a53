//! Synthetic depth camera (`stub://<name>`).
//!
//! Simulates a scene for tests and demos:
//! - a flat background wall at `BACKGROUND_M`
//! - one object in the middle of the frame, painted `MARKER_COLOR` in the color
//!   stream, approaching from `FAR_M` to `NEAR_M` in `STEP_M` steps and then
//!   starting over
//! - random dropout (zero readings) along the depth frame border
//! - optionally, a missing depth half every `drop_every` frames
//!
//! The RNG is seeded, so a given configuration always yields the same frames.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Acquired, FrameSource, SourceStats};
use crate::config::SourceSettings;
use crate::detect::MARKER_COLOR;
use crate::device::{DeviceInfo, StreamPlan, COLOR_SENSOR_NAME};
use crate::frame::{ColorFrame, DepthFrame, PairedFrame, DEFAULT_DEPTH_SCALE};

pub const BACKGROUND_M: f32 = 3.0;
pub const FAR_M: f32 = 2.5;
pub const NEAR_M: f32 = 0.4;
pub const STEP_M: f32 = 0.05;

const BACKGROUND_RGB: [u8; 3] = [90, 90, 90];
const EDGE_BORDER: u32 = 8;
const EDGE_DROPOUT: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub device: DeviceInfo,
    pub seed: u64,
    pub depth_scale: f32,
    /// Sleep between frames to match the color stream fps.
    pub pace: bool,
    /// Every n-th frame loses its depth half. 0 disables.
    pub drop_every: u64,
}

impl SyntheticConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            device: synthetic_device(name, "D400", true),
            seed: 7,
            depth_scale: DEFAULT_DEPTH_SCALE,
            pace: false,
            drop_every: 0,
        }
    }

    pub fn from_settings(name: &str, settings: &SourceSettings) -> Self {
        Self {
            name: name.to_string(),
            device: synthetic_device(name, &settings.product_line, settings.color_sensor),
            seed: settings.seed,
            depth_scale: settings.depth_scale,
            pace: settings.pace,
            drop_every: settings.drop_every,
        }
    }

    pub fn with_product_line(mut self, product_line: &str) -> Self {
        self.device.product_line = product_line.to_string();
        self
    }

    pub fn without_color_sensor(mut self) -> Self {
        self.device.sensors.retain(|s| s != COLOR_SENSOR_NAME);
        self
    }

    pub fn with_drop_every(mut self, drop_every: u64) -> Self {
        self.drop_every = drop_every;
        self
    }
}

fn synthetic_device(name: &str, product_line: &str, color_sensor: bool) -> DeviceInfo {
    let mut sensors = vec!["Stereo Module".to_string()];
    if color_sensor {
        sensors.push(COLOR_SENSOR_NAME.to_string());
    }
    DeviceInfo {
        name: format!("Synthetic {}", name),
        product_line: product_line.to_string(),
        sensors,
    }
}

/// Distance of the approaching object in 1-based frame `frame`.
pub fn object_distance(frame: u64) -> f32 {
    let cycle = ((FAR_M - NEAR_M) / STEP_M).round() as u64 + 1;
    let step = (frame.max(1) - 1) % cycle;
    FAR_M - STEP_M * step as f32
}

/// Object rectangle `[x0, x1) x [y0, y1)` for a frame of `width x height`.
pub fn object_rect(width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (w, h) = (width / 8, height / 4);
    let (x0, y0) = (width / 2 - w / 2, height / 2 - h / 2);
    (x0, y0, x0 + w, y0 + h)
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    plan: Option<StreamPlan>,
    rng: StdRng,
    frame_count: u64,
    delivered: u64,
    unavailable: u64,
    last_emit: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            plan: None,
            rng,
            frame_count: 0,
            delivered: 0,
            unavailable: 0,
            last_emit: None,
        }
    }

    fn pace(&mut self, fps: u32) {
        if !self.config.pace {
            return;
        }
        let interval = Duration::from_secs(1) / fps.max(1);
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }

    fn generate_depth(&mut self, width: u32, height: u32, object_m: f32) -> Result<DepthFrame> {
        let mut depth = DepthFrame::filled(width, height, BACKGROUND_M, self.config.depth_scale)?;
        let (x0, y0, x1, y1) = object_rect(width, height);
        for y in y0..y1 {
            for x in x0..x1 {
                depth.set_distance(x, y, object_m);
            }
        }
        for y in 0..height {
            for x in 0..width {
                let on_border = x < EDGE_BORDER
                    || y < EDGE_BORDER
                    || x + EDGE_BORDER >= width
                    || y + EDGE_BORDER >= height;
                if on_border && self.rng.gen_bool(EDGE_DROPOUT) {
                    depth.set_distance(x, y, 0.0);
                }
            }
        }
        Ok(depth)
    }

    /// Color frame with the object at the same relative position as in depth.
    fn generate_color(&self, width: u32, height: u32, depth_w: u32, depth_h: u32) -> ColorFrame {
        let mut image = RgbImage::from_pixel(width, height, Rgb(BACKGROUND_RGB));
        let (x0, y0, x1, y1) = object_rect(depth_w, depth_h);
        let sx = |x: u32| (u64::from(x) * u64::from(width) / u64::from(depth_w)) as u32;
        let sy = |y: u32| (u64::from(y) * u64::from(height) / u64::from(depth_h)) as u32;
        for y in sy(y0)..sy(y1) {
            for x in sx(x0)..sx(x1) {
                image.put_pixel(x, y, Rgb(MARKER_COLOR));
            }
        }
        ColorFrame::new(image)
    }
}

impl FrameSource for SyntheticSource {
    fn device_info(&self) -> &DeviceInfo {
        &self.config.device
    }

    fn start(&mut self, plan: &StreamPlan) -> Result<()> {
        self.plan = Some(*plan);
        log::info!(
            "SyntheticSource: connected to stub://{} (synthetic)",
            self.config.name
        );
        Ok(())
    }

    fn wait_for_paired_frame(&mut self) -> Result<Acquired> {
        let plan = self
            .plan
            .ok_or_else(|| anyhow!("synthetic source not started"))?;
        self.pace(plan.color.resolution.fps);
        self.frame_count += 1;

        if self.config.drop_every > 0 && self.frame_count % self.config.drop_every == 0 {
            self.unavailable += 1;
            return Ok(Acquired::Unavailable);
        }

        let (dw, dh) = (plan.depth.resolution.width, plan.depth.resolution.height);
        let (cw, ch) = (plan.color.resolution.width, plan.color.resolution.height);
        let depth = self.generate_depth(dw, dh, object_distance(self.frame_count))?;
        let color = self.generate_color(cw, ch, dw, dh);

        self.delivered += 1;
        Ok(Acquired::Pair(PairedFrame::new(self.frame_count, color, depth)))
    }

    fn is_healthy(&self) -> bool {
        self.plan.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.delivered,
            frames_unavailable: self.unavailable,
            uri: format!("stub://{}", self.config.name),
        }
    }
}
