//! Recorded playback source.
//!
//! Replays a directory of frame pairs captured from a depth camera:
//!
//! ```text
//! recording/
//!   device.json          (optional DeviceInfo)
//!   000001_color.png     RGB8
//!   000001_depth.png     16-bit grayscale, raw z16 units
//!   000002_color.png
//!   ...
//! ```
//!
//! A frame index with only one of the two files is replayed as unavailable.
//! `record_pair` writes the same layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageBuffer, Luma};

use super::{Acquired, FrameSource, SourceStats};
use crate::device::{DeviceInfo, StreamPlan, COLOR_SENSOR_NAME};
use crate::frame::{ColorFrame, DepthFrame, DepthMap, PairedFrame};

const DEVICE_FILE: &str = "device.json";
const COLOR_SUFFIX: &str = "_color.png";
const DEPTH_SUFFIX: &str = "_depth.png";

#[derive(Debug, Default)]
struct RecordedFrame {
    color: Option<PathBuf>,
    depth: Option<PathBuf>,
}

pub struct PlaybackSource {
    dir: PathBuf,
    device: DeviceInfo,
    frames: Vec<(u64, RecordedFrame)>,
    cursor: usize,
    depth_scale: f32,
    started: bool,
    delivered: u64,
    unavailable: u64,
}

impl PlaybackSource {
    pub fn open<P: AsRef<Path>>(dir: P, depth_scale: f32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut frames: BTreeMap<u64, RecordedFrame> = BTreeMap::new();
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("failed to read recording directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            if let Some(index) = parse_index(&name, COLOR_SUFFIX) {
                frames.entry(index).or_default().color = Some(path);
            } else if let Some(index) = parse_index(&name, DEPTH_SUFFIX) {
                frames.entry(index).or_default().depth = Some(path);
            }
        }
        if frames.is_empty() {
            return Err(anyhow!("no recorded frames in {}", dir.display()));
        }

        let device = read_device_info(&dir)?;
        Ok(Self {
            dir,
            device,
            frames: frames.into_iter().collect(),
            cursor: 0,
            depth_scale,
            started: false,
            delivered: 0,
            unavailable: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn load_color(path: &Path) -> Result<ColorFrame> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode color frame {}", path.display()))?;
        Ok(ColorFrame::new(image.to_rgb8()))
    }

    fn load_depth(&self, path: &Path) -> Result<DepthFrame> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode depth frame {}", path.display()))?;
        match image {
            DynamicImage::ImageLuma16(buf) => {
                let (w, h) = buf.dimensions();
                DepthFrame::new(w, h, buf.into_raw(), self.depth_scale)
            }
            other => Err(anyhow!(
                "depth frame {} must be 16-bit grayscale, got {:?}",
                path.display(),
                other.color()
            )),
        }
    }
}

impl FrameSource for PlaybackSource {
    fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    fn start(&mut self, plan: &StreamPlan) -> Result<()> {
        self.started = true;
        log::info!(
            "PlaybackSource: replaying {} frames from {} (depth {} color {})",
            self.frames.len(),
            self.dir.display(),
            plan.depth.resolution,
            plan.color.resolution
        );
        Ok(())
    }

    fn wait_for_paired_frame(&mut self) -> Result<Acquired> {
        if !self.started {
            return Err(anyhow!("playback source not started"));
        }
        let Some((index, frame)) = self.frames.get(self.cursor) else {
            return Ok(Acquired::Finished);
        };
        self.cursor += 1;

        let (Some(color_path), Some(depth_path)) = (&frame.color, &frame.depth) else {
            log::debug!("recorded frame {} is missing its color or depth half", index);
            self.unavailable += 1;
            return Ok(Acquired::Unavailable);
        };
        let color = Self::load_color(color_path)?;
        let depth = self.load_depth(depth_path)?;
        self.delivered += 1;
        Ok(Acquired::Pair(PairedFrame::new(*index, color, depth)))
    }

    fn is_healthy(&self) -> bool {
        self.started && self.cursor < self.frames.len()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.delivered,
            frames_unavailable: self.unavailable,
            uri: self.dir.display().to_string(),
        }
    }
}

/// Write `pair` into `dir` in the layout `PlaybackSource` reads.
pub fn record_pair(dir: &Path, pair: &PairedFrame) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create recording directory {}", dir.display()))?;
    let color_path = dir.join(format!("{:06}{}", pair.sequence, COLOR_SUFFIX));
    pair.color
        .image()
        .save(&color_path)
        .with_context(|| format!("failed to write {}", color_path.display()))?;

    let depth_path = dir.join(format!("{:06}{}", pair.sequence, DEPTH_SUFFIX));
    let depth: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(
        pair.depth.width(),
        pair.depth.height(),
        pair.depth.raw_data().to_vec(),
    )
    .ok_or_else(|| anyhow!("depth buffer does not match its dimensions"))?;
    depth
        .save(&depth_path)
        .with_context(|| format!("failed to write {}", depth_path.display()))?;
    Ok(())
}

/// Write `device.json` so playback reports the recording device.
pub fn record_device_info(dir: &Path, device: &DeviceInfo) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create recording directory {}", dir.display()))?;
    let json = serde_json::to_string_pretty(device)?;
    fs::write(dir.join(DEVICE_FILE), json)
        .with_context(|| format!("failed to write {} in {}", DEVICE_FILE, dir.display()))?;
    Ok(())
}

fn parse_index(name: &str, suffix: &str) -> Option<u64> {
    let digits = name.strip_suffix(suffix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn read_device_info(dir: &Path) -> Result<DeviceInfo> {
    let path = dir.join(DEVICE_FILE);
    if !path.exists() {
        return Ok(DeviceInfo {
            name: "Recording".to_string(),
            product_line: "recording".to_string(),
            sensors: vec!["Stereo Module".to_string(), COLOR_SENSOR_NAME.to_string()],
        });
    }
    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StreamSettings;
    use crate::frame::DEFAULT_DEPTH_SCALE;

    #[test]
    fn index_parsing_requires_digits_and_suffix() {
        assert_eq!(parse_index("000012_color.png", COLOR_SUFFIX), Some(12));
        assert_eq!(parse_index("7_depth.png", DEPTH_SUFFIX), Some(7));
        assert_eq!(parse_index("x7_depth.png", DEPTH_SUFFIX), None);
        assert_eq!(parse_index("_depth.png", DEPTH_SUFFIX), None);
        assert_eq!(parse_index("000012_color.jpg", COLOR_SUFFIX), None);
    }

    #[test]
    fn recorded_pairs_replay_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for seq in [2u64, 1] {
            let color = ColorFrame::from_rgb(4, 2, vec![seq as u8; 4 * 2 * 3])?;
            let depth = DepthFrame::filled(4, 2, 0.5 * seq as f32, DEFAULT_DEPTH_SCALE)?;
            record_pair(dir.path(), &PairedFrame::new(seq, color, depth))?;
        }
        // a lone color half
        let lone = ColorFrame::from_rgb(4, 2, vec![0; 24])?;
        lone.image().save(dir.path().join("000003_color.png"))?;

        let mut source = PlaybackSource::open(dir.path(), DEFAULT_DEPTH_SCALE)?;
        assert_eq!(source.len(), 3);
        let plan = StreamSettings::default().resolve(source.device_info())?;
        source.start(&plan)?;

        for expected in [1u64, 2] {
            match source.wait_for_paired_frame()? {
                Acquired::Pair(pair) => {
                    assert_eq!(pair.sequence, expected);
                    assert_eq!(pair.color.pixels()[0], expected as u8);
                    let d = pair.depth.distance_at(0, 0);
                    assert!((d - 0.5 * expected as f32).abs() < 1e-3);
                }
                other => return Err(anyhow!("expected pair, got {:?}", other)),
            }
        }
        assert!(matches!(
            source.wait_for_paired_frame()?,
            Acquired::Unavailable
        ));
        assert!(matches!(source.wait_for_paired_frame()?, Acquired::Finished));
        assert_eq!(source.stats().frames_delivered, 2);
        assert_eq!(source.stats().frames_unavailable, 1);
        Ok(())
    }

    #[test]
    fn device_file_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let device = DeviceInfo {
            name: "Intel RealSense L515".to_string(),
            product_line: "L515C".to_string(),
            sensors: vec![COLOR_SENSOR_NAME.to_string()],
        };
        record_device_info(dir.path(), &device)?;
        let color = ColorFrame::from_rgb(1, 1, vec![0, 0, 0])?;
        let depth = DepthFrame::filled(1, 1, 1.0, DEFAULT_DEPTH_SCALE)?;
        record_pair(dir.path(), &PairedFrame::new(1, color, depth))?;

        let source = PlaybackSource::open(dir.path(), DEFAULT_DEPTH_SCALE)?;
        assert_eq!(source.device_info(), &device);
        Ok(())
    }

    #[test]
    fn empty_directory_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(PlaybackSource::open(dir.path(), DEFAULT_DEPTH_SCALE).is_err());
        Ok(())
    }

    #[test]
    fn eight_bit_depth_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let color = ColorFrame::from_rgb(1, 1, vec![0, 0, 0])?;
        color.image().save(dir.path().join("000001_color.png"))?;
        image::GrayImage::new(1, 1).save(dir.path().join("000001_depth.png"))?;

        let mut source = PlaybackSource::open(dir.path(), DEFAULT_DEPTH_SCALE)?;
        let plan = StreamSettings::default().resolve(source.device_info())?;
        source.start(&plan)?;
        assert!(source.wait_for_paired_frame().is_err());
        Ok(())
    }
}
