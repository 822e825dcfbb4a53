#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{decode_yolov8, DecodeParams};
use crate::detect::result::Detection;
use crate::frame::ColorFrame;

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export (e.g. `yolov8n.onnx`) with a square `1x3xSxS` input.
/// Frames are stretched to the input size, so boxes are mapped back per axis.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and NMS IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &ColorFrame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.image(), side, side, imageops::FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &ColorFrame) -> Result<Vec<Detection>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let data = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;

        let side = self.input_size as f32;
        let params = DecodeParams {
            confidence: self.confidence_threshold,
            iou: self.iou_threshold,
            scale_x: frame.width() as f32 / side,
            scale_y: frame.height() as f32 / side,
            frame_width: frame.width() as f32,
            frame_height: frame.height() as f32,
        };
        decode_yolov8(data, output.shape(), &params)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = ColorFrame::new(image::RgbImage::new(side, side));
        self.detect(&blank).map(|_| ())
    }
}
