//! YOLOv8 head decoding and non-maximum suppression.
//!
//! Kept free of any inference runtime so it can be exercised without a model.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

const CXCYWH: usize = 4;

/// Thresholds and the mapping from model input space back to frame space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    pub confidence: f32,
    pub iou: f32,
    /// Frame pixels per model input pixel, per axis.
    pub scale_x: f32,
    pub scale_y: f32,
    pub frame_width: f32,
    pub frame_height: f32,
}

/// Decode a `[1, 4 + nc, anchors]` YOLOv8 output tensor given as a flat slice.
///
/// Each anchor keeps its best class; anchors under `params.confidence` are dropped,
/// the rest go through class-agnostic NMS. The result is ordered by confidence.
pub fn decode_yolov8(
    data: &[f32],
    shape: &[usize],
    params: &DecodeParams,
) -> Result<Vec<Detection>> {
    let (channels, anchors) = match shape {
        [1, c, a] => (*c, *a),
        [c, a] => (*c, *a),
        other => return Err(anyhow!("unexpected YOLOv8 output shape {:?}", other)),
    };
    if channels <= CXCYWH {
        return Err(anyhow!(
            "YOLOv8 output has {} channels, expected more than {}",
            channels,
            CXCYWH
        ));
    }
    let expected = channels
        .checked_mul(anchors)
        .ok_or_else(|| anyhow!("YOLOv8 output shape overflow"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "YOLOv8 output length mismatch: expected {}, got {}",
            expected,
            data.len()
        ));
    }

    let at = |c: usize, a: usize| data[c * anchors + a];
    let mut detections = Vec::new();
    for a in 0..anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for c in CXCYWH..channels {
            let score = at(c, a);
            if score > best.1 {
                best = (c - CXCYWH, score);
            }
        }
        if !(best.1 >= params.confidence) {
            continue;
        }
        let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            continue;
        }
        let bbox = BoundingBox::from_cxcywh(cx, cy, w, h)
            .scaled(params.scale_x, params.scale_y)
            .clamped(params.frame_width, params.frame_height);
        detections.push(Detection::new(bbox, best.1, best.0));
    }

    non_max_suppression(&mut detections, params.iou);
    Ok(detections)
}

/// Greedy NMS. Sorts by descending confidence, then drops any box overlapping an
/// already kept box by more than `iou_threshold`.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..xs.len() {
        let suppressed = (0..kept).any(|prev| xs[prev].bbox.iou(&xs[index].bbox) > iou_threshold);
        if !suppressed {
            xs.swap(kept, index);
            kept += 1;
        }
    }
    xs.truncate(kept);
}
