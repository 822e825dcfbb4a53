//! Overlay annotations for a processed frame.
//!
//! Drawing is left to whatever displays the frame; this module only produces the
//! boxes and their label text. Every label carries the distance sampled for the
//! frame's primary object, formatted as `"<class> <meters:.2>"`.

use crate::detect::{BoundingBox, Detection};
use crate::proximity::ProximityDecision;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayItem {
    pub bbox: BoundingBox,
    pub label: String,
}

pub fn label(detection: &Detection, decision: &ProximityDecision) -> String {
    format!(
        "{} {:.2}",
        detection.class_name(),
        decision.distance_or_zero()
    )
}

pub fn annotate(detections: &[Detection], decision: &ProximityDecision) -> Vec<OverlayItem> {
    detections
        .iter()
        .map(|d| OverlayItem {
            bbox: d.bbox,
            label: label(d, decision),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::Centroid;

    #[test]
    fn labels_use_two_decimals_and_zero_for_unknown() {
        let dets = vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 0.9, 0),
            Detection::new(BoundingBox::new(8.0, 8.0, 12.0, 12.0), 0.7, 2),
        ];
        let near = ProximityDecision {
            centroid: Some(Centroid::new(2, 2)),
            distance_m: Some(0.8049),
            too_close: true,
        };
        let items = annotate(&dets, &near);
        assert_eq!(items[0].label, "person 0.80");
        assert_eq!(items[1].label, "car 0.80");
        assert_eq!(items[1].bbox, dets[1].bbox);

        let unknown = ProximityDecision {
            centroid: Some(Centroid::new(2, 2)),
            distance_m: None,
            too_close: false,
        };
        assert_eq!(label(&dets[0], &unknown), "person 0.00");
    }
}
