//! Centroid-depth proximity decision.
//!
//! Two pure steps per frame:
//!
//! 1. `extract_primary_centroid`: integer midpoint of the first detection's box.
//! 2. `evaluate_proximity`: sample the depth map at that point and compare against
//!    the threshold.
//!
//! "No detection" and "no reading" are carried as `None`, never as a zero
//! coordinate or a zero distance. A missing sample never raises the warning.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::frame::DepthMap;

/// Default stop distance in meters.
pub const DEFAULT_THRESHOLD_M: f32 = 1.0;

/// Pixel-space midpoint of a bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Centroid {
    pub x: i32,
    pub y: i32,
}

impl Centroid {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Centroid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Stop distance in meters. Always finite and strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ProximityThreshold(f32);

impl ProximityThreshold {
    pub fn new(meters: f32) -> Result<Self> {
        if !meters.is_finite() || meters <= 0.0 {
            return Err(anyhow!(
                "proximity threshold must be a positive number of meters, got {}",
                meters
            ));
        }
        Ok(Self(meters))
    }

    pub fn meters(&self) -> f32 {
        self.0
    }
}

impl Default for ProximityThreshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD_M)
    }
}

/// Outcome for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProximityDecision {
    /// `None` when the frame had no detection.
    pub centroid: Option<Centroid>,
    /// `None` when there was nothing to sample, the centroid fell outside the
    /// depth map, or the sensor had no reading there.
    pub distance_m: Option<f32>,
    /// True iff `distance_m` is `Some(d)` with `0 < d < threshold`.
    pub too_close: bool,
}

impl ProximityDecision {
    pub const NOTHING_DETECTED: ProximityDecision = ProximityDecision {
        centroid: None,
        distance_m: None,
        too_close: false,
    };

    /// Sampled distance with "unknown" shown as `0.0`, for labels.
    pub fn distance_or_zero(&self) -> f32 {
        self.distance_m.unwrap_or(0.0)
    }
}

/// Centroid of the first detection, in detector order.
///
/// Only one object is tracked per frame; neither confidence nor distance affects the
/// choice. Returns `None` for an empty list or a first box with non-finite corners.
pub fn extract_primary_centroid(detections: &[Detection]) -> Option<Centroid> {
    let bbox = &detections.first()?.bbox;
    let cx = ((bbox.x1 + bbox.x2) / 2.0).floor();
    let cy = ((bbox.y1 + bbox.y2) / 2.0).floor();
    if !(cx.is_finite() && cy.is_finite()) {
        return None;
    }
    Some(Centroid::new(cx as i32, cy as i32))
}

/// Sample `depth` at `centroid` and decide whether the object is too close.
///
/// Out-of-range centroids and zero/invalid readings degrade to an unknown distance;
/// this never fails and never queries the map outside its bounds.
pub fn evaluate_proximity<D>(
    centroid: Option<Centroid>,
    depth: &D,
    threshold: ProximityThreshold,
) -> ProximityDecision
where
    D: DepthMap + ?Sized,
{
    let Some(c) = centroid else {
        return ProximityDecision::NOTHING_DETECTED;
    };

    let distance_m = if depth.contains(i64::from(c.x), i64::from(c.y)) {
        let d = depth.distance_at(c.x as u32, c.y as u32);
        (d.is_finite() && d > 0.0).then_some(d)
    } else {
        None
    };

    ProximityDecision {
        centroid: Some(c),
        distance_m,
        too_close: distance_m.is_some_and(|d| d < threshold.meters()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::cell::Cell;

    /// Depth map answering one constant and counting queries.
    struct ConstantDepth {
        width: u32,
        height: u32,
        meters: f32,
        queries: Cell<usize>,
    }

    impl ConstantDepth {
        fn new(meters: f32) -> Self {
            Self {
                width: 640,
                height: 480,
                meters,
                queries: Cell::new(0),
            }
        }
    }

    impl DepthMap for ConstantDepth {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn distance_at(&self, x: u32, y: u32) -> f32 {
            assert!(x < self.width && y < self.height, "out-of-range query");
            self.queries.set(self.queries.get() + 1);
            self.meters
        }
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2), 0.8, 0)
    }

    fn threshold(m: f32) -> ProximityThreshold {
        ProximityThreshold::new(m).unwrap()
    }

    #[test]
    fn centroid_is_integer_midpoint_of_first_box() {
        let dets = [det(100.0, 50.0, 200.0, 150.0), det(0.0, 0.0, 2.0, 2.0)];
        let c = extract_primary_centroid(&dets);
        assert_eq!(c, Some(Centroid::new(150, 100)));
    }

    #[test]
    fn centroid_floors_fractional_midpoints() {
        let c = extract_primary_centroid(&[det(10.5, 3.0, 13.0, 6.0)]);
        assert_eq!(c, Some(Centroid::new(11, 4)));
    }

    #[test]
    fn no_detections_means_no_centroid() {
        assert_eq!(extract_primary_centroid(&[]), None);
    }

    #[test]
    fn non_finite_box_has_no_centroid() {
        let depth = ConstantDepth::new(0.3);
        let raw = |x1: f32, y1: f32, x2: f32, y2: f32| {
            Detection::new(BoundingBox { x1, y1, x2, y2 }, 0.8, 0)
        };
        for bad in [
            raw(f32::NAN, 0.0, 4.0, 4.0),
            raw(0.0, 0.0, 4.0, f32::NAN),
            raw(0.0, 0.0, f32::INFINITY, 4.0),
        ] {
            let c = extract_primary_centroid(&[bad]);
            assert_eq!(c, None);
            let d = evaluate_proximity(c, &depth, threshold(1.0));
            assert_eq!(d, ProximityDecision::NOTHING_DETECTED);
        }
        assert_eq!(depth.queries.get(), 0);
    }

    #[test]
    fn first_detection_wins_over_more_confident_ones() {
        let weak = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.1, 0);
        let strong = Detection::new(BoundingBox::new(100.0, 100.0, 110.0, 110.0), 0.99, 0);
        assert_eq!(
            extract_primary_centroid(&[weak, strong]),
            Some(Centroid::new(5, 5))
        );
    }

    #[test]
    fn out_of_bounds_centroid_is_never_sampled() {
        let depth = ConstantDepth::new(0.2);
        for c in [
            Centroid::new(-1, 10),
            Centroid::new(10, -1),
            Centroid::new(640, 10),
            Centroid::new(10, 480),
        ] {
            for t in [0.1, 1.0, 100.0] {
                let d = evaluate_proximity(Some(c), &depth, threshold(t));
                assert_eq!(d.distance_m, None);
                assert_eq!(d.distance_or_zero(), 0.0);
                assert!(!d.too_close);
            }
        }
        assert_eq!(depth.queries.get(), 0);
    }

    #[test]
    fn edge_pixels_are_in_bounds() {
        let depth = ConstantDepth::new(0.5);
        let d = evaluate_proximity(Some(Centroid::new(639, 479)), &depth, threshold(1.0));
        assert_eq!(d.distance_m, Some(0.5));
        assert!(d.too_close);
    }

    #[test]
    fn decision_is_strictly_between_zero_and_threshold() {
        let c = Some(Centroid::new(320, 240));
        let cases = [(0.5, true), (0.0, false), (1.0, false), (2.0, false)];
        for (meters, expected) in cases {
            let d = evaluate_proximity(c, &ConstantDepth::new(meters), threshold(1.0));
            assert_eq!(d.too_close, expected, "distance {}", meters);
        }
    }

    #[test]
    fn zero_and_invalid_readings_are_unknown() {
        let c = Some(Centroid::new(1, 1));
        for meters in [0.0, -0.3, f32::NAN] {
            let d = evaluate_proximity(c, &ConstantDepth::new(meters), threshold(1.0));
            assert_eq!(d.distance_m, None);
            assert!(!d.too_close);
        }
    }

    #[test]
    fn no_centroid_yields_nothing_detected() {
        let depth = ConstantDepth::new(0.2);
        let d = evaluate_proximity(None, &depth, threshold(1.0));
        assert_eq!(d, ProximityDecision::NOTHING_DETECTED);
        assert_eq!(depth.queries.get(), 0);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let depth = ConstantDepth::new(0.7);
        let c = Some(Centroid::new(5, 5));
        let a = evaluate_proximity(c, &depth, threshold(1.0));
        let b = evaluate_proximity(c, &depth, threshold(1.0));
        assert_eq!(a, b);
    }

    #[test]
    fn threshold_rejects_non_positive_values() {
        assert!(ProximityThreshold::new(0.0).is_err());
        assert!(ProximityThreshold::new(-1.0).is_err());
        assert!(ProximityThreshold::new(f32::INFINITY).is_err());
        assert_eq!(ProximityThreshold::default().meters(), 1.0);
    }
}
