//! Turn-angle analysis of a node against its recorded neighbours.
//!
//! Neighbour positions are treated as planar `(lng, lat)` vectors from the
//! node; at route scale the distortion is irrelevant to the thresholds.

use crate::Coordinates;
use serde::{Deserialize, Serialize};

/// Angle below which a node counts as a sharp curve.
pub const SHARP_CURVE_DEGREES: f64 = 30.0;
/// Angle below which a node counts as a moderate curve.
pub const CURVE_DEGREES: f64 = 90.0;

/// Road alignment label, named as the model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    #[serde(rename = "STRAIGHT AND LEVEL")]
    StraightAndLevel,
    #[serde(rename = "CURVE, LEVEL")]
    CurveLevel,
    #[serde(rename = "CURVE ON GRADE")]
    CurveOnGrade,
}

impl Alignment {
    /// Classify a turn angle in degrees.
    pub fn from_angle(angle: Option<f64>) -> Self {
        match angle {
            Some(a) if a < SHARP_CURVE_DEGREES => Self::CurveLevel,
            Some(a) if a < CURVE_DEGREES => Self::CurveOnGrade,
            _ => Self::StraightAndLevel,
        }
    }
}

/// Result of [`curvature`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Curvature {
    /// Median pairwise angle, `None` with fewer than two neighbours.
    pub angle_degrees: Option<f64>,
    pub alignment: Alignment,
}

/// Angle at `at` between the directions to `a` and `b`, in degrees,
/// rounded to two decimals. A zero-length direction counts as a straight
/// line (180°).
fn angle_between(a: Coordinates, at: Coordinates, b: Coordinates) -> f64 {
    let v1 = (a.lng - at.lng, a.lat - at.lat);
    let v2 = (b.lng - at.lng, b.lat - at.lat);
    let n1 = v1.0.hypot(v1.1);
    let n2 = v2.0.hypot(v2.1);
    if n1 == 0.0 || n2 == 0.0 {
        return 180.0;
    }
    let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
    (cos.acos().to_degrees() * 100.0).round() / 100.0
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Turn angle at `node` from every unordered pair of `neighbors`, reduced
/// by median, and the resulting alignment.
///
/// The median makes the result independent of neighbour order.
pub fn curvature(node: Coordinates, neighbors: &[Coordinates]) -> Curvature {
    if neighbors.len() < 2 {
        return Curvature {
            angle_degrees: None,
            alignment: Alignment::StraightAndLevel,
        };
    }

    let mut angles = Vec::with_capacity(neighbors.len() * (neighbors.len() - 1) / 2);
    for (i, a) in neighbors.iter().enumerate() {
        for b in &neighbors[i + 1..] {
            let angle = angle_between(*a, node, *b);
            if angle.is_finite() {
                angles.push(angle);
            }
        }
    }

    let angle_degrees = median(angles);
    Curvature {
        angle_degrees,
        alignment: Alignment::from_angle(angle_degrees),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lng: f64) -> Coordinates {
        Coordinates::new(lat, lng)
    }

    #[test]
    fn test_straight_line_is_180() {
        let r = curvature(c(0.0, 0.0), &[c(0.0, -1.0), c(0.0, 1.0)]);
        assert_eq!(r.angle_degrees, Some(180.0));
        assert_eq!(r.alignment, Alignment::StraightAndLevel);
    }

    #[test]
    fn test_right_angle_is_straight_and_level() {
        // Exactly 90° is not below the curve threshold.
        let r = curvature(c(0.0, 0.0), &[c(1.0, 0.0), c(0.0, 1.0)]);
        assert_eq!(r.angle_degrees, Some(90.0));
        assert_eq!(r.alignment, Alignment::StraightAndLevel);
    }

    #[test]
    fn test_hairpin_is_sharp_curve() {
        let r = curvature(c(0.0, 0.0), &[c(1.0, 0.1), c(1.0, -0.1)]);
        let angle = r.angle_degrees.unwrap();
        assert!(angle < 30.0, "got {angle}");
        assert_eq!(r.alignment, Alignment::CurveLevel);
    }

    #[test]
    fn test_moderate_bend_is_curve_on_grade() {
        // 45° between the two directions.
        let r = curvature(c(0.0, 0.0), &[c(0.0, 1.0), c(1.0, 1.0)]);
        assert_eq!(r.angle_degrees, Some(45.0));
        assert_eq!(r.alignment, Alignment::CurveOnGrade);
    }

    #[test]
    fn test_fewer_than_two_neighbours() {
        for n in [vec![], vec![c(1.0, 1.0)]] {
            let r = curvature(c(0.0, 0.0), &n);
            assert_eq!(r.angle_degrees, None);
            assert_eq!(r.alignment, Alignment::StraightAndLevel);
        }
    }

    #[test]
    fn test_coincident_neighbour_counts_as_straight() {
        let r = curvature(c(0.0, 0.0), &[c(0.0, 0.0), c(1.0, 1.0)]);
        assert_eq!(r.angle_degrees, Some(180.0));
    }

    #[test]
    fn test_median_of_even_count_averages_middle_pair() {
        assert_eq!(median(vec![10.0, 40.0, 20.0, 30.0]), Some(25.0));
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn test_invariant_under_neighbour_reordering() {
        let node = c(30.0, 120.0);
        let neighbours = vec![
            c(30.01, 120.0),
            c(29.99, 120.02),
            c(30.0, 119.98),
            c(30.02, 120.03),
        ];
        let expected = curvature(node, &neighbours);

        // Every rotation and the reversal of the list.
        for shift in 0..neighbours.len() {
            let mut rotated = neighbours.clone();
            rotated.rotate_left(shift);
            assert_eq!(curvature(node, &rotated), expected, "rotation {shift}");
            rotated.reverse();
            assert_eq!(curvature(node, &rotated), expected, "reversed rotation {shift}");
        }
    }

    #[test]
    fn test_alignment_serialises_model_labels() {
        assert_eq!(
            serde_json::to_string(&Alignment::CurveLevel).unwrap(),
            r#""CURVE, LEVEL""#
        );
    }
}
