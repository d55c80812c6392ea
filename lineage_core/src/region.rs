//! Candidate daughter search around a mother cell.
//!
//! Candidates are all spots of the target frame within `radius` of the
//! mother. With the exclusion principle on and a known division axis, a
//! candidate must also lie roughly along that axis: the angle between the
//! axis line and the mother→candidate line may not exceed the tolerance.

use crate::graph::{distance_squared, NodeId, SpotStore};

/// Search parameters for one mother and target frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionQuery {
    /// Search radius (physical units)
    pub radius: f64,

    /// Division axis in the XY plane, if one could be fitted
    pub axis: Option<[f64; 2]>,

    /// Maximum deviation from the axis line (degrees)
    pub angle_tolerance_deg: f64,

    pub exclusion: bool,
}

/// Unsigned angle between two undirected lines, in degrees, in [0, 90].
///
/// Equal to `|atan((m1 − m2) / (1 + m1·m2))|` for slopes `m1`, `m2`
/// wherever that is defined; vertical lines need no special case.
pub fn line_deviation_deg(a: [f64; 2], b: [f64; 2]) -> f64 {
    let mut delta = a[1].atan2(a[0]) - b[1].atan2(b[0]);
    // Lines are undirected: fold into (-90°, 90°]
    let half_turn = std::f64::consts::PI;
    while delta > half_turn / 2.0 {
        delta -= half_turn;
    }
    while delta <= -half_turn / 2.0 {
        delta += half_turn;
    }
    delta.to_degrees().abs()
}

/// Signed side of `point` relative to the line through `origin` along `axis`.
pub fn side_of_axis(origin: [f64; 2], axis: [f64; 2], point: [f64; 2]) -> f64 {
    axis[0] * (point[1] - origin[1]) - axis[1] * (point[0] - origin[0])
}

/// Whether two points lie strictly on opposite sides of the axis line.
pub fn on_opposite_sides(origin: [f64; 2], axis: [f64; 2], a: [f64; 2], b: [f64; 2]) -> bool {
    side_of_axis(origin, axis, a) * side_of_axis(origin, axis, b) < 0.0
}

/// Spots in `frame` that may be daughters of `mother`.
pub fn candidate_region(spots: &SpotStore, mother: NodeId, frame: usize, query: &RegionQuery) -> Vec<NodeId> {
    let Some(mother_spot) = spots.get(mother) else {
        return Vec::new();
    };
    let origin = mother_spot.position();
    let radius_sq = query.radius * query.radius;

    spots
        .in_frame(frame)
        .iter()
        .copied()
        .filter(|&candidate| candidate != mother)
        .filter(|&candidate| {
            let Some(spot) = spots.get(candidate) else { return false };
            let position = spot.position();
            if distance_squared(origin, position) > radius_sq {
                return false;
            }
            match (query.exclusion, query.axis) {
                (true, Some(axis)) => {
                    let direction = [position[0] - origin[0], position[1] - origin[1]];
                    if direction == [0.0, 0.0] {
                        // No line to compare against
                        return false;
                    }
                    line_deviation_deg(axis, direction) <= query.angle_tolerance_deg
                }
                _ => true,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Spot;
    use approx::assert_relative_eq;

    #[test]
    fn test_deviation_matches_slope_formula() {
        let slope = |v: [f64; 2]| v[1] / v[0];
        for (a, b) in [([1.0, 1.0], [1.0, 2.0]), ([2.0, -1.0], [1.0, 3.0]), ([1.0, 0.2], [-3.0, 1.0])] {
            let (m1, m2) = (slope(a), slope(b));
            let expected = ((m1 - m2) / (1.0 + m1 * m2)).atan().to_degrees().abs();
            assert_relative_eq!(line_deviation_deg(a, b), expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_deviation_handles_vertical_lines() {
        assert_relative_eq!(line_deviation_deg([0.0, 1.0], [0.0, -4.0]), 0.0, epsilon = 1e-9);
        assert_relative_eq!(line_deviation_deg([0.0, 1.0], [1.0, 0.0]), 90.0, epsilon = 1e-9);
        assert_relative_eq!(line_deviation_deg([0.0, 1.0], [1.0, 1.0]), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_opposite_sides_of_slope_one_axis() {
        let origin = [0.0, 0.0];
        let axis = [1.0, 1.0];
        assert!(on_opposite_sides(origin, axis, [1.0, 2.0], [3.0, 1.0]));
        assert!(!on_opposite_sides(origin, axis, [1.0, 2.0], [2.0, 3.0]));
        // On the line is neither side
        assert!(!on_opposite_sides(origin, axis, [1.0, 1.0], [3.0, 1.0]));
    }

    #[test]
    fn test_candidate_region_radius_and_angle() {
        let mut spots = SpotStore::new();
        let mother = spots.add(Spot::new([10.0, 10.0, 0.0], 0, 2.0));
        let along = spots.add(Spot::new([14.0, 10.5, 0.0], 1, 2.0));
        let across = spots.add(Spot::new([10.0, 14.0, 0.0], 1, 2.0));
        let far = spots.add(Spot::new([30.0, 10.0, 0.0], 1, 2.0));

        let mut query = RegionQuery {
            radius: 6.0,
            axis: Some([1.0, 0.0]),
            angle_tolerance_deg: 30.0,
            exclusion: true,
        };
        assert_eq!(candidate_region(&spots, mother, 1, &query), vec![along]);

        query.exclusion = false;
        assert_eq!(candidate_region(&spots, mother, 1, &query), vec![along, across]);

        query.exclusion = true;
        query.axis = None;
        let found = candidate_region(&spots, mother, 1, &query);
        assert!(!found.contains(&far));
        assert_eq!(found.len(), 2);
    }
}
