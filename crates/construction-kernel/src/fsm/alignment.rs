//! Lane alignment points.

use crate::geometry::Vec3d;
use crate::lane::LaneGeometry;

/// Closest point to `pos` on the segment `a`-`b`.
pub fn nearest_on_segment(a: Vec3d, b: Vec3d, pos: Vec3d) -> Vec3d {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq <= f64::EPSILON {
        return a;
    }
    let t = ((pos - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Where a robot should join a lane's ingress or egress centerline.
pub struct LaneAlignment;

impl LaneAlignment {
    pub fn ingress(lane: &LaneGeometry, pos: Vec3d) -> Vec3d {
        nearest_on_segment(lane.ingress_entry, lane.ingress_end, pos)
    }

    pub fn egress(lane: &LaneGeometry, pos: Vec3d) -> Vec3d {
        nearest_on_segment(lane.egress_start, lane.egress_exit, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_clamps_to_segment() {
        let a = Vec3d::new(0.0, 0.0, 0.0);
        let b = Vec3d::new(0.0, 4.0, 0.0);

        assert_eq!(
            nearest_on_segment(a, b, Vec3d::new(3.0, 2.0, 0.0)),
            Vec3d::new(0.0, 2.0, 0.0)
        );
        assert_eq!(nearest_on_segment(a, b, Vec3d::new(1.0, -5.0, 0.0)), a);
        assert_eq!(nearest_on_segment(a, b, Vec3d::new(1.0, 9.0, 0.0)), b);
        assert_eq!(nearest_on_segment(a, a, Vec3d::new(1.0, 9.0, 0.0)), a);
    }
}
