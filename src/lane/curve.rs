use crate::math::{lerp_point, normalize_or, rot90, Point2d, Vector2d};
use cgmath::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The centre line of a lane: a polyline parameterised by arc length.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaneCurve {
    points: Vec<Point2d>,
    /// Arc length at each point; starts at 0 and ends at the curve length.
    dists: Vec<f64>,
}

/// The result of sampling a [LaneCurve].
#[derive(Clone, Copy, Debug)]
pub struct LaneSample {
    /// The sampled point.
    pub pos: Point2d,
    /// The tangent unit vector of the lane.
    pub tan: Vector2d,
}

impl LaneSample {
    /// Offsets the sampled point laterally, positive to the left.
    pub fn lat_offset(&self, offset: f64) -> Point2d {
        self.pos + offset * rot90(self.tan)
    }
}

impl LaneCurve {
    /// Creates a curve through the given points.
    /// Returns `None` if there are fewer than two points or the curve has no length.
    pub fn new(points: &[Point2d]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let dists = std::iter::once(0.0)
            .chain(points.iter().tuple_windows().scan(0.0, |acc, (a, b)| {
                *acc += a.distance(*b);
                Some(*acc)
            }))
            .collect::<Vec<_>>();
        if dists.last().copied().unwrap_or(0.0) <= 0.0 {
            return None;
        }
        Some(Self {
            points: points.to_vec(),
            dists,
        })
    }

    /// The length of the curve in m.
    pub fn length(&self) -> f64 {
        self.dists[self.dists.len() - 1]
    }

    /// The points of the polyline.
    pub fn points(&self) -> &[Point2d] {
        &self.points
    }

    /// The number of segments of the polyline.
    pub fn num_segments(&self) -> usize {
        self.points.len() - 1
    }

    /// Locates an arc length position on the polyline,
    /// returning the segment index and the fraction along it.
    /// Positions beyond either end are clamped.
    pub fn segment_at(&self, pos: f64) -> (usize, f64) {
        let pos = pos.clamp(0.0, self.length());
        let idx = self
            .dists
            .partition_point(|d| *d <= pos)
            .saturating_sub(1)
            .min(self.num_segments() - 1);
        let seg_len = self.dists[idx + 1] - self.dists[idx];
        let frac = if seg_len > 0.0 {
            (pos - self.dists[idx]) / seg_len
        } else {
            0.0
        };
        (idx, frac.clamp(0.0, 1.0))
    }

    /// The arc length position at a fraction along the given segment.
    pub fn pos_at(&self, segment: usize, frac: f64) -> f64 {
        let idx = segment.min(self.num_segments() - 1);
        self.dists[idx] + frac * (self.dists[idx + 1] - self.dists[idx])
    }

    /// Samples the curve and returns the position and tangent unit vector.
    ///
    /// # Parameters
    /// * `pos` - The longitudinal position along the curve
    pub fn sample(&self, pos: f64) -> LaneSample {
        let (idx, frac) = self.segment_at(pos);
        let (a, b) = (self.points[idx], self.points[idx + 1]);
        LaneSample {
            pos: lerp_point(a, b, frac),
            tan: normalize_or(b - a, Vector2d::unit_x()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn bent() -> LaneCurve {
        LaneCurve::new(&[
            Point2d::new(0.0, 0.0),
            Point2d::new(30.0, 0.0),
            Point2d::new(30.0, 40.0),
        ])
        .unwrap()
    }

    #[test]
    fn length_is_arc_length() {
        assert_approx_eq!(bent().length(), 70.0);
    }

    #[test]
    fn curve_loads_from_json() {
        let json = serde_json::to_string(&bent()).unwrap();
        let curve: LaneCurve = serde_json::from_str(&json).unwrap();
        assert_eq!(curve.points().len(), 3);
        assert_approx_eq!(curve.length(), 70.0);
        assert_approx_eq!(curve.sample(50.0).pos.y, 20.0);
    }

    #[test]
    fn degenerate_curves_are_rejected() {
        assert!(LaneCurve::new(&[Point2d::new(1.0, 1.0)]).is_none());
        assert!(LaneCurve::new(&[Point2d::new(1.0, 1.0), Point2d::new(1.0, 1.0)]).is_none());
    }

    #[test]
    fn sample_follows_segments() {
        let curve = bent();
        let s = curve.sample(15.0);
        assert_approx_eq!(s.pos.x, 15.0);
        assert_approx_eq!(s.tan.x, 1.0);
        let s = curve.sample(50.0);
        assert_approx_eq!(s.pos.x, 30.0);
        assert_approx_eq!(s.pos.y, 20.0);
        assert_approx_eq!(s.tan.y, 1.0);
        let p = curve.sample(15.0).lat_offset(2.0);
        assert_approx_eq!(p.y, 2.0);
    }

    #[test]
    fn segment_lookup_round_trips() {
        let curve = bent();
        for pos in [0.0, 10.0, 30.0, 45.5, 70.0] {
            let (idx, frac) = curve.segment_at(pos);
            assert_approx_eq!(curve.pos_at(idx, frac), pos);
        }
        assert_eq!(curve.segment_at(-5.0), (0, 0.0));
        assert_eq!(curve.segment_at(100.0), (1, 1.0));
    }
}
