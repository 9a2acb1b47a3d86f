//! Routes as ordered lists of destinations.

use crate::lane::Lane;
use serde::{Deserialize, Serialize};

/// An ordered list of destination tags a vehicle must pass.
///
/// An empty route places no constraint on the lanes a vehicle may take.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    destinations: Vec<u32>,
}

impl Route {
    /// Creates a route through the given destinations.
    pub fn new(destinations: impl Into<Vec<u32>>) -> Self {
        Self {
            destinations: destinations.into(),
        }
    }

    /// The next destination.
    pub fn current(&self) -> Option<u32> {
        self.destinations.first().copied()
    }

    /// The remaining destinations.
    pub fn destinations(&self) -> &[u32] {
        &self.destinations
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Drops every destination up to and including `passed`, if the route contains it.
    ///
    /// Returns whether anything was dropped.
    pub fn truncate_past(&mut self, passed: u32) -> bool {
        match self.destinations.iter().position(|d| *d == passed) {
            Some(idx) => {
                self.destinations.drain(..=idx);
                true
            }
            None => false,
        }
    }

    /// Whether the route can still be followed from the given lane.
    pub fn is_feasible_from(&self, lane: &Lane) -> bool {
        self.current().map_or(true, |dest| lane.leads_to(dest))
    }

    /// Whether the route ends at the end of the given lane.
    pub fn ends_on(&self, lane: &Lane) -> bool {
        self.destinations.len() == 1 && lane.destination() == self.current()
    }

    /// Lane changes still needed from the given lane.
    pub fn n_lane_changes(&self, lane: &Lane) -> Option<u32> {
        match self.current() {
            Some(dest) => lane.n_lane_changes(dest),
            None => Some(0),
        }
    }

    /// Distance from `x` on the given lane within which the remaining lane changes
    /// must be made. Infinite without a destination.
    pub fn remaining_distance(&self, lane: &Lane, x: f64) -> Option<f64> {
        match self.current() {
            Some(dest) => lane.x_lane_changes(dest).map(|end| end - x),
            None => Some(f64::INFINITY),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lane::LaneAttributes;
    use crate::math::Point2d;
    use crate::network::Network;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn truncation_drops_the_consumed_prefix() {
        let mut route = Route::new(vec![3, 5, 9]);
        assert!(!route.truncate_past(4));
        assert_eq!(route.destinations(), &[3, 5, 9]);
        assert!(route.truncate_past(5));
        assert_eq!(route.current(), Some(9));
        assert!(route.truncate_past(9));
        assert!(route.is_empty());
    }

    #[test]
    fn lane_queries() {
        let mut b = Network::builder();
        let p = |x, y| Point2d::new(x, y);
        let a = b.add_lane(LaneAttributes::straight(1, p(0.0, 0.0), p(200.0, 0.0), 20.0)).unwrap();
        let c = b
            .add_lane(LaneAttributes::straight(2, p(200.0, 0.0), p(250.0, 0.0), 20.0).with_destination(7))
            .unwrap();
        b.connect(a, c).unwrap();
        let net = b.build().unwrap();

        let route = Route::new(vec![7]);
        assert!(route.is_feasible_from(net.lane(a)));
        assert!(route.ends_on(net.lane(c)));
        assert!(!route.ends_on(net.lane(a)));
        assert_eq!(route.n_lane_changes(net.lane(a)), Some(0));
        assert_approx_eq!(route.remaining_distance(net.lane(a), 50.0).unwrap(), 200.0);

        let elsewhere = Route::new(vec![8]);
        assert!(!elsewhere.is_feasible_from(net.lane(a)));
        assert!(Route::default().is_feasible_from(net.lane(a)));
    }
}
