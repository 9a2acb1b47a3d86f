//! The lane graph and spatial queries over it.

use crate::lane::Lane;
use crate::topology::{Enclosure, Lateral, Longitudinal};
use crate::vehicle::Vehicle;
use crate::{LaneId, LaneSet, VehicleId, VehicleSet};
use smallvec::SmallVec;
use std::collections::HashMap;

pub use builder::NetworkBuilder;

mod builder;
mod destinations;

/// A vehicle found ahead of a reference position, with its distance.
pub type Leaders = SmallVec<[(VehicleId, f64); 8]>;

/// An initialised lane network.
///
/// The topology is immutable once built; only the vehicle lists of the lanes change.
pub struct Network {
    lanes: LaneSet,
    numbers: HashMap<u32, LaneId>,
    destinations: Vec<u32>,
}

impl Network {
    /// Starts building a network.
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Gets the lane with the given ID.
    pub fn lane(&self, id: LaneId) -> &Lane {
        &self.lanes[id]
    }

    /// Gets the lane with the given ID, if it exists.
    pub fn get(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id)
    }

    /// Looks a lane up by its map provider ID.
    pub fn lane_by_number(&self, number: u32) -> Option<LaneId> {
        self.numbers.get(&number).copied()
    }

    /// Returns an iterator over all the lanes.
    pub fn lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    /// The destination tags present in the network.
    pub fn destinations(&self) -> &[u32] {
        &self.destinations
    }

    pub(crate) fn lane_mut(&mut self, id: LaneId) -> &mut Lane {
        &mut self.lanes[id]
    }

    pub(crate) fn lanes_mut(&mut self) -> impl Iterator<Item = &mut Lane> {
        self.lanes.values_mut()
    }

    /// The offset to add to a position on lane `to` to express it
    /// in the coordinates of lane `from`.
    ///
    /// Lanes that are not longitudinally connected have an offset of 0.
    pub fn x_adj(&self, from: LaneId, to: LaneId) -> f64 {
        if from == to {
            return 0.0;
        }

        // Look downstream
        let mut offset = 0.0;
        let mut cur = from;
        for _ in 0..self.lanes.len() {
            let lane = &self.lanes[cur];
            offset += lane.length();
            match lane.down {
                Some(next) if next == to => return offset,
                Some(next) if next != from => cur = next,
                _ => break,
            }
        }

        // Look upstream
        let mut offset = 0.0;
        let mut cur = from;
        for _ in 0..self.lanes.len() {
            match self.lanes[cur].up {
                Some(prev) => {
                    offset -= self.lanes[prev].length();
                    if prev == to {
                        return offset;
                    }
                    if prev == from {
                        break;
                    }
                    cur = prev;
                }
                None => break,
            }
        }

        0.0
    }

    /// Maps a position on lane `from` to the corresponding position on lane `to`.
    ///
    /// Laterally connected lanes with matching polylines are mapped segment by segment,
    /// which preserves curvature. Anything else is scaled by the ratio of lane lengths.
    /// Positions beyond the end of `from` keep their overshoot.
    pub fn map_x(&self, from: LaneId, to: LaneId, x: f64) -> f64 {
        map_between(&self.lanes, from, to, x)
    }

    /// The lane to the side of `lane` and the position on it corresponding to `x`.
    pub fn adjacent_x(&self, lane: LaneId, x: f64, dir: Lateral) -> Option<(LaneId, f64)> {
        let adj = self.lanes[lane].lateral(dir)?;
        Some((adj, self.map_x(lane, adj, x)))
    }

    /// Finds the first vehicle reachable from position `x` on `lane`, searching
    /// in the given direction and crossing lane boundaries as needed.
    ///
    /// Downstream, vehicles at exactly `x` are included; upstream they are not.
    pub fn find_vehicle(
        &self,
        vehicles: &VehicleSet,
        lane: LaneId,
        x: f64,
        dir: Longitudinal,
    ) -> Option<VehicleId> {
        let list = &self.lanes[lane].vehicles;
        match dir {
            Longitudinal::Down => {
                let idx = list.partition_point(|v| vehicles[*v].x() < x);
                if let Some(id) = list.get(idx) {
                    return Some(*id);
                }
            }
            Longitudinal::Up => {
                let idx = list.partition_point(|v| vehicles[*v].x() < x);
                if idx > 0 {
                    return Some(list[idx - 1]);
                }
            }
        }
        self.first_beyond(lane, dir)
    }

    /// The nearest vehicle on the lanes beyond `lane` in the given direction.
    fn first_beyond(&self, lane: LaneId, dir: Longitudinal) -> Option<VehicleId> {
        let mut cur = lane;
        for _ in 0..self.lanes.len() {
            cur = self.lanes[cur].longitudinal(dir)?;
            if cur == lane {
                return None;
            }
            let list = &self.lanes[cur].vehicles;
            let found = match dir {
                Longitudinal::Down => list.first(),
                Longitudinal::Up => list.last(),
            };
            if found.is_some() {
                return found.copied();
            }
        }
        None
    }

    /// Finds the vehicle in the given slot relative to `vehicle`.
    pub fn search(
        &self,
        vehicles: &VehicleSet,
        vehicle: &Vehicle,
        enclosure: Enclosure,
    ) -> Option<VehicleId> {
        let lane = vehicle.lane();
        let x = vehicle.x();
        match (enclosure.lateral(), enclosure.longitudinal()) {
            (None, None) => Some(vehicle.id()),
            (None, Some(dir)) => {
                let list = &self.lanes[lane].vehicles;
                match list.iter().position(|v| *v == vehicle.id()) {
                    Some(idx) => {
                        let local = match dir {
                            Longitudinal::Down => list.get(idx + 1),
                            Longitudinal::Up => idx.checked_sub(1).and_then(|i| list.get(i)),
                        };
                        local.copied().or_else(|| self.first_beyond(lane, dir))
                    }
                    None => self.find_vehicle(vehicles, lane, x, dir),
                }
            }
            (Some(lat), Some(dir)) => {
                let (adj, adj_x) = self.adjacent_x(lane, x, lat)?;
                self.find_vehicle(vehicles, adj, adj_x, dir)
            }
            (Some(lat), None) => {
                let (adj, adj_x) = self.adjacent_x(lane, x, lat)?;
                let own = crate::util::Interval::new(adj_x, adj_x + vehicle.length());
                [Longitudinal::Down, Longitudinal::Up]
                    .into_iter()
                    .filter_map(|dir| self.find_vehicle(vehicles, adj, adj_x, dir))
                    .find(|id| {
                        let other = &vehicles[*id];
                        let pos = other.x() + self.x_adj(adj, other.lane());
                        own.overlaps(&crate::util::Interval::new(pos, pos + other.length()))
                    })
            }
        }
    }

    /// Collects the vehicles whose rear lies within `range` downstream of `x` on `lane`,
    /// together with their distance from `x`, nearest first.
    pub fn leaders_within(
        &self,
        vehicles: &VehicleSet,
        lane: LaneId,
        x: f64,
        range: f64,
    ) -> Leaders {
        let mut out = Leaders::new();
        let mut cur = lane;
        let mut offset = 0.0;
        for _ in 0..self.lanes.len() {
            let l = &self.lanes[cur];
            let start = if cur == lane {
                l.vehicles.partition_point(|v| vehicles[*v].x() < x)
            } else {
                0
            };
            for id in &l.vehicles[start..] {
                let dist = vehicles[*id].x() + offset - x;
                if dist > range {
                    return out;
                }
                out.push((*id, dist));
            }
            offset += l.length();
            if offset - x > range {
                break;
            }
            match l.down {
                Some(next) if next != lane => cur = next,
                _ => break,
            }
        }
        out
    }

    /// The distance from `x` on `lane` to the end of the last lane downstream,
    /// capped at `limit`.
    pub fn dist_to_dead_end(&self, lane: LaneId, x: f64, limit: f64) -> f64 {
        let mut dist = self.lanes[lane].length() - x;
        let mut cur = lane;
        while dist < limit {
            match self.lanes[cur].down {
                Some(next) if next != lane => {
                    cur = next;
                    dist += self.lanes[cur].length();
                }
                _ => return dist,
            }
        }
        limit
    }
}

fn map_between(lanes: &LaneSet, from: LaneId, to: LaneId, x: f64) -> f64 {
    let (src, dst) = (&lanes[from], &lanes[to]);
    let overshoot = (x - src.length()).max(0.0);
    let x = x.min(src.length());
    let lateral = src.left == Some(to) || src.right == Some(to);
    let mapped = if lateral && src.curve().num_segments() == dst.curve().num_segments() {
        let (segment, frac) = src.curve().segment_at(x);
        dst.curve().pos_at(segment, frac)
    } else {
        x * dst.length() / src.length()
    };
    mapped + overshoot
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lane::LaneAttributes;
    use crate::math::Point2d;
    use crate::vehicle::VehicleAttributes;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::SlotMap;

    fn straight(number: u32, x0: f64, x1: f64, y: f64) -> LaneAttributes {
        LaneAttributes::straight(number, Point2d::new(x0, y), Point2d::new(x1, y), 25.0)
    }

    /// Three lanes in a row (100, 50, 200 m).
    fn chain() -> (Network, [LaneId; 3]) {
        let mut b = Network::builder();
        let a = b.add_lane(straight(1, 0.0, 100.0, 0.0)).unwrap();
        let m = b.add_lane(straight(2, 100.0, 150.0, 0.0)).unwrap();
        let c = b.add_lane(straight(3, 150.0, 350.0, 0.0)).unwrap();
        b.connect(a, m).unwrap();
        b.connect(m, c).unwrap();
        (b.build().unwrap(), [a, m, c])
    }

    fn place(net: &mut Network, vehicles: &mut VehicleSet, lane: LaneId, x: f64) -> VehicleId {
        let id = vehicles.insert_with_key(|id| {
            Vehicle::new(id, 0, &VehicleAttributes::default(), lane, x, 0.0)
        });
        net.lane_mut(lane).insert_vehicle(vehicles, id);
        id
    }

    #[test]
    fn x_adj_is_antisymmetric() {
        let (net, [a, m, c]) = chain();
        assert_approx_eq!(net.x_adj(a, m), 100.0);
        assert_approx_eq!(net.x_adj(a, c), 150.0);
        assert_approx_eq!(net.x_adj(c, a), -150.0);
        for (p, q) in [(a, m), (m, c), (a, c)] {
            assert_approx_eq!(net.x_adj(p, q), -net.x_adj(q, p));
        }
        assert_eq!(net.x_adj(m, m), 0.0);
    }

    #[test]
    fn unrelated_lanes_have_no_offset() {
        let mut b = Network::builder();
        let a = b.add_lane(straight(1, 0.0, 100.0, 0.0)).unwrap();
        let c = b.add_lane(straight(2, 0.0, 100.0, 10.0)).unwrap();
        let net = b.build().unwrap();
        assert_eq!(net.x_adj(a, c), 0.0);
    }

    #[test]
    fn find_vehicle_crosses_lanes() {
        let (mut net, [a, m, c]) = chain();
        let mut vehicles: VehicleSet = SlotMap::with_key();
        let v1 = place(&mut net, &mut vehicles, a, 20.0);
        let v2 = place(&mut net, &mut vehicles, c, 30.0);

        assert_eq!(net.find_vehicle(&vehicles, a, 10.0, Longitudinal::Down), Some(v1));
        assert_eq!(net.find_vehicle(&vehicles, a, 30.0, Longitudinal::Down), Some(v2));
        assert_eq!(net.find_vehicle(&vehicles, m, 0.0, Longitudinal::Up), Some(v1));
        assert_eq!(net.find_vehicle(&vehicles, c, 10.0, Longitudinal::Up), Some(v1));
        assert_eq!(net.find_vehicle(&vehicles, c, 40.0, Longitudinal::Down), None);
        assert_eq!(net.find_vehicle(&vehicles, a, 10.0, Longitudinal::Up), None);
    }

    #[test]
    fn leaders_within_range() {
        let (mut net, [a, _, c]) = chain();
        let mut vehicles: VehicleSet = SlotMap::with_key();
        place(&mut net, &mut vehicles, a, 20.0);
        place(&mut net, &mut vehicles, a, 60.0);
        let far = place(&mut net, &mut vehicles, c, 10.0);
        place(&mut net, &mut vehicles, c, 150.0);

        let leaders = net.leaders_within(&vehicles, a, 30.0, 140.0);
        assert_eq!(leaders.len(), 2);
        assert_approx_eq!(leaders[0].1, 30.0);
        assert_eq!(leaders[1].0, far);
        assert_approx_eq!(leaders[1].1, 130.0);
    }

    #[test]
    fn dead_end_distance() {
        let (net, [a, m, _]) = chain();
        assert_approx_eq!(net.dist_to_dead_end(a, 40.0, 1000.0), 310.0);
        assert_approx_eq!(net.dist_to_dead_end(m, 0.0, 100.0), 100.0);
    }

    #[test]
    fn lateral_mapping_follows_segments() {
        let mut b = Network::builder();
        let inner = b
            .add_lane(LaneAttributes {
                points: vec![Point2d::new(0.0, 0.0), Point2d::new(100.0, 0.0), Point2d::new(100.0, 100.0)],
                ..straight(1, 0.0, 1.0, 0.0)
            })
            .unwrap();
        let outer = b
            .add_lane(LaneAttributes {
                points: vec![Point2d::new(0.0, -4.0), Point2d::new(104.0, -4.0), Point2d::new(104.0, 100.0)],
                ..straight(2, 0.0, 1.0, 0.0)
            })
            .unwrap();
        let other = b.add_lane(straight(3, 0.0, 100.0, 50.0)).unwrap();
        b.connect_lateral(inner, outer, true, true).unwrap();
        let net = b.build().unwrap();

        // Halfway along the first segment maps to halfway along the other first segment
        assert_approx_eq!(net.map_x(inner, outer, 50.0), 52.0);
        // Start of the second segment
        assert_approx_eq!(net.map_x(inner, outer, 100.0), 104.0);
        // Not laterally connected: length ratio
        assert_approx_eq!(net.map_x(inner, other, 100.0), 50.0);
        let (lane, x) = net.adjacent_x(outer, 104.0, Lateral::Left).unwrap();
        assert_eq!(lane, inner);
        assert_approx_eq!(x, 100.0);
        assert!(net.adjacent_x(outer, 10.0, Lateral::Right).is_none());
    }

    #[test]
    fn search_finds_lateral_neighbours() {
        let mut b = Network::builder();
        let left = b.add_lane(straight(1, 0.0, 200.0, 4.0)).unwrap();
        let right = b.add_lane(straight(2, 0.0, 200.0, 0.0)).unwrap();
        b.connect_lateral(left, right, true, true).unwrap();
        let mut net = b.build().unwrap();
        let mut vehicles: VehicleSet = SlotMap::with_key();

        let me = place(&mut net, &mut vehicles, right, 100.0);
        let ahead = place(&mut net, &mut vehicles, right, 130.0);
        let behind_left = place(&mut net, &mut vehicles, left, 80.0);
        let beside_left = place(&mut net, &mut vehicles, left, 102.0);

        let own = &vehicles[me];
        assert_eq!(net.search(&vehicles, own, Enclosure::Current), Some(me));
        assert_eq!(net.search(&vehicles, own, Enclosure::Down), Some(ahead));
        assert_eq!(net.search(&vehicles, own, Enclosure::Up), None);
        assert_eq!(net.search(&vehicles, own, Enclosure::LeftDown), Some(beside_left));
        assert_eq!(net.search(&vehicles, own, Enclosure::LeftUp), Some(behind_left));
        assert_eq!(net.search(&vehicles, own, Enclosure::Left), Some(beside_left));
        assert_eq!(net.search(&vehicles, own, Enclosure::Right), None);
        assert_eq!(net.search(&vehicles, own, Enclosure::RightDown), None);

        let other = &vehicles[ahead];
        assert_eq!(net.search(&vehicles, other, Enclosure::Left), None);
        assert_eq!(net.search(&vehicles, other, Enclosure::Up), Some(me));
    }
}
