use crate::math::Point2d;
use crate::topology::{LaneType, Lateral, Longitudinal};
use crate::{LaneId, RsuId, VehicleId, VehicleSet};
use std::collections::HashMap;

pub use curve::{LaneCurve, LaneSample};

mod curve;

/// A single lane of traffic between two cross-sections.
#[derive(Clone, Debug)]
pub struct Lane {
    /// The lane ID.
    id: LaneId,
    /// The integer ID given by the map provider.
    number: u32,
    /// The role of the lane in the cross-section.
    kind: LaneType,
    /// The geometry of the lane.
    curve: LaneCurve,
    /// Speed limit in m/s.
    speed_limit: f64,
    /// The destination this lane ends at, if any.
    destination: Option<u32>,
    pub(crate) up: Option<LaneId>,
    pub(crate) down: Option<LaneId>,
    pub(crate) left: Option<LaneId>,
    pub(crate) right: Option<LaneId>,
    /// Itself if this lane is a taper, or the downstream taper it feeds.
    pub(crate) taper: Option<LaneId>,
    /// Whether vehicles may change to the left lane.
    go_left: bool,
    /// Whether vehicles may change to the right lane.
    go_right: bool,
    /// Whether a generator feeds vehicles onto this lane.
    pub(crate) fed: bool,
    /// Roadside units, ordered by position.
    pub(crate) rsus: Vec<(f64, RsuId)>,
    /// The vehicles on the lane, ordered by position.
    pub(crate) vehicles: Vec<VehicleId>,
    /// Number of lane changes required to reach each destination.
    pub(crate) lane_changes: HashMap<u32, u32>,
    /// Position before which those lane changes must be done.
    pub(crate) x_lane_changes: HashMap<u32, f64>,
}

/// The attributes of a lane, as supplied by a map provider.
#[derive(Clone, Debug)]
pub struct LaneAttributes {
    /// The integer ID of the lane; must be unique within a network.
    pub number: u32,
    /// The role of the lane.
    pub kind: LaneType,
    /// The centre line of the lane.
    pub points: Vec<Point2d>,
    /// The speed limit in m/s.
    pub speed_limit: f64,
    /// The destination tag at the end of the lane.
    pub destination: Option<u32>,
}

impl LaneAttributes {
    /// A normal lane along a straight line.
    pub fn straight(number: u32, from: Point2d, to: Point2d, speed_limit: f64) -> Self {
        Self {
            number,
            kind: LaneType::Normal,
            points: vec![from, to],
            speed_limit,
            destination: None,
        }
    }

    /// Sets the lane type.
    pub fn with_kind(mut self, kind: LaneType) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the destination tag.
    pub fn with_destination(mut self, destination: u32) -> Self {
        self.destination = Some(destination);
        self
    }
}

impl Lane {
    /// Creates a new unconnected lane.
    pub(crate) fn new(id: LaneId, attribs: &LaneAttributes, curve: LaneCurve) -> Self {
        Self {
            id,
            number: attribs.number,
            kind: attribs.kind,
            curve,
            speed_limit: attribs.speed_limit,
            destination: attribs.destination,
            up: None,
            down: None,
            left: None,
            right: None,
            taper: None,
            go_left: false,
            go_right: false,
            fed: false,
            rsus: vec![],
            vehicles: vec![],
            lane_changes: HashMap::new(),
            x_lane_changes: HashMap::new(),
        }
    }

    /// Gets the lane ID.
    pub fn id(&self) -> LaneId {
        self.id
    }

    /// Gets the integer ID given by the map provider.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Gets the lane type.
    pub fn kind(&self) -> LaneType {
        self.kind
    }

    /// Gets the length of the lane in m.
    pub fn length(&self) -> f64 {
        self.curve.length()
    }

    /// Gets the curve representing the lane's centre line.
    pub fn curve(&self) -> &LaneCurve {
        &self.curve
    }

    /// Gets the speed limit in m/s.
    pub fn speed_limit(&self) -> f64 {
        self.speed_limit
    }

    /// Gets the destination tag at the end of this lane.
    pub fn destination(&self) -> Option<u32> {
        self.destination
    }

    /// Gets the longitudinally adjacent lane.
    pub fn longitudinal(&self, dir: Longitudinal) -> Option<LaneId> {
        match dir {
            Longitudinal::Up => self.up,
            Longitudinal::Down => self.down,
        }
    }

    /// Gets the laterally adjacent lane, regardless of whether lane changes are permitted.
    pub fn lateral(&self, dir: Lateral) -> Option<LaneId> {
        match dir {
            Lateral::Left => self.left,
            Lateral::Right => self.right,
        }
    }

    /// Gets the taper this lane is or feeds into.
    pub fn taper(&self) -> Option<LaneId> {
        self.taper
    }

    /// Whether vehicles may change from this lane in the given direction.
    pub fn can_change(&self, dir: Lateral) -> bool {
        match dir {
            Lateral::Left => self.go_left && self.left.is_some(),
            Lateral::Right => self.go_right && self.right.is_some(),
        }
    }

    pub(crate) fn set_permission(&mut self, dir: Lateral, allowed: bool) {
        match dir {
            Lateral::Left => self.go_left = allowed,
            Lateral::Right => self.go_right = allowed,
        }
    }

    /// Whether a generator feeds this lane.
    pub fn is_fed(&self) -> bool {
        self.fed
    }

    /// Whether there is no lane downstream.
    pub fn is_dead_end(&self) -> bool {
        self.down.is_none()
    }

    /// Whether the destination can be reached from this lane.
    pub fn leads_to(&self, destination: u32) -> bool {
        self.lane_changes.contains_key(&destination)
    }

    /// The number of lane changes needed from this lane to reach the destination.
    pub fn n_lane_changes(&self, destination: u32) -> Option<u32> {
        self.lane_changes.get(&destination).copied()
    }

    /// The position on this lane before which the lane changes towards
    /// the destination must have been made.
    pub fn x_lane_changes(&self, destination: u32) -> Option<f64> {
        self.x_lane_changes.get(&destination).copied()
    }

    /// The vehicles on the lane, ordered by position.
    pub fn vehicles(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// The roadside units on the lane, ordered by position.
    pub fn rsus(&self) -> impl Iterator<Item = (f64, RsuId)> + '_ {
        self.rsus.iter().copied()
    }

    /// Inserts the vehicle with the given ID into the lane.
    pub(crate) fn insert_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        let x = vehicles[id].x();
        let idx = self.vehicles.partition_point(|v| vehicles[*v].x() <= x);
        self.vehicles.insert(idx, id);
    }

    /// Removes the vehicle with the given ID from the lane.
    pub(crate) fn remove_vehicle(&mut self, id: VehicleId) {
        if let Some(idx) = self.vehicles.iter().rposition(|v| *v == id) {
            self.vehicles.remove(idx);
        }
    }

    /// Restores the position order of the vehicle list after vehicles moved.
    pub(crate) fn sort_vehicles(&mut self, vehicles: &VehicleSet) {
        self.vehicles
            .sort_by(|a, b| vehicles[*a].x().total_cmp(&vehicles[*b].x()));
    }

    /// Attaches a roadside unit.
    pub(crate) fn insert_rsu(&mut self, x: f64, id: RsuId) {
        let idx = self.rsus.partition_point(|(pos, _)| *pos <= x);
        self.rsus.insert(idx, (x, id));
    }
}
