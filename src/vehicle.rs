use crate::math::{Point2d, Vector2d};
use crate::network::Network;
use crate::topology::{Enclosure, Lateral};
use crate::{LaneId, VehicleId};
use serde::{Deserialize, Serialize};

mod kinematics;

/// The lateral distance between adjacent lane centre lines, in m.
pub const LANE_WIDTH: f64 = 3.5;

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID
    id: VehicleId,
    /// Global admission order.
    serial: u64,
    /// The lane the vehicle is on.
    lane: LaneId,
    /// Position of the rear bumper along the lane, in m.
    x: f64,
    /// The speed in m/s.
    v: f64,
    /// The acceleration applied during the last move, in m/s^2.
    a: f64,
    length: f64,
    width: f64,
    /// Distance from vehicle's centre to centre of wheel axle.
    wheel_base: f64,
    max_speed: f64,
    max_acc: f64,
    /// Maximum deceleration, a positive number in m/s^2.
    max_dec: f64,
    /// Time taken by a lane change, in s.
    lane_change_duration: f64,
    /// The in-progress lane change, if there is one.
    lane_change: Option<LaneChange>,
    /// The direction the turn indicator shows.
    indicator: Option<Lateral>,
    /// Neighbour cache, indexed by [`Enclosure::slot`].
    neighbours: [Option<VehicleId>; 8],
    /// Whether the last move carried the vehicle onto another lane.
    just_exceeded_lane: bool,
    /// Whether the vehicle overlaps its leader.
    crashed: bool,
    /// The world space coordinates of the centre of the vehicle.
    world_pos: Point2d,
    /// A world space vector tangent to the vehicle's heading.
    world_dir: Vector2d,
}

/// The attributes of a simulated vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleAttributes {
    /// The vehicle length in m.
    pub length: f64,
    /// The vehicle width in m.
    pub width: f64,
    /// Distance from vehicle's centre to centre of wheel axle.
    pub wheel_base: f64,
    /// The maximum speed in m/s.
    pub max_speed: f64,
    /// The maximum acceleration of the vehicle, in m/s^2.
    pub max_acc: f64,
    /// The maximum deceleration of the vehicle, a positive number in m/s^2.
    pub max_dec: f64,
    /// Time taken by a lane change, in s.
    pub lane_change_duration: f64,
}

impl Default for VehicleAttributes {
    fn default() -> Self {
        Self {
            length: 4.5,
            width: 1.8,
            wheel_base: 1.5,
            max_speed: 50.0,
            max_acc: 3.0,
            max_dec: 8.0,
            lane_change_duration: 3.0,
        }
    }
}

/// Represents an in-progress lane change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneChange {
    /// The direction of the lane change.
    pub direction: Lateral,
    /// Fraction of the lateral movement done, in [0, 1].
    pub progress: f64,
    /// Progress made per step.
    pub rate: f64,
}

impl Vehicle {
    /// Creates a new vehicle.
    pub(crate) fn new(
        id: VehicleId,
        serial: u64,
        attributes: &VehicleAttributes,
        lane: LaneId,
        x: f64,
        v: f64,
    ) -> Self {
        Self {
            id,
            serial,
            lane,
            x,
            v,
            a: 0.0,
            length: attributes.length,
            width: attributes.width,
            wheel_base: attributes.wheel_base,
            max_speed: attributes.max_speed,
            max_acc: attributes.max_acc,
            max_dec: attributes.max_dec,
            lane_change_duration: attributes.lane_change_duration,
            lane_change: None,
            indicator: None,
            neighbours: [None; 8],
            just_exceeded_lane: false,
            crashed: false,
            world_pos: Point2d::new(0.0, 0.0),
            world_dir: Vector2d::new(0.0, 0.0),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The order in which the vehicle entered the simulation.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The lane the vehicle is on.
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// The position of the rear of the vehicle along its lane, in m.
    pub fn x(&self) -> f64 {
        self.x
    }

    /// The position of the front of the vehicle along its lane, in m.
    pub fn front(&self) -> f64 {
        self.x + self.length
    }

    /// The vehicle's speed in m/s.
    pub fn speed(&self) -> f64 {
        self.v
    }

    /// The vehicle's acceleration in m/s^2.
    pub fn acceleration(&self) -> f64 {
        self.a
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The vehicle's width in m.
    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn max_acc(&self) -> f64 {
        self.max_acc
    }

    pub fn max_dec(&self) -> f64 {
        self.max_dec
    }

    /// The lane change in progress.
    pub fn lane_change(&self) -> Option<&LaneChange> {
        self.lane_change.as_ref()
    }

    /// The direction the turn indicator shows.
    pub fn indicator(&self) -> Option<Lateral> {
        self.indicator
    }

    /// The cached neighbour in the given slot.
    pub fn neighbour(&self, enclosure: Enclosure) -> Option<VehicleId> {
        match enclosure.slot() {
            Some(slot) => self.neighbours[slot],
            None => Some(self.id),
        }
    }

    /// Whether the last move carried the vehicle onto another lane.
    pub fn just_exceeded_lane(&self) -> bool {
        self.just_exceeded_lane
    }

    /// Whether the vehicle has run into its leader.
    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    /// The coordinates in world space of the centre of the vehicle.
    pub fn position(&self) -> Point2d {
        self.world_pos
    }

    /// A unit vector in world space aligned with the vehicle's heading.
    pub fn direction(&self) -> Vector2d {
        self.world_dir
    }

    /// The vehicle's lateral offset from its lane's centre line, positive to the left.
    pub fn lateral_offset(&self) -> f64 {
        self.lane_change
            .map(|lc| lc.direction.sign() * lc.progress * LANE_WIDTH)
            .unwrap_or(0.0)
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.v < 0.1
    }

    /// Recomputes the neighbour cache and the crash flag.
    pub(crate) fn sense(&mut self, neighbours: [Option<VehicleId>; 8], crashed: bool) {
        self.neighbours = neighbours;
        self.crashed = crashed;
    }

    /// Forgets the lateral neighbours, whose lanes no longer apply.
    pub(crate) fn invalidate_lateral(&mut self) {
        for enclosure in Enclosure::NEIGHBOURS {
            if let (Some(_), Some(slot)) = (enclosure.lateral(), enclosure.slot()) {
                self.neighbours[slot] = None;
            }
        }
    }

    /// Sets the acceleration for the next move, within the vehicle's limits.
    pub(crate) fn set_acceleration(&mut self, acc: f64) {
        self.a = acc.clamp(-self.max_dec, self.max_acc);
    }

    /// Applies the maximum deceleration.
    pub(crate) fn emergency_stop(&mut self) {
        self.a = -self.max_dec;
    }

    pub(crate) fn set_indicator(&mut self, indicator: Option<Lateral>) {
        self.indicator = indicator;
    }

    /// Starts a lane change, unless one is already in progress.
    pub(crate) fn start_lane_change(&mut self, direction: Lateral, dt: f64) -> bool {
        if self.lane_change.is_some() {
            return false;
        }
        self.lane_change = Some(LaneChange {
            direction,
            progress: 0.0,
            rate: (dt / self.lane_change_duration.max(dt)).min(1.0),
        });
        self.indicator = Some(direction);
        true
    }

    /// Abandons the lane change in progress.
    pub(crate) fn abort_lane_change(&mut self) {
        self.lane_change = None;
        self.indicator = None;
    }

    /// Integrates the vehicle's speed, position and lateral progress.
    /// Returns the distance travelled.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    pub(crate) fn integrate(&mut self, dt: f64) -> f64 {
        let (dx, v) = kinematics::integrate(self.v, self.a, dt);
        self.x += dx;
        self.v = v.min(self.max_speed.max(self.v));
        if let Some(lc) = self.lane_change.as_mut() {
            lc.progress = (lc.progress + lc.rate).min(1.0);
        }
        self.just_exceeded_lane = false;
        dx
    }

    /// The direction of a lane change that has made it fully across.
    pub(crate) fn completed_lane_change(&self) -> Option<Lateral> {
        self.lane_change
            .filter(|lc| lc.progress >= 1.0 - 1e-9)
            .map(|lc| lc.direction)
    }

    /// Moves the vehicle onto the lane it was changing to.
    pub(crate) fn finish_lane_change(&mut self, lane: LaneId, x: f64) {
        self.lane = lane;
        self.x = x;
        self.lane_change = None;
        self.indicator = None;
        self.neighbours = [None; 8];
    }

    /// Carries the vehicle over onto the downstream lane.
    pub(crate) fn transfer(&mut self, lane: LaneId, x: f64) {
        self.lane = lane;
        self.x = x;
        self.just_exceeded_lane = true;
    }

    /// Updates the vehicle's world coordinates
    pub(crate) fn update_coords(&mut self, network: &Network) {
        let lane = network.lane(self.lane);
        let sample = lane.curve().sample(self.x + 0.5 * self.length);
        let pos = sample.lat_offset(self.lateral_offset());

        // Default `world_dir` to be tangent to the lane
        if self.world_dir == Vector2d::new(0.0, 0.0) {
            self.world_pos = pos - sample.tan;
            self.world_dir = sample.tan;
        }

        self.world_dir = kinematics::heading(self.world_pos, self.world_dir, pos, self.wheel_base);
        self.world_pos = pos;
    }
}
