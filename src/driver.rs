//! Drivers: whatever decides how a vehicle accelerates and changes lanes.

use crate::config::BarrierFallback;
use crate::controller::StepClock;
use crate::lane::Lane;
use crate::network::Network;
use crate::route::Route;
use crate::rsu::LightState;
use crate::simulation::Scratch;
use crate::topology::{Enclosure, Lateral, Longitudinal};
use crate::vehicle::Vehicle;
use crate::{LaneId, RsuSet, VehicleId, VehicleSet};
use smallvec::SmallVec;
use std::time::Instant;

pub use external::{Action, AgentHandle, ExternalDriver, Percept};
pub use idm::{Candidates, IdmInput, IdmParams};
pub use lmrs::{Desire, LmrsDriver};
pub use params::{Param, ParamDistribution, ParameterTable, Parameters};

mod external;
mod idm;
mod lmrs;
mod params;

/// What a driver wants its vehicle to do this step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    /// The acceleration in m/s^2; limited by the vehicle when applied.
    pub acceleration: f64,
    pub lane_change: LaneChangeIntent,
}

/// The lateral part of a [`Decision`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LaneChangeIntent {
    /// Stay in lane, or carry on with a lane change in progress.
    #[default]
    Keep,
    /// Start changing lanes.
    Start(Lateral),
    /// Show the turn indicator without changing lanes.
    Indicate(Lateral),
    /// Abandon the lane change in progress.
    Abort,
}

impl Decision {
    /// Keep speed and lane.
    pub fn maintain() -> Self {
        Self {
            acceleration: 0.0,
            lane_change: LaneChangeIntent::Keep,
        }
    }

    /// Brake as hard as the vehicle can.
    pub fn full_stop(vehicle: &Vehicle) -> Self {
        Self {
            acceleration: -vehicle.max_dec(),
            lane_change: LaneChangeIntent::Keep,
        }
    }
}

impl Default for Decision {
    fn default() -> Self {
        Self::maintain()
    }
}

/// Decides for one vehicle, once per step.
///
/// `decide` is called for every active vehicle after sensing. Drivers that can decide
/// on the spot return `true`. Drivers that wait on an outside party return `false` and
/// are then given until the step's deadline in `await_decision`. A driver that misses
/// the deadline has `apply_fallback` called instead. `drive` hands the decision over
/// once every driver has decided.
pub trait Driver {
    /// The role of the driver, such as the vehicle class it was created for.
    fn tag(&self) -> &str;

    fn route(&self) -> &Route;

    fn route_mut(&mut self) -> &mut Route;

    /// Computes this step's decision. Returns whether it is ready.
    fn decide(&mut self, ctx: &mut DecisionContext) -> bool;

    /// Blocks until a pending decision for `step` arrives or the deadline passes.
    /// Returns whether the decision arrived.
    fn await_decision(&mut self, _step: u64, _deadline: Option<Instant>) -> bool {
        true
    }

    /// Replaces a decision that did not arrive in time.
    fn apply_fallback(&mut self, fallback: BarrierFallback, vehicle: &Vehicle);

    /// The decision to apply this step.
    fn drive(&mut self) -> Decision;
}

/// A vehicle found in a neighbour slot, as seen from the deciding vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Headway {
    pub vehicle: VehicleId,
    /// Net bumper to bumper gap in m; negative when the vehicles overlap.
    pub gap: f64,
    /// The other vehicle's speed in m/s.
    pub speed: f64,
}

/// Everything a driver may look at when deciding.
pub struct DecisionContext<'a> {
    pub clock: StepClock,
    /// The vehicle being driven.
    pub vehicle: &'a Vehicle,
    pub vehicles: &'a VehicleSet,
    pub network: &'a Network,
    pub rsus: &'a RsuSet,
    pub scratch: &'a mut Scratch,
}

impl<'a> DecisionContext<'a> {
    /// The lane the vehicle is on.
    pub fn lane(&self) -> &'a Lane {
        self.network.lane(self.vehicle.lane())
    }

    /// The offset from lane `to` coordinates to lane `from` coordinates.
    pub fn x_adj(&mut self, from: LaneId, to: LaneId) -> f64 {
        self.scratch.x_adj(self.network, from, to)
    }

    /// The cached neighbour in a slot.
    pub fn neighbour(&self, enclosure: Enclosure) -> Option<&'a Vehicle> {
        let vehicles = self.vehicles;
        self.vehicle
            .neighbour(enclosure)
            .and_then(|id| vehicles.get(id))
    }

    /// The speed the driver would like to travel at on the given lane.
    pub fn desired_speed_on(&self, lane: &Lane, f_speed: f64) -> f64 {
        f64::min(self.vehicle.max_speed(), f_speed * lane.speed_limit())
    }

    /// The gap to the cached neighbour in a slot.
    ///
    /// Gaps to vehicles on an adjacent lane are measured on that lane, from the
    /// position corresponding to the vehicle's own.
    pub fn headway(&mut self, enclosure: Enclosure) -> Option<Headway> {
        let other = self.neighbour(enclosure)?;
        let me = self.vehicle;
        let (frame, reference) = match enclosure.lateral() {
            None => (me.lane(), me.x()),
            Some(dir) => self.network.adjacent_x(me.lane(), me.x(), dir)?,
        };
        let pos = other.x() + self.x_adj(frame, other.lane());
        let gap = match enclosure.longitudinal() {
            Some(Longitudinal::Up) => reference - (pos + other.length()),
            _ => pos - (reference + me.length()),
        };
        Some(Headway {
            vehicle: other.id(),
            gap,
            speed: other.speed(),
        })
    }

    /// The signals ahead on the vehicle's lane and the lanes downstream, with the
    /// distance from the vehicle's front to each.
    pub fn signals_ahead(&self, range: f64) -> SmallVec<[(f64, LightState); 2]> {
        let mut out = SmallVec::new();
        let start = self.vehicle.lane();
        let front = self.vehicle.front();
        let mut cur = start;
        let mut offset = 0.0;
        loop {
            let lane = self.network.lane(cur);
            for (x, id) in lane.rsus() {
                let dist = x + offset - front;
                if dist > range {
                    return out;
                }
                if dist < 0.0 {
                    continue;
                }
                if let Some(state) = self.rsus.get(id).and_then(|rsu| rsu.signal()) {
                    out.push((dist, state));
                }
            }
            offset += lane.length();
            match lane.longitudinal(Longitudinal::Down) {
                Some(next) if next != start && offset - front <= range => cur = next,
                _ => return out,
            }
        }
    }
}
