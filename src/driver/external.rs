//! Drivers whose decisions are made by an agent outside the simulation loop.
//!
//! Each external driver is connected to its agent by a pair of channels. Every step the
//! driver sends a [`Percept`] tagged with the step index, and the agent answers with one
//! [`Action`] for that step.

use super::{Decision, DecisionContext, Driver, LaneChangeIntent};
use crate::config::BarrierFallback;
use crate::route::Route;
use crate::rsu::LightState;
use crate::topology::{Enclosure, Lateral, Longitudinal};
use crate::vehicle::Vehicle;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A leader or red signal closer than this blocks the vehicle, in m.
const BLOCKED_GAP: f64 = 3.0;

/// What an agent is told about its vehicle each step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Percept {
    /// Simulated time in s.
    pub time: f64,
    /// Step size in s.
    pub dt: f64,
    pub serial: u64,
    pub speed: f64,
    pub acceleration: f64,
    /// The number of the lane the vehicle is on.
    pub lane: u32,
    /// Position of the rear of the vehicle on the lane, in m.
    pub x: f64,
    pub speed_limit: f64,
    pub can_change_left: bool,
    pub can_change_right: bool,
    pub left_lane: Option<u32>,
    pub right_lane: Option<u32>,
    pub leader_gap: Option<f64>,
    pub leader_speed: Option<f64>,
    pub follower_gap: Option<f64>,
    pub left_leader_gap: Option<f64>,
    pub left_follower_gap: Option<f64>,
    pub right_leader_gap: Option<f64>,
    pub right_follower_gap: Option<f64>,
    /// Gap to the leader divided by own speed, in s.
    pub time_headway: Option<f64>,
    /// Whether a leader or a red signal is right in front of the vehicle.
    pub blocked: bool,
    /// Whether the route can be followed from the current lane.
    pub on_route: bool,
    /// Lane changes the route still needs from the current lane.
    pub lane_changes_needed: Option<u32>,
    /// The direction of the lane change in progress.
    pub changing_lane: Option<Lateral>,
}

/// What an agent can tell its vehicle to do.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Accelerate at the given rate in m/s^2.
    Accelerate(f64),
    /// Decelerate at the given rate in m/s^2.
    Decelerate(f64),
    Maintain,
    ChangeLane(Lateral),
    AbortLaneChange,
}

impl From<Action> for Decision {
    fn from(action: Action) -> Self {
        let (acceleration, lane_change) = match action {
            Action::Accelerate(acc) => (acc.abs(), LaneChangeIntent::Keep),
            Action::Decelerate(dec) => (-dec.abs(), LaneChangeIntent::Keep),
            Action::Maintain => (0.0, LaneChangeIntent::Keep),
            Action::ChangeLane(dir) => (0.0, LaneChangeIntent::Start(dir)),
            Action::AbortLaneChange => (0.0, LaneChangeIntent::Abort),
        };
        Decision {
            acceleration,
            lane_change,
        }
    }
}

/// The agent's end of the connection to an external driver.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    percepts: Receiver<(u64, Percept)>,
    actions: Sender<(u64, Action)>,
}

impl AgentHandle {
    /// Blocks until the next percept arrives. Returns `None` once the vehicle is gone.
    pub fn recv(&self) -> Option<(u64, Percept)> {
        self.percepts.recv().ok()
    }

    /// Answers the percept of the given step. Returns `false` once the vehicle is gone.
    pub fn send(&self, step: u64, action: Action) -> bool {
        self.actions.send((step, action)).is_ok()
    }

    /// The raw percept channel, for use with `crossbeam_channel::select!`.
    pub fn percepts(&self) -> &Receiver<(u64, Percept)> {
        &self.percepts
    }
}

/// A driver relaying percepts to an agent and applying its actions.
#[derive(Debug)]
pub struct ExternalDriver {
    tag: String,
    route: Route,
    percepts: Sender<(u64, Percept)>,
    actions: Receiver<(u64, Action)>,
    serial: u64,
    /// The most recently received action.
    last: Option<Action>,
    disconnected: bool,
    decision: Decision,
}

impl ExternalDriver {
    /// Creates a driver and the handle for its agent.
    pub fn new(tag: impl Into<String>, route: Route) -> (Self, AgentHandle) {
        let (percept_tx, percept_rx) = unbounded();
        let (action_tx, action_rx) = unbounded();
        let driver = Self {
            tag: tag.into(),
            route,
            percepts: percept_tx,
            actions: action_rx,
            serial: 0,
            last: None,
            disconnected: false,
            decision: Decision::maintain(),
        };
        let handle = AgentHandle {
            percepts: percept_rx,
            actions: action_tx,
        };
        (driver, handle)
    }

    /// Whether the agent has hung up.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// The most recently received action.
    pub fn last_action(&self) -> Option<Action> {
        self.last
    }

    fn disconnect(&mut self) {
        if !self.disconnected {
            warn!("agent of vehicle {} disconnected", self.serial);
            self.disconnected = true;
        }
    }

    fn apply(&mut self, action: Action) {
        self.last = Some(action);
        self.decision = action.into();
    }
}

impl Percept {
    /// Gathers the percept of the deciding vehicle.
    pub fn sense(ctx: &mut DecisionContext, route: &Route) -> Self {
        let vehicle = ctx.vehicle;
        let lane = ctx.lane();
        let leader = ctx.headway(Enclosure::Down);
        let red_ahead = ctx
            .signals_ahead(BLOCKED_GAP)
            .iter()
            .any(|(_, state)| *state == LightState::Red);
        let time_headway = leader
            .filter(|_| vehicle.speed() > 0.0)
            .map(|l| l.gap / vehicle.speed());

        Self {
            time: ctx.clock.now,
            dt: ctx.clock.dt,
            serial: vehicle.serial(),
            speed: vehicle.speed(),
            acceleration: vehicle.acceleration(),
            lane: lane.number(),
            x: vehicle.x(),
            speed_limit: lane.speed_limit(),
            can_change_left: lane.can_change(Lateral::Left),
            can_change_right: lane.can_change(Lateral::Right),
            left_lane: side_lane(ctx, Lateral::Left),
            right_lane: side_lane(ctx, Lateral::Right),
            leader_gap: leader.map(|l| l.gap),
            leader_speed: leader.map(|l| l.speed),
            follower_gap: gap(ctx, None, Longitudinal::Up),
            left_leader_gap: gap(ctx, Some(Lateral::Left), Longitudinal::Down),
            left_follower_gap: gap(ctx, Some(Lateral::Left), Longitudinal::Up),
            right_leader_gap: gap(ctx, Some(Lateral::Right), Longitudinal::Down),
            right_follower_gap: gap(ctx, Some(Lateral::Right), Longitudinal::Up),
            time_headway,
            blocked: red_ahead || leader.map_or(false, |l| l.gap < BLOCKED_GAP),
            on_route: route.is_feasible_from(lane),
            lane_changes_needed: route.n_lane_changes(lane),
            changing_lane: vehicle.lane_change().map(|lc| lc.direction),
        }
    }
}

fn side_lane(ctx: &DecisionContext, dir: Lateral) -> Option<u32> {
    ctx.lane()
        .lateral(dir)
        .and_then(|id| ctx.network.get(id))
        .map(|lane| lane.number())
}

fn gap(ctx: &mut DecisionContext, lat: Option<Lateral>, lon: Longitudinal) -> Option<f64> {
    ctx.headway(Enclosure::new(lat, Some(lon))).map(|h| h.gap)
}

impl Driver for ExternalDriver {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn route(&self) -> &Route {
        &self.route
    }

    fn route_mut(&mut self) -> &mut Route {
        &mut self.route
    }

    fn decide(&mut self, ctx: &mut DecisionContext) -> bool {
        self.serial = ctx.vehicle.serial();
        if self.disconnected {
            return false;
        }
        let percept = Percept::sense(ctx, &self.route);
        if self.percepts.send((ctx.clock.step, percept)).is_err() {
            self.disconnect();
        }
        false
    }

    fn await_decision(&mut self, step: u64, deadline: Option<Instant>) -> bool {
        if self.disconnected {
            return false;
        }
        loop {
            let received = match deadline {
                Some(deadline) => self.actions.recv_deadline(deadline),
                None => self
                    .actions
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                // Answers to earlier steps arrived too late and are dropped
                Ok((answered, _)) if answered < step => continue,
                Ok((_, action)) => {
                    self.apply(action);
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    self.disconnect();
                    return false;
                }
            }
        }
    }

    fn apply_fallback(&mut self, fallback: BarrierFallback, vehicle: &Vehicle) {
        self.decision = match fallback {
            BarrierFallback::FullStop => Decision::full_stop(vehicle),
            // Lane changes are not restarted on every missed step
            BarrierFallback::HoldLast => Decision {
                lane_change: LaneChangeIntent::Keep,
                ..Decision::from(self.last.unwrap_or(Action::Maintain))
            },
        };
    }

    fn drive(&mut self) -> Decision {
        self.decision
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn actions_map_to_decisions() {
        let d: Decision = Action::Decelerate(3.0).into();
        assert_eq!(d.acceleration, -3.0);
        let d: Decision = Action::ChangeLane(Lateral::Left).into();
        assert_eq!(d.lane_change, LaneChangeIntent::Start(Lateral::Left));
        let d: Decision = Action::AbortLaneChange.into();
        assert_eq!(d.lane_change, LaneChangeIntent::Abort);
    }

    #[test]
    fn stale_answers_are_skipped() {
        let (mut driver, handle) = ExternalDriver::new("agent", Route::default());
        handle.send(3, Action::Accelerate(2.0));
        handle.send(4, Action::Decelerate(1.0));
        assert!(driver.await_decision(4, None));
        assert_eq!(driver.drive().acceleration, -1.0);
    }

    #[test]
    fn answer_from_another_thread() {
        let (mut driver, handle) = ExternalDriver::new("agent", Route::default());
        let agent = thread::spawn(move || {
            handle.send(0, Action::Accelerate(1.5));
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(driver.await_decision(0, Some(deadline)));
        assert_eq!(driver.drive().acceleration, 1.5);
        agent.join().unwrap();
    }

    #[test]
    fn silence_times_out() {
        let (mut driver, _handle) = ExternalDriver::new("agent", Route::default());
        assert!(!driver.await_decision(0, Some(Instant::now())));
        assert!(!driver.is_disconnected());
    }

    #[test]
    fn hang_up_is_detected() {
        let (mut driver, handle) = ExternalDriver::new("agent", Route::default());
        drop(handle);
        assert!(!driver.await_decision(0, None));
        assert!(driver.is_disconnected());
    }

    #[test]
    fn hold_last_reapplies_the_previous_action() {
        let (mut driver, handle) = ExternalDriver::new("agent", Route::default());
        handle.send(0, Action::Accelerate(0.7));
        assert!(driver.await_decision(0, None));
        let mut set: slotmap::SlotMap<crate::VehicleId, ()> = slotmap::SlotMap::with_key();
        let vehicle = Vehicle::new(
            set.insert(()),
            0,
            &Default::default(),
            slotmap::Key::null(),
            0.0,
            0.0,
        );
        driver.apply_fallback(BarrierFallback::HoldLast, &vehicle);
        assert_eq!(driver.drive().acceleration, 0.7);
        driver.apply_fallback(BarrierFallback::FullStop, &vehicle);
        assert_eq!(driver.drive().acceleration, -vehicle.max_dec());
    }

    #[test]
    fn held_lane_change_is_not_restarted() {
        let (mut driver, handle) = ExternalDriver::new("agent", Route::default());
        handle.send(0, Action::ChangeLane(Lateral::Left));
        assert!(driver.await_decision(0, None));
        assert_eq!(driver.drive().lane_change, LaneChangeIntent::Start(Lateral::Left));

        let mut set: slotmap::SlotMap<crate::VehicleId, ()> = slotmap::SlotMap::with_key();
        let vehicle = Vehicle::new(
            set.insert(()),
            0,
            &Default::default(),
            slotmap::Key::null(),
            0.0,
            0.0,
        );
        driver.apply_fallback(BarrierFallback::HoldLast, &vehicle);
        assert_eq!(driver.drive(), Decision::maintain());
        assert_eq!(driver.last_action(), Some(Action::ChangeLane(Lateral::Left)));
    }
}
