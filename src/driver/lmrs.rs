//! The Lane-change Model with Relaxation and Synchronization, on top of IDM+.

use super::idm::{Candidates, IdmInput, IdmParams};
use super::params::{Param, Parameters};
use super::{Decision, DecisionContext, Driver, LaneChangeIntent};
use crate::config::BarrierFallback;
use crate::route::Route;
use crate::rsu::LightState;
use crate::topology::{Enclosure, LaneType, Lateral, Longitudinal};
use crate::vehicle::Vehicle;
use crate::LaneId;
use arrayvec::ArrayVec;
use log::trace;
use smallvec::SmallVec;

/// Vehicles do not consider changing lanes on the first stretch of a lane fed by a generator.
const FED_LANE_CALM_DISTANCE: f64 = 100.0; // m

/// Tolerance when comparing an anticipated speed with the desired speed.
const SPEED_EPS: f64 = 0.1; // m/s

/// An adjacent leader must be this much slower before the driver synchronises with it.
const SYNC_MARGIN: f64 = 0.5; // m/s

/// The lane change desire towards each side.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Desire {
    pub left: f64,
    pub right: f64,
}

impl Desire {
    pub fn get(&self, dir: Lateral) -> f64 {
        match dir {
            Lateral::Left => self.left,
            Lateral::Right => self.right,
        }
    }

    fn set(&mut self, dir: Lateral, value: f64) {
        match dir {
            Lateral::Left => self.left = value,
            Lateral::Right => self.right = value,
        }
    }

    /// The side with the higher desire. Ties go right.
    pub fn strongest(&self) -> (Lateral, f64) {
        if self.left > self.right {
            (Lateral::Left, self.left)
        } else {
            (Lateral::Right, self.right)
        }
    }
}

/// One side of a prospective lane change, as judged by gap acceptance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GapCheck {
    /// The net gap in m.
    pub gap: f64,
    /// The acceleration the gap would impose, in m/s^2.
    pub acc: f64,
}

/// Desire to leave a lane from which `n` lane changes are still needed within `remaining` metres.
pub fn route_desire(n: u32, remaining: f64, v: f64, x0: f64, t0: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    let by_distance = 1.0 - remaining / (n * x0);
    let by_time = if v > 0.0 {
        1.0 - (remaining / v) / (n * t0)
    } else {
        f64::NEG_INFINITY
    };
    by_distance.max(by_time).max(0.0)
}

/// Route desire towards an adjacent lane, from the desire to leave either lane.
pub fn signed_route_desire(leave_cur: f64, leave_adj: f64) -> f64 {
    use std::cmp::Ordering::*;
    match leave_adj.partial_cmp(&leave_cur) {
        Some(Less) => leave_cur,
        Some(Greater) => -leave_adj,
        _ => 0.0,
    }
}

/// Adds voluntary incentives to the route desire, fading them out as the route becomes pressing.
pub fn blend(route: f64, voluntary: f64, d_sync: f64, d_coop: f64) -> f64 {
    if route == f64::NEG_INFINITY {
        return route;
    }
    let magnitude = route.abs();
    let theta = if route * voluntary >= 0.0 || magnitude <= d_sync {
        1.0
    } else if magnitude < d_coop {
        (d_coop - magnitude) / (d_coop - d_sync)
    } else {
        0.0
    };
    route + theta * voluntary
}

/// Whether every side of a gap is safe enough for the given desire.
pub fn gap_acceptable(checks: &[GapCheck], b_safe: f64, desire: f64) -> bool {
    checks
        .iter()
        .all(|check| check.gap >= 0.0 && check.acc >= -b_safe * desire)
}

/// A driver following IDM+ and changing lanes with LMRS.
#[derive(Clone, Debug)]
pub struct LmrsDriver {
    tag: String,
    params: Parameters,
    route: Route,
    /// Current desired headway, relaxing towards `TMax`.
    headway: f64,
    desire: Desire,
    decision: Decision,
}

impl LmrsDriver {
    pub fn new(tag: impl Into<String>, params: Parameters, route: Route) -> Self {
        Self {
            tag: tag.into(),
            headway: params[Param::TMax],
            params,
            route,
            desire: Desire::default(),
            decision: Decision::maintain(),
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// The current desired time headway in s.
    pub fn headway(&self) -> f64 {
        self.headway
    }

    /// The desires computed in the last decision.
    pub fn desire(&self) -> Desire {
        self.desire
    }

    fn idm(&self, vehicle: &Vehicle) -> IdmParams {
        IdmParams {
            a: self.params[Param::A],
            b: self.params[Param::B],
            s0: self.params[Param::S0],
            delta: self.params[Param::Delta],
            b_max: vehicle.max_dec(),
        }
    }

    /// The headway accepted at a given desire, between `TMax` at no desire and `TMin` at full desire.
    fn interpolated_headway(&self, desire: f64) -> f64 {
        let d = desire.clamp(0.0, 1.0);
        d * self.params[Param::TMin] + (1.0 - d) * self.params[Param::TMax]
    }

    /// The merge taper the vehicle's lane runs into, if it dead-ends.
    fn dead_end_taper(ctx: &DecisionContext) -> Option<LaneId> {
        let taper = ctx.lane().taper()?;
        let lane = ctx.network.lane(taper);
        (lane.kind() == LaneType::MergeTaper && lane.is_dead_end()).then_some(taper)
    }

    /// Applies the car following candidates: leaders, merging vehicles, signals and lane ends.
    fn follow(&self, ctx: &mut DecisionContext, idm: &IdmParams, v0: f64) -> Candidates {
        let vehicle = ctx.vehicle;
        let v = vehicle.speed();
        let x0 = self.params[Param::X0];
        let input = |s: f64, leader_speed: f64, t: f64| IdmInput {
            v,
            v0,
            s,
            dv: v - leader_speed,
            t,
        };

        let mut acc = Candidates::new(vehicle.max_acc());
        acc.apply(idm.idm_plus(&input(f64::INFINITY, v, self.headway)));

        if let Some(leader) = ctx.headway(Enclosure::Down) {
            acc.apply(idm.idm_plus(&input(leader.gap, leader.speed, self.headway)));
        }

        // Vehicles ahead moving across into this lane, and the leader on the target lane
        for dir in [Lateral::Left, Lateral::Right] {
            let Some(other) = ctx.headway(Enclosure::new(Some(dir), Some(Longitudinal::Down)))
            else {
                continue;
            };
            let merging = ctx.vehicles[other.vehicle]
                .lane_change()
                .map_or(false, |lc| lc.direction == dir.flip());
            let changing_towards = vehicle
                .lane_change()
                .map_or(false, |lc| lc.direction == dir);
            if merging || changing_towards {
                acc.apply(idm.idm_plus(&input(other.gap, other.speed, self.headway)));
            }
        }

        for (dist, state) in ctx.signals_ahead(x0) {
            let stop = match state {
                LightState::Red => true,
                LightState::Amber => idm.can_stop(v, dist),
                LightState::Green => false,
            };
            if stop {
                acc.apply(idm.stop_at_line(v, v0, dist, self.headway));
            }
        }

        // Stop where the route's lane changes must have been made
        let lane = ctx.lane();
        if self.route.n_lane_changes(lane).map_or(false, |n| n > 0) {
            if let Some(dist) = self.route.remaining_distance(lane, vehicle.front()) {
                if dist < x0 {
                    acc.apply(idm.stop_at_line(v, v0, dist, self.headway));
                }
            }
        }
        if Self::dead_end_taper(ctx).is_some() {
            let dist = ctx.network.dist_to_dead_end(lane.id(), vehicle.front(), x0);
            if dist < x0 {
                acc.apply(idm.stop_at_line(v, v0, dist, self.headway));
            }
        }

        acc
    }

    /// The speed the driver expects to reach on a lane, from the leaders within the look-ahead
    /// distance of position `x` on it and the vehicles about to merge into it.
    fn anticipated_speed(&self, ctx: &mut DecisionContext, lane: LaneId, x: f64, v0: f64) -> f64 {
        let me = ctx.vehicle.id();
        if let Some(v) = ctx.scratch.anticipated_speed(me, lane) {
            return v;
        }

        let x0 = self.params[Param::X0];
        let vehicles = ctx.vehicles;
        let network = ctx.network;
        let towards = |speed: f64, dist: f64| speed + (v0 - speed) * (dist / x0).clamp(0.0, 1.0);

        let mut v_ant = v0;
        for (id, dist) in network.leaders_within(vehicles, lane, x, x0) {
            if id != me {
                v_ant = v_ant.min(towards(vehicles[id].speed(), dist));
            }
        }
        for dir in [Lateral::Left, Lateral::Right] {
            let Some((adj, adj_x)) = network.adjacent_x(lane, x, dir) else {
                continue;
            };
            for (id, dist) in network.leaders_within(vehicles, adj, adj_x, x0) {
                let other = &vehicles[id];
                if id != me && other.indicator() == Some(dir.flip()) {
                    v_ant = v_ant.min(towards(other.speed(), dist));
                }
            }
        }

        ctx.scratch.store_anticipated_speed(me, lane, v_ant);
        v_ant
    }

    /// Computes the desire to change lanes to either side.
    fn desires(&self, ctx: &mut DecisionContext, acc: f64, v0: f64) -> Desire {
        let p = &self.params;
        let (x0, t0) = (p[Param::X0], p[Param::T0]);
        let vehicle = ctx.vehicle;
        let lane = ctx.lane();
        let (x, v) = (vehicle.x(), vehicle.speed());
        let front = vehicle.front();

        let n_cur = self.route.n_lane_changes(lane).unwrap_or(0);
        let remaining_cur = self
            .route
            .remaining_distance(lane, front)
            .unwrap_or(f64::INFINITY);
        let leave_cur = route_desire(n_cur, remaining_cur, v, x0, t0);
        let v_cur = self.anticipated_speed(ctx, lane.id(), front, v0);
        let a_gain = ((p[Param::A] - acc.max(0.0)) / p[Param::A]).max(0.0);
        let taper = Self::dead_end_taper(ctx);

        let mut desire = Desire {
            left: f64::NEG_INFINITY,
            right: f64::NEG_INFINITY,
        };
        let sides = [Lateral::Left, Lateral::Right]
            .into_iter()
            .filter(|dir| lane.can_change(*dir))
            .collect::<ArrayVec<Lateral, 2>>();
        for dir in sides {
            let Some((adj, adj_x)) = ctx.network.adjacent_x(lane.id(), x, dir) else {
                continue;
            };
            let adj_lane = ctx.network.lane(adj);

            let mut d_route = if self.route.is_feasible_from(adj_lane) {
                let n_adj = self.route.n_lane_changes(adj_lane).unwrap_or(0);
                let remaining_adj = self
                    .route
                    .remaining_distance(adj_lane, adj_x + vehicle.length())
                    .unwrap_or(f64::INFINITY);
                let leave_adj = route_desire(n_adj, remaining_adj, v, x0, t0);
                signed_route_desire(leave_cur, leave_adj)
            } else {
                f64::NEG_INFINITY
            };
            if let Some(taper) = taper {
                if d_route > f64::NEG_INFINITY && adj_lane.taper() != Some(taper) {
                    let dist = ctx.network.dist_to_dead_end(lane.id(), front, n_cur.max(1) as f64 * x0);
                    d_route = d_route.max(route_desire(1, dist, v, x0, t0));
                }
            }

            let v0_adj = ctx.desired_speed_on(adj_lane, p[Param::FSpeed]);
            let v_adj = self.anticipated_speed(ctx, adj, adj_x + vehicle.length(), v0_adj);
            let mut d_speed = a_gain * (v_adj - v_cur) / p[Param::VGain];
            if dir == Lateral::Right && v_cur >= p[Param::VCong] {
                // No overtaking on the right in free flow
                d_speed = d_speed.min(0.0);
            }
            let d_bias = if dir == Lateral::Right && v_adj >= v0 - SPEED_EPS && d_route >= 0.0 {
                p[Param::DFree]
            } else {
                0.0
            };

            desire.set(
                dir,
                blend(d_route, d_speed + d_bias, p[Param::DSync], p[Param::DCoop]),
            );
        }
        desire
    }

    /// Gap acceptance towards one side.
    fn gap_accepted(
        &self,
        ctx: &mut DecisionContext,
        idm: &IdmParams,
        dir: Lateral,
        desire: f64,
        v0: f64,
    ) -> bool {
        if ctx.neighbour(Enclosure::new(Some(dir), None)).is_some() {
            return false;
        }
        let t = self.interpolated_headway(desire);
        let v = ctx.vehicle.speed();
        let mut checks = SmallVec::<[GapCheck; 2]>::new();

        if let Some(leader) = ctx.headway(Enclosure::new(Some(dir), Some(Longitudinal::Down))) {
            let acc = idm.idm_plus(&IdmInput {
                v,
                v0,
                s: leader.gap,
                dv: v - leader.speed,
                t,
            });
            checks.push(GapCheck {
                gap: leader.gap,
                acc,
            });
        }
        if let Some(follower) = ctx.headway(Enclosure::new(Some(dir), Some(Longitudinal::Up))) {
            let other = &ctx.vehicles[follower.vehicle];
            let other_lane = ctx.network.lane(other.lane());
            let acc = idm.idm_plus(&IdmInput {
                v: follower.speed,
                v0: f64::min(other.max_speed(), other_lane.speed_limit()),
                s: follower.gap,
                dv: follower.speed - v,
                t,
            });
            checks.push(GapCheck {
                gap: follower.gap,
                acc,
            });
        }

        gap_acceptable(&checks, self.params[Param::BSafe], desire)
    }
}

impl Driver for LmrsDriver {
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
        let vehicle = ctx.vehicle;
        let dt = ctx.clock.dt;
        let t_max = self.params[Param::TMax];
        let tau = self.params[Param::Tau].max(dt);
        self.headway = t_max - (t_max - self.headway) * (-dt / tau).exp();

        let idm = self.idm(vehicle);
        let v = vehicle.speed();
        let v0 = ctx.desired_speed_on(ctx.lane(), self.params[Param::FSpeed]);
        let mut acc = self.follow(ctx, &idm, v0);

        let lane = ctx.lane();
        let calm = lane.is_fed() && vehicle.x() < FED_LANE_CALM_DISTANCE;
        let mut intent = LaneChangeIntent::Keep;
        self.desire = Desire::default();

        if vehicle.lane_change().is_none() && !calm {
            let desire = self.desires(ctx, acc.acc(), v0);
            self.desire = desire;
            let (dir, d) = desire.strongest();

            if d >= self.params[Param::DFree] && self.gap_accepted(ctx, &idm, dir, d, v0) {
                intent = LaneChangeIntent::Start(dir);
                self.headway = self.interpolated_headway(d);
                trace!("vehicle {} wants to change {:?} with desire {:.3}", vehicle.serial(), dir, d);
            } else {
                if d >= self.params[Param::DCoop] {
                    intent = LaneChangeIntent::Indicate(dir);
                }
                // Synchronise with the slower leader on the target lane
                if d >= self.params[Param::DSync] {
                    let slot = Enclosure::new(Some(dir), Some(Longitudinal::Down));
                    if let Some(leader) = ctx.headway(slot) {
                        if leader.speed < v - SYNC_MARGIN {
                            let sync = idm.idm_plus(&IdmInput {
                                v,
                                v0,
                                s: leader.gap,
                                dv: v - leader.speed,
                                t: self.interpolated_headway(d),
                            });
                            acc.apply(sync.max(-idm.b));
                        }
                    }
                }
            }
        }

        // Create a gap for vehicles ahead indicating into this lane
        let t_coop = self.interpolated_headway(self.params[Param::DCoop]);
        for dir in [Lateral::Left, Lateral::Right] {
            let slot = Enclosure::new(Some(dir), Some(Longitudinal::Down));
            let Some(other) = ctx.headway(slot) else { continue };
            let neighbour = &ctx.vehicles[other.vehicle];
            if neighbour.indicator() == Some(dir.flip()) && neighbour.lane_change().is_none() {
                let coop = idm.idm_plus(&IdmInput {
                    v,
                    v0,
                    s: other.gap,
                    dv: v - other.speed,
                    t: t_coop,
                });
                acc.apply(coop.max(-idm.b));
            }
        }

        self.decision = Decision {
            acceleration: acc.acc(),
            lane_change: intent,
        };
        true
    }

    fn apply_fallback(&mut self, fallback: BarrierFallback, vehicle: &Vehicle) {
        if fallback == BarrierFallback::FullStop {
            self.decision = Decision::full_stop(vehicle);
        }
    }

    fn drive(&mut self) -> Decision {
        self.decision
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn no_route_desire_without_required_changes() {
        for remaining in [0.0, 1.0, 50.0, 1e6] {
            assert_eq!(route_desire(0, remaining, 25.0, 295.0, 43.0), 0.0);
        }
    }

    #[test]
    fn route_desire_grows_towards_the_deadline() {
        let far = route_desire(1, 600.0, 10.0, 295.0, 43.0);
        let near = route_desire(1, 100.0, 10.0, 295.0, 43.0);
        assert_eq!(far, 0.0);
        assert!(near > 0.5);
        assert_approx_eq!(route_desire(1, 100.0, 0.0, 295.0, 43.0), 1.0 - 100.0 / 295.0);
        // More lane changes over the same distance are more pressing
        assert!(route_desire(2, 100.0, 10.0, 295.0, 43.0) > near);
    }

    #[test]
    fn route_desire_sign() {
        assert_eq!(signed_route_desire(0.6, 0.0), 0.6);
        assert_eq!(signed_route_desire(0.0, 0.4), -0.4);
        assert_eq!(signed_route_desire(0.7, 0.7), 0.0);
        assert_eq!(signed_route_desire(0.0, 0.0), 0.0);
    }

    #[test]
    fn route_desire_sign_with_equal_lane_change_counts() {
        // One lane change needed from either lane, but sooner from the current one
        let leave_cur = route_desire(1, 100.0, 10.0, 295.0, 43.0);
        let leave_adj = route_desire(1, 250.0, 10.0, 295.0, 43.0);
        assert!(leave_cur > leave_adj);
        assert_eq!(signed_route_desire(leave_cur, leave_adj), leave_cur);
        assert_eq!(signed_route_desire(leave_adj, leave_cur), -leave_cur);
        assert_eq!(signed_route_desire(0.7, 0.3), 0.7);
    }

    #[test]
    fn voluntary_incentives_fade_with_route_pressure() {
        let (sync, coop) = (0.577, 0.788);
        // Agreeing in sign: fully included
        assert_approx_eq!(blend(0.9, 0.2, sync, coop), 1.1);
        // Weak route desire: fully included
        assert_approx_eq!(blend(-0.3, 0.5, sync, coop), 0.2);
        // Halfway between the thresholds: half included
        let mid = -(sync + coop) / 2.0;
        assert_approx_eq!(blend(mid, 0.4, sync, coop), mid + 0.2);
        // Beyond cooperation: excluded
        assert_approx_eq!(blend(-0.9, 0.5, sync, coop), -0.9);
        assert_eq!(blend(f64::NEG_INFINITY, 5.0, sync, coop), f64::NEG_INFINITY);
    }

    #[test]
    fn gap_acceptance() {
        let ok = GapCheck { gap: 20.0, acc: -0.5 };
        let harsh_follower = GapCheck { gap: 15.0, acc: -1.5 };
        let overlap = GapCheck { gap: -0.1, acc: 1.0 };

        assert!(gap_acceptable(&[], 2.09, 0.5));
        assert!(gap_acceptable(&[ok], 2.09, 0.5));
        // -1.5 is more negative than -2.09 * 0.5
        assert!(!gap_acceptable(&[ok, harsh_follower], 2.09, 0.5));
        assert!(gap_acceptable(&[ok, harsh_follower], 2.09, 0.8));
        assert!(!gap_acceptable(&[overlap], 2.09, 1.0));
    }

    #[test]
    fn strongest_side() {
        let desire = Desire {
            left: 0.2,
            right: 0.4,
        };
        assert_eq!(desire.strongest(), (Lateral::Right, 0.4));
        assert_eq!(desire.get(Lateral::Left), 0.2);
    }

    #[test]
    fn headway_interpolation() {
        let driver = LmrsDriver::new("car", Parameters::default(), Route::default());
        assert_approx_eq!(driver.interpolated_headway(0.0), 1.2);
        assert_approx_eq!(driver.interpolated_headway(1.0), 0.56);
        assert_approx_eq!(driver.interpolated_headway(3.0), 0.56);
        assert_approx_eq!(driver.headway(), 1.2);
    }
}
