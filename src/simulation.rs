use crate::barrier::{BarrierPolicy, DecisionBarrier};
use crate::config::SimConfig;
use crate::controller::{
    BoxedController, BoxedOnBoardUnit, ControlContext, Controller, OnBoardContext,
    PeriodicSchedule, StepClock,
};
use crate::driver::{AgentHandle, DecisionContext, Driver, ExternalDriver, LaneChangeIntent};
use crate::error::{SimError, SimResult};
use crate::generator::{GenerationContext, Generator};
use crate::network::Network;
use crate::route::Route;
use crate::rsu::{LaneEvent, Rsu, TrafficLight};
use crate::topology::{Enclosure, Longitudinal};
use crate::util::Interval;
use crate::vehicle::{Vehicle, VehicleAttributes};
use crate::{GeneratorId, LaneId, RsuId, RsuSet, VehicleId, VehicleSet};
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use slotmap::{SecondaryMap, SlotMap};
use std::time::Instant;

pub use observer::{Collision, NoopObserver, RemovalReason, SimObserver, StepReport, VehicleSample};
pub use scratch::Scratch;

mod observer;
mod scratch;

/// Whether a follower whose front is at `front` has run into a leader whose rear is at `leader_x`,
/// both in the follower's lane coordinates.
fn has_crashed(leader_x: f64, front: f64) -> bool {
    leader_x <= front
}

/// The agent end of an externally driven vehicle created by a generator.
#[derive(Debug)]
pub struct SpawnedAgent {
    pub vehicle: VehicleId,
    pub serial: u64,
    /// The tag of the vehicle class.
    pub tag: String,
    pub handle: AgentHandle,
}

/// The vehicles being simulated and their drivers.
#[derive(Default)]
pub(crate) struct Fleet {
    pub(crate) vehicles: VehicleSet,
    pub(crate) drivers: SecondaryMap<VehicleId, Box<dyn Driver>>,
    /// The serial given to the next admitted vehicle.
    next_serial: u64,
}

impl Fleet {
    /// Places a vehicle on a lane and hands it to its driver.
    pub(crate) fn admit(
        &mut self,
        network: &mut Network,
        attributes: &VehicleAttributes,
        lane: LaneId,
        x: f64,
        v: f64,
        driver: Box<dyn Driver>,
    ) -> VehicleId {
        let serial = self.next_serial;
        self.next_serial += 1;
        let id = self.vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::new(id, serial, attributes, lane, x, v);
            vehicle.update_coords(network);
            vehicle
        });
        network.lane_mut(lane).insert_vehicle(&self.vehicles, id);
        self.drivers.insert(id, driver);
        id
    }

    /// Takes a vehicle off its lane and out of the fleet.
    pub(crate) fn remove(&mut self, network: &mut Network, id: VehicleId) -> Option<Vehicle> {
        let vehicle = self.vehicles.remove(id)?;
        network.lane_mut(vehicle.lane()).remove_vehicle(id);
        self.drivers.remove(id);
        Some(vehicle)
    }
}

/// A traffic simulation.
pub struct Simulation {
    config: SimConfig,
    /// The lanes and their connections.
    network: Network,
    fleet: Fleet,
    /// The roadside units.
    rsus: RsuSet,
    generators: SlotMap<GeneratorId, Generator>,
    /// Units carried by vehicles.
    on_board: SecondaryMap<VehicleId, Vec<(PeriodicSchedule, BoxedOnBoardUnit)>>,
    controllers: Vec<(PeriodicSchedule, BoxedController)>,
    /// The set of "frozen" vehicles, which will not move.
    frozen_vehs: Vec<VehicleId>,
    barrier: DecisionBarrier,
    scratch: Scratch,
    rng: StdRng,
    /// The index of the next step.
    step: u64,
    /// The simulated time in s.
    time: f64,
    /// Agents not yet collected, when there is no spawner.
    agents: Vec<SpawnedAgent>,
    spawner: Option<Box<dyn FnMut(SpawnedAgent)>>,
}

impl Simulation {
    /// Creates a new simulation on the given network.
    pub fn new(network: Network, config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            barrier: DecisionBarrier::new(BarrierPolicy::from_config(&config)),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            network,
            fleet: Fleet::default(),
            rsus: RsuSet::with_key(),
            generators: SlotMap::with_key(),
            on_board: SecondaryMap::new(),
            controllers: vec![],
            frozen_vehs: vec![],
            scratch: Scratch::default(),
            step: 0,
            time: 0.0,
            agents: vec![],
            spawner: None,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The settings, for changing toggles between steps.
    pub fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Gets the index of the next step.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// Gets the simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Adds a vehicle driven by `driver` at position `x` on a lane.
    pub fn add_vehicle(
        &mut self,
        attributes: &VehicleAttributes,
        lane: LaneId,
        x: f64,
        v: f64,
        driver: impl Driver + 'static,
    ) -> SimResult<VehicleId> {
        self.check_placement(lane, x, driver.route())?;
        Ok(self
            .fleet
            .admit(&mut self.network, attributes, lane, x, v, Box::new(driver)))
    }

    /// Adds a vehicle driven by an outside agent, returning the agent's handle.
    pub fn add_external_vehicle(
        &mut self,
        attributes: &VehicleAttributes,
        lane: LaneId,
        x: f64,
        v: f64,
        tag: &str,
        route: Route,
    ) -> SimResult<(VehicleId, AgentHandle)> {
        let (driver, handle) = ExternalDriver::new(tag, route);
        let id = self.add_vehicle(attributes, lane, x, v, driver)?;
        Ok((id, handle))
    }

    fn check_placement(&self, lane: LaneId, x: f64, route: &Route) -> SimResult<()> {
        let lane = self
            .network
            .get(lane)
            .ok_or_else(|| SimError::UnknownLane(format!("{:?}", lane)))?;
        if !(x >= 0.0 && x < lane.length()) {
            return Err(SimError::OutsideLane {
                lane: lane.number(),
                x,
                length: lane.length(),
            });
        }
        match route.current() {
            Some(destination) if !route.is_feasible_from(lane) => {
                Err(SimError::UnreachableDestination {
                    lane: lane.number(),
                    destination,
                })
            }
            _ => Ok(()),
        }
    }

    /// Removes a vehicle from the simulation.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> bool {
        self.discard(id, RemovalReason::Removed).is_some()
    }

    /// Adds a generator. Its lane is marked as fed.
    pub fn add_generator(&mut self, mut generator: Generator) -> SimResult<GeneratorId> {
        generator.prepare(&self.network)?;
        self.network.lane_mut(generator.lane()).fed = true;
        Ok(self.generators.insert(generator))
    }

    /// Adds a detector at `x` on a lane, aggregating over `period` seconds,
    /// or the configured detector period.
    pub fn add_detector(&mut self, lane: LaneId, x: f64, period: Option<f64>) -> SimResult<RsuId> {
        let period = period.unwrap_or(self.config.detector_period);
        self.add_rsu(Rsu::detector(lane, x, period))
    }

    /// Adds a traffic light with its stop line at `x` on a lane.
    pub fn add_traffic_light(&mut self, lane: LaneId, x: f64, light: TrafficLight) -> SimResult<RsuId> {
        self.add_rsu(Rsu::traffic_light(lane, x, light))
    }

    fn add_rsu(&mut self, rsu: Rsu) -> SimResult<RsuId> {
        let lane = self
            .network
            .get(rsu.lane())
            .ok_or_else(|| SimError::UnknownLane(format!("{:?}", rsu.lane())))?;
        if !(rsu.x() >= 0.0 && rsu.x() <= lane.length()) {
            return Err(SimError::OutsideLane {
                lane: lane.number(),
                x: rsu.x(),
                length: lane.length(),
            });
        }
        let (lane, x) = (rsu.lane(), rsu.x());
        let id = self.rsus.insert(rsu);
        self.network.lane_mut(lane).insert_rsu(x, id);
        Ok(id)
    }

    /// Registers a controller, run after the on-board units on its schedule.
    pub fn add_controller<C>(&mut self, schedule: PeriodicSchedule, controller: C)
    where
        C: for<'a> Controller<ControlContext<'a>> + 'static,
    {
        let controller: BoxedController = Box::new(controller);
        self.controllers.push((schedule, controller));
    }

    /// Installs a unit on board a vehicle. Returns `false` if there is no such vehicle.
    pub fn add_on_board_unit<U>(&mut self, vehicle: VehicleId, schedule: PeriodicSchedule, unit: U) -> bool
    where
        U: for<'a> Controller<OnBoardContext<'a>> + 'static,
    {
        if !self.fleet.vehicles.contains_key(vehicle) {
            return false;
        }
        let unit: BoxedOnBoardUnit = Box::new(unit);
        match self.on_board.get_mut(vehicle) {
            Some(units) => units.push((schedule, unit)),
            None => {
                self.on_board.insert(vehicle, vec![(schedule, unit)]);
            }
        }
        true
    }

    /// Sets a callback receiving the agents of externally driven vehicles created by
    /// generators. Without one, they are kept for [`take_spawned_agents`](Self::take_spawned_agents).
    pub fn set_agent_spawner(&mut self, spawner: impl FnMut(SpawnedAgent) + 'static) {
        self.spawner = Some(Box::new(spawner));
        for agent in std::mem::take(&mut self.agents) {
            self.deliver(agent);
        }
    }

    /// Takes the agents created since the last call.
    pub fn take_spawned_agents(&mut self) -> Vec<SpawnedAgent> {
        std::mem::take(&mut self.agents)
    }

    fn deliver(&mut self, agent: SpawnedAgent) {
        match self.spawner.as_mut() {
            Some(spawner) => spawner(agent),
            None => self.agents.push(agent),
        }
    }

    /// Sets the `frozen` attribute of a vehicle. When a vehicle is frozen,
    /// it will maximally decelerate until its velocity is zero and remain stopped
    /// until it is no longer frozen.
    pub fn set_vehicle_frozen(&mut self, vehicle_id: VehicleId, frozen: bool) {
        let idx = self.frozen_vehs.iter().position(|id| *id == vehicle_id);
        match (frozen, idx) {
            (true, None) => {
                self.frozen_vehs.push(vehicle_id);
            }
            (false, Some(idx)) => {
                self.frozen_vehs.remove(idx);
            }
            _ => {}
        }
    }

    /// Gets the `frozen` attribute of a vehicle. [Read more](Self::set_vehicle_frozen).
    pub fn get_vehicle_frozen(&self, vehicle_id: VehicleId) -> bool {
        self.frozen_vehs.iter().any(|id| *id == vehicle_id)
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.fleet.vehicles.values()
    }

    /// Gets the vehicle with the given ID, if it is still in the simulation.
    pub fn get_vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.fleet.vehicles.get(vehicle_id)
    }

    /// Gets the driver of a vehicle.
    pub fn get_driver(&self, vehicle_id: VehicleId) -> Option<&dyn Driver> {
        self.fleet.drivers.get(vehicle_id).map(|d| d.as_ref())
    }

    /// Returns an iterator over all the roadside units.
    pub fn iter_rsus(&self) -> impl Iterator<Item = (RsuId, &Rsu)> {
        self.rsus.iter()
    }

    pub fn get_rsu(&self, rsu_id: RsuId) -> Option<&Rsu> {
        self.rsus.get(rsu_id)
    }

    pub fn get_generator(&self, generator_id: GeneratorId) -> Option<&Generator> {
        self.generators.get(generator_id)
    }

    /// Runs steps until the configured duration, passing everything that happens
    /// to the observer.
    pub fn run<O: SimObserver + ?Sized>(&mut self, observer: &mut O) -> SimResult<()> {
        let steps = self.config.num_steps();
        info!(
            "running from t = {} s to {} s, {} vehicles",
            self.time,
            self.config.duration,
            self.fleet.vehicles.len()
        );
        while self.step < steps {
            observer.on_step_start(self.step, self.time);
            let (report, error) = self.advance();
            for sample in &report.samples {
                observer.on_sample(sample);
            }
            for (rsu, lane, sample) in &report.detector_samples {
                observer.on_detector_sample(*rsu, *lane, sample);
            }
            for collision in &report.collisions {
                observer.on_collision(collision);
            }
            for (serial, reason) in &report.removed {
                observer.on_vehicle_removed(*serial, *reason);
            }
            observer.on_step_end(&report);
            if let Some(error) = error {
                return Err(error);
            }
        }
        observer.on_finish(self.time);
        info!(
            "finished at t = {} s, {} vehicles",
            self.time,
            self.fleet.vehicles.len()
        );
        Ok(())
    }

    /// Advances the simulation by one step.
    ///
    /// Fails only on a collision when `stop_on_collision` is set. The step
    /// is complete even then.
    pub fn step(&mut self) -> SimResult<StepReport> {
        match self.advance() {
            (_, Some(error)) => Err(error),
            (report, None) => Ok(report),
        }
    }

    fn advance(&mut self) -> (StepReport, Option<SimError>) {
        let clock = StepClock {
            now: self.time,
            dt: self.config.step_size,
            step: self.step,
        };
        let mut report = StepReport {
            step: self.step,
            ..Default::default()
        };

        // Vehicles added during this step are not sensed, decided for or moved
        self.scratch.clear();
        let active = self.fleet.vehicles.keys().collect::<Vec<_>>();
        trace!("step {}: {} vehicles", clock.step, active.len());

        self.sense(&active);
        self.decide(&active, clock, &mut report);
        if self.config.record_trajectories {
            self.collect_samples(&active, clock, &mut report);
        }
        self.run_rsus(clock, &mut report);
        self.run_on_board_units(&active, clock);
        self.run_controllers(clock);
        self.run_generators(clock, &mut report);
        self.drive(&active, clock);
        for id in &active {
            self.move_vehicle(*id, clock, &mut report);
        }
        for lane in self.network.lanes_mut() {
            lane.sort_vehicles(&self.fleet.vehicles);
        }

        let mut error = None;
        if self.config.check_collisions {
            self.remove_collisions(clock.now + clock.dt, &mut report);
            if self.config.stop_on_collision {
                error = report.collisions.first().map(|c| SimError::Collision {
                    time: c.time,
                    lane: c.lane,
                    vehicle: c.vehicle,
                    other: c.other,
                });
            }
        }

        self.step += 1;
        self.time = self.step as f64 * self.config.step_size;
        report.time = self.time;
        (report, error)
    }

    /// Recomputes every vehicle's neighbour cache and crash flag.
    fn sense(&mut self, active: &[VehicleId]) {
        let down = Enclosure::Down.slot().unwrap_or(1);
        let mut sensed = Vec::with_capacity(active.len());
        for id in active {
            let vehicle = &self.fleet.vehicles[*id];
            let neighbours = Enclosure::NEIGHBOURS
                .map(|enclosure| self.network.search(&self.fleet.vehicles, vehicle, enclosure));
            let crashed = neighbours[down].map_or(false, |leader| {
                let leader = &self.fleet.vehicles[leader];
                let x = leader.x() + self.scratch.x_adj(&self.network, vehicle.lane(), leader.lane());
                has_crashed(x, vehicle.front())
            });
            sensed.push((*id, neighbours, crashed));
        }
        for (id, neighbours, crashed) in sensed {
            self.fleet.vehicles[id].sense(neighbours, crashed);
        }
    }

    /// Asks every driver for a decision and waits at the barrier for the ones
    /// that answer later.
    fn decide(&mut self, active: &[VehicleId], clock: StepClock, report: &mut StepReport) {
        self.barrier.set_policy(BarrierPolicy::from_config(&self.config));
        self.barrier.reset(clock.step, active.len());

        let Fleet {
            vehicles, drivers, ..
        } = &mut self.fleet;
        let vehicles = &*vehicles;
        let mut pending = vec![];
        for id in active {
            let Some(driver) = drivers.get_mut(*id) else {
                self.barrier.report(*id);
                continue;
            };
            let mut ctx = DecisionContext {
                clock,
                vehicle: &vehicles[*id],
                vehicles,
                network: &self.network,
                rsus: &self.rsus,
                scratch: &mut self.scratch,
            };
            if driver.decide(&mut ctx) {
                self.barrier.report(*id);
            } else {
                pending.push(*id);
            }
        }

        let missed = self.barrier.wait_for(&pending, Instant::now(), |id, deadline| {
            drivers
                .get_mut(id)
                .map_or(false, |driver| driver.await_decision(clock.step, deadline))
        });
        let fallback = self.barrier.policy().fallback;
        for id in missed {
            let vehicle = &vehicles[id];
            warn!(
                "vehicle {} missed the decision deadline of step {}, applying {:?}",
                vehicle.serial(),
                clock.step,
                fallback
            );
            if let Some(driver) = drivers.get_mut(id) {
                driver.apply_fallback(fallback, vehicle);
            }
            self.barrier.report(id);
            report.timed_out.push(vehicle.serial());
        }
        trace!(
            "step {}: barrier released with {} decisions",
            clock.step,
            self.barrier.count()
        );
    }

    fn collect_samples(&mut self, active: &[VehicleId], clock: StepClock, report: &mut StepReport) {
        for id in active {
            let vehicle = &self.fleet.vehicles[*id];
            let gap = vehicle
                .neighbour(Enclosure::Down)
                .and_then(|leader| self.fleet.vehicles.get(leader))
                .map(|leader| {
                    leader.x() + self.scratch.x_adj(&self.network, vehicle.lane(), leader.lane())
                        - vehicle.front()
                });
            report.samples.push(VehicleSample {
                step: clock.step,
                time: clock.now,
                serial: vehicle.serial(),
                lane: self.network.lane(vehicle.lane()).number(),
                x: vehicle.x(),
                speed: vehicle.speed(),
                acceleration: vehicle.acceleration(),
                gap,
                lane_change: vehicle.lane_change().map(|lc| lc.direction),
                lane_change_progress: vehicle.lane_change().map_or(0.0, |lc| lc.progress),
            });
        }
    }

    /// Runs the roadside units, in lane order.
    fn run_rsus(&mut self, clock: StepClock, report: &mut StepReport) {
        for lane in self.network.lanes() {
            for (_, id) in lane.rsus() {
                let Some(rsu) = self.rsus.get_mut(id) else {
                    continue;
                };
                let before = rsu.as_detector().map_or(0, |d| d.samples().len());
                let mut clock = clock;
                rsu.run(&mut clock);
                if let Some(sample) = rsu
                    .as_detector()
                    .filter(|d| d.samples().len() > before)
                    .and_then(|d| d.samples().last())
                {
                    report.detector_samples.push((id, lane.number(), *sample));
                }
            }
        }
    }

    fn run_on_board_units(&mut self, active: &[VehicleId], clock: StepClock) {
        for id in active {
            let Some(units) = self.on_board.get_mut(*id) else {
                continue;
            };
            let (Some(vehicle), Some(driver)) =
                (self.fleet.vehicles.get(*id), self.fleet.drivers.get_mut(*id))
            else {
                continue;
            };
            let mut ctx = OnBoardContext {
                clock,
                vehicle,
                network: &self.network,
                vehicles: &self.fleet.vehicles,
                rsus: &self.rsus,
                driver: driver.as_mut(),
            };
            for (schedule, unit) in units.iter_mut() {
                schedule.run(clock.now, unit.as_mut(), &mut ctx);
            }
        }
    }

    fn run_controllers(&mut self, clock: StepClock) {
        let mut ctx = ControlContext {
            clock,
            network: &self.network,
            vehicles: &self.fleet.vehicles,
            rsus: &mut self.rsus,
        };
        for (schedule, controller) in self.controllers.iter_mut() {
            schedule.run(clock.now, controller.as_mut(), &mut ctx);
        }
    }

    fn run_generators(&mut self, clock: StepClock, report: &mut StepReport) {
        let mut agents = vec![];
        let mut ctx = GenerationContext {
            clock,
            network: &mut self.network,
            fleet: &mut self.fleet,
            rng: &mut self.rng,
            admitted: &mut report.admitted,
            agents: &mut agents,
        };
        for generator in self.generators.values_mut() {
            generator.run(&mut ctx);
        }
        for agent in agents {
            self.deliver(agent);
        }
    }

    /// Applies each driver's decision to its vehicle. Nothing moves yet.
    fn drive(&mut self, active: &[VehicleId], clock: StepClock) {
        for id in active {
            let (Some(driver), Some(vehicle)) =
                (self.fleet.drivers.get_mut(*id), self.fleet.vehicles.get_mut(*id))
            else {
                continue;
            };
            let decision = driver.drive();
            vehicle.set_acceleration(decision.acceleration);
            let lane = self.network.lane(vehicle.lane());
            match decision.lane_change {
                LaneChangeIntent::Start(dir) => {
                    if lane.can_change(dir) && vehicle.start_lane_change(dir, clock.dt) {
                        debug!(
                            "vehicle {} changing lanes to the {:?} from lane {}",
                            vehicle.serial(),
                            dir,
                            lane.number()
                        );
                    }
                }
                LaneChangeIntent::Indicate(dir) => {
                    if vehicle.lane_change().is_none() {
                        vehicle.set_indicator(Some(dir));
                    }
                }
                LaneChangeIntent::Abort => vehicle.abort_lane_change(),
                LaneChangeIntent::Keep => {
                    if vehicle.lane_change().is_none() {
                        vehicle.set_indicator(None);
                    }
                }
            }
        }
        self.apply_frozen_vehicles();
    }

    /// Applies a large negative acceleration to all frozen vehicles.
    fn apply_frozen_vehicles(&mut self) {
        self.frozen_vehs.retain(|vehicle_id| {
            if let Some(vehicle) = self.fleet.vehicles.get_mut(*vehicle_id) {
                vehicle.emergency_stop();
                true
            } else {
                false
            }
        })
    }

    /// Moves a vehicle, completes its lane change and carries it over lane ends.
    fn move_vehicle(&mut self, id: VehicleId, clock: StepClock, report: &mut StepReport) {
        let Some(vehicle) = self.fleet.vehicles.get_mut(id) else {
            return;
        };
        let lane = vehicle.lane();
        let front = vehicle.front();
        let dx = vehicle.integrate(clock.dt);
        let event = LaneEvent::VehicleCrossed {
            vehicle: id,
            serial: vehicle.serial(),
            speed: vehicle.speed(),
            time: clock.now + clock.dt,
        };
        self.dispatch_crossings(lane, Interval::new(front, front + dx), &event);

        let vehicle = &mut self.fleet.vehicles[id];
        if let Some(dir) = vehicle.completed_lane_change() {
            match self.network.lane(lane).lateral(dir) {
                Some(target) => {
                    let x = self.network.map_x(lane, target, vehicle.x());
                    vehicle.finish_lane_change(target, x);
                    debug!(
                        "vehicle {} completed a lane change to lane {}",
                        vehicle.serial(),
                        self.network.lane(target).number()
                    );
                    self.network.lane_mut(lane).remove_vehicle(id);
                    self.network
                        .lane_mut(target)
                        .insert_vehicle(&self.fleet.vehicles, id);
                }
                None => vehicle.abort_lane_change(),
            }
        }

        if self.cross_lane_ends(id, report) {
            let vehicle = &mut self.fleet.vehicles[id];
            vehicle.update_coords(&self.network);
        }
    }

    /// Notifies the roadside units whose position the front of a vehicle swept past,
    /// on its lane and the lanes downstream.
    fn dispatch_crossings(&mut self, lane: LaneId, sweep: Interval, event: &LaneEvent) {
        if !(sweep.length() > 0.0) {
            return;
        }
        let mut cur = lane;
        let mut offset = 0.0;
        loop {
            let l = self.network.lane(cur);
            for (x, rsu) in l.rsus() {
                if sweep.swept(x + offset) {
                    if let Some(rsu) = self.rsus.get_mut(rsu) {
                        rsu.observe(event);
                    }
                }
            }
            offset += l.length();
            if sweep.max <= offset {
                return;
            }
            match l.longitudinal(Longitudinal::Down) {
                Some(next) if next != lane => cur = next,
                _ => return,
            }
        }
    }

    /// Carries a vehicle whose rear passed the end of its lane onto the lane downstream,
    /// or removes it. Returns whether the vehicle is still in the simulation.
    fn cross_lane_ends(&mut self, id: VehicleId, report: &mut StepReport) -> bool {
        loop {
            let Some(vehicle) = self.fleet.vehicles.get(id) else {
                return false;
            };
            let lane = self.network.lane(vehicle.lane());
            if vehicle.x() < lane.length() {
                return true;
            }
            let Some(driver) = self.fleet.drivers.get_mut(id) else {
                return true;
            };
            let route = driver.route_mut();
            let down = lane.longitudinal(Longitudinal::Down);
            let outcome = if route.ends_on(lane) {
                Err(RemovalReason::Arrived)
            } else {
                match down {
                    None => Err(RemovalReason::DeadEnd),
                    Some(down) => {
                        if let Some(passed) = lane.destination() {
                            route.truncate_past(passed);
                        }
                        if route.is_feasible_from(self.network.lane(down)) {
                            Ok(down)
                        } else {
                            Err(RemovalReason::RouteInfeasible)
                        }
                    }
                }
            };

            let (from, x) = (lane.id(), vehicle.x() - lane.length());
            match outcome {
                Err(reason) => {
                    if let Some(vehicle) = self.discard(id, reason) {
                        report.removed.push((vehicle.serial(), reason));
                    }
                    return false;
                }
                Ok(down) => {
                    self.network.lane_mut(from).remove_vehicle(id);
                    let has_side =
                        |dir| self.network.lane(down).lateral(dir).is_some();
                    let vehicle = &mut self.fleet.vehicles[id];
                    vehicle.transfer(down, x);
                    vehicle.invalidate_lateral();
                    if let Some(lc) = vehicle.lane_change().copied() {
                        if !has_side(lc.direction) {
                            vehicle.abort_lane_change();
                        }
                    }
                    self.network
                        .lane_mut(down)
                        .insert_vehicle(&self.fleet.vehicles, id);
                }
            }
        }
    }

    /// Removes a vehicle with everything attached to it.
    fn discard(&mut self, id: VehicleId, reason: RemovalReason) -> Option<Vehicle> {
        let vehicle = self.fleet.remove(&mut self.network, id)?;
        self.on_board.remove(id);
        self.frozen_vehs.retain(|v| *v != id);
        debug!("vehicle {} removed: {:?}", vehicle.serial(), reason);
        Some(vehicle)
    }

    /// Removes every vehicle that ran into the vehicle ahead of it, reporting a collision for each.
    /// This covers vehicles flagged as crashed when sensing and vehicles that overlap after moving.
    fn remove_collisions(&mut self, time: f64, report: &mut StepReport) {
        let vehicles = &self.fleet.vehicles;
        let mut crashed = vec![];
        for lane in self.network.lanes() {
            let list = lane.vehicles();
            let mut pairs = list
                .windows(2)
                .map(|pair| (pair[0], pair[1], 0.0))
                .collect::<Vec<_>>();
            let next = lane
                .longitudinal(Longitudinal::Down)
                .and_then(|down| self.network.lane(down).vehicles().first());
            if let (Some(last), Some(first)) = (list.last(), next) {
                if last != first {
                    pairs.push((*last, *first, lane.length()));
                }
            }
            for (follower, leader, offset) in pairs {
                let (f, l) = (&vehicles[follower], &vehicles[leader]);
                if has_crashed(l.x() + offset, f.front()) {
                    crashed.push((follower, leader, lane.number()));
                }
            }
        }
        for (id, vehicle) in vehicles {
            if !vehicle.is_crashed() || crashed.iter().any(|(follower, ..)| *follower == id) {
                continue;
            }
            if let Some(leader) = vehicle.neighbour(Enclosure::Down) {
                let lane = self.network.lane(vehicle.lane()).number();
                crashed.push((id, leader, lane));
            }
        }

        // Leaders may be removed before their followers
        let crashed = crashed
            .into_iter()
            .filter_map(|(follower, leader, lane)| {
                let other = vehicles.get(leader)?.serial();
                Some((follower, other, lane))
            })
            .collect::<Vec<_>>();
        for (follower, other, lane) in crashed {
            let Some(vehicle) = self.discard(follower, RemovalReason::Collision) else {
                continue;
            };
            let collision = Collision {
                time,
                lane,
                vehicle: vehicle.serial(),
                other,
            };
            warn!(
                "vehicle {} collided with vehicle {} on lane {} at t = {} s",
                collision.vehicle, collision.other, collision.lane, collision.time
            );
            report.removed.push((collision.vehicle, RemovalReason::Collision));
            report.collisions.push(collision);
        }
    }
}
