//! Generators: queues of vehicles waiting to enter the network at the start of a lane.

use crate::controller::{Controller, PeriodicSchedule, StepClock};
use crate::driver::{Driver, ExternalDriver, LmrsDriver, Param, ParameterTable, Parameters};
use crate::error::{SimError, SimResult};
use crate::network::Network;
use crate::route::Route;
use crate::simulation::{Fleet, SpawnedAgent};
use crate::topology::Longitudinal;
use crate::vehicle::VehicleAttributes;
use crate::LaneId;
use log::{debug, trace};
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How often a generator creates vehicles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Demand {
    /// A vehicle is always waiting; the lane is filled as fast as the gap allows.
    Saturated,
    /// Exponentially distributed headways, with the flow in veh/h.
    Poisson { flow: f64 },
    /// Constant headways, with the flow in veh/h.
    Uniform { flow: f64 },
}

/// Who drives the vehicles of a class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverSpec {
    /// The built-in IDM+/LMRS driver, with parameters drawn from the table.
    Lmrs { parameters: ParameterTable },
    /// An outside agent, handed an [`AgentHandle`](crate::AgentHandle) on admission.
    External,
}

/// A kind of vehicle a generator may create.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleClass {
    pub tag: String,
    pub attributes: VehicleAttributes,
    pub driver: DriverSpec,
    /// Relative weight when drawing a class.
    pub probability: f64,
}

impl VehicleClass {
    pub fn new(tag: impl Into<String>, attributes: VehicleAttributes, driver: DriverSpec) -> Self {
        Self {
            tag: tag.into(),
            attributes,
            driver,
            probability: 1.0,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }
}

impl Default for VehicleClass {
    fn default() -> Self {
        Self::new(
            "car",
            VehicleAttributes::default(),
            DriverSpec::Lmrs {
                parameters: ParameterTable::stochastic(),
            },
        )
    }
}

/// A vehicle waiting in a generator's queue.
#[derive(Clone, Debug)]
struct Candidate {
    class: usize,
    route: Route,
    /// Drawn when the candidate is created, so a retry admits the same driver.
    parameters: Option<Parameters>,
}

/// Creates vehicles according to a demand and admits them at the start of a lane.
///
/// A vehicle is admitted only when the space headway at the start of the lane is at
/// least the configured gap and at least the vehicle's length. Until then vehicles
/// wait in a FIFO queue and the head of the queue is retried every time the generator
/// runs. A queued vehicle is never dropped.
#[derive(Clone, Debug)]
pub struct Generator {
    lane: LaneId,
    /// Minimum space headway for admission, in m.
    gap: f64,
    demand: Demand,
    classes: Vec<VehicleClass>,
    /// Routes with their relative weights.
    routes: Vec<(Route, f64)>,
    queue: VecDeque<Candidate>,
    /// Simulated time of the next arrival into the queue.
    next_arrival: Option<f64>,
    schedule: PeriodicSchedule,
    admitted: u64,
}

impl Generator {
    /// A generator on `lane`, running every step.
    pub fn new(lane: LaneId, gap: f64, demand: Demand) -> Self {
        Self {
            lane,
            gap: gap.max(0.0),
            demand,
            classes: vec![],
            routes: vec![],
            queue: VecDeque::new(),
            next_arrival: None,
            schedule: PeriodicSchedule::every_step(),
            admitted: 0,
        }
    }

    /// Adds a vehicle class. Without any, every vehicle is a [`VehicleClass::default`].
    pub fn with_class(mut self, class: VehicleClass) -> Self {
        self.classes.push(class);
        self
    }

    /// Adds a route with a relative weight. Without any, vehicles have an empty route.
    pub fn with_route(mut self, route: Route, weight: f64) -> Self {
        self.routes.push((route, weight));
        self
    }

    /// Runs the generator on a different schedule.
    pub fn with_schedule(mut self, schedule: PeriodicSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn lane(&self) -> LaneId {
        self.lane
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    pub fn demand(&self) -> Demand {
        self.demand
    }

    /// The number of vehicles waiting to enter.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The number of vehicles admitted so far.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Checks that every route can be followed from the generator's lane,
    /// and fills in the default class.
    pub(crate) fn prepare(&mut self, network: &Network) -> SimResult<()> {
        let lane = network.get(self.lane).ok_or_else(|| {
            SimError::UnknownLane(format!("{:?}", self.lane))
        })?;
        for (route, _) in &self.routes {
            if let Some(destination) = route.current() {
                if !route.is_feasible_from(lane) {
                    return Err(SimError::UnreachableDestination {
                        lane: lane.number(),
                        destination,
                    });
                }
            }
        }
        if self.classes.is_empty() {
            self.classes.push(VehicleClass::default());
        }
        Ok(())
    }

    /// Runs the generator if its schedule is due. Returns whether it ran.
    pub(crate) fn run(&mut self, ctx: &mut GenerationContext) -> bool {
        let mut schedule = self.schedule;
        let ran = schedule.run(ctx.clock.now, self, ctx);
        self.schedule = schedule;
        ran
    }

    /// Queues the vehicles that arrived by `now`.
    fn arrivals(&mut self, now: f64, rng: &mut StdRng) {
        match self.demand {
            Demand::Saturated => {
                if self.queue.is_empty() {
                    self.enqueue(rng);
                }
            }
            Demand::Poisson { flow } | Demand::Uniform { flow } => {
                if !(flow > 0.0) {
                    return;
                }
                let mut next = match self.next_arrival {
                    Some(next) => next,
                    None => match self.demand {
                        Demand::Poisson { .. } => now + self.headway(rng),
                        _ => now,
                    },
                };
                while next <= now + 1e-9 {
                    self.enqueue(rng);
                    next += self.headway(rng);
                }
                self.next_arrival = Some(next);
            }
        }
    }

    /// Draws the time until the next arrival, in s.
    fn headway(&self, rng: &mut StdRng) -> f64 {
        match self.demand {
            Demand::Saturated => 0.0,
            Demand::Uniform { flow } => 3600.0 / flow,
            Demand::Poisson { flow } => match Exp::new(flow / 3600.0) {
                Ok(distr) => distr.sample(rng),
                Err(_) => f64::INFINITY,
            },
        }
    }

    /// Draws a new candidate and appends it to the queue.
    fn enqueue(&mut self, rng: &mut StdRng) {
        let class = draw_weighted(self.classes.iter().map(|c| c.probability), rng);
        let route = match draw_weighted(self.routes.iter().map(|(_, w)| *w), rng) {
            Some(idx) => self.routes[idx].0.clone(),
            None => Route::default(),
        };
        let class = class.unwrap_or(0);
        let parameters = match self.classes.get(class).map(|c| &c.driver) {
            Some(DriverSpec::Lmrs { parameters }) => Some(parameters.draw(rng)),
            _ => None,
        };
        self.queue.push_back(Candidate {
            class,
            route,
            parameters,
        });
    }
}

/// Picks an index with probability proportional to its weight.
fn draw_weighted(weights: impl Iterator<Item = f64>, rng: &mut StdRng) -> Option<usize> {
    let weights = weights.collect::<Vec<_>>();
    match weights.len() {
        0 => None,
        1 => Some(0),
        _ => WeightedIndex::new(&weights)
            .ok()
            .map(|distr| distr.sample(rng)),
    }
}

/// What a generator needs to admit vehicles.
pub struct GenerationContext<'a> {
    pub clock: StepClock,
    pub(crate) network: &'a mut Network,
    pub(crate) fleet: &'a mut Fleet,
    pub(crate) rng: &'a mut StdRng,
    /// Serials of the vehicles admitted this step.
    pub(crate) admitted: &'a mut Vec<u64>,
    pub(crate) agents: &'a mut Vec<SpawnedAgent>,
}

impl<'a> Controller<GenerationContext<'a>> for Generator {
    fn control(&mut self, ctx: &mut GenerationContext<'a>) {
        self.arrivals(ctx.clock.now, ctx.rng);

        let Some(candidate) = self.queue.front() else {
            return;
        };
        let Some(class) = self.classes.get(candidate.class) else {
            return;
        };

        // Space headway from the start of the lane to the first vehicle downstream
        let vehicles = &ctx.fleet.vehicles;
        let leader = ctx
            .network
            .find_vehicle(vehicles, self.lane, 0.0, Longitudinal::Down)
            .map(|id| &vehicles[id]);
        let headway = leader.map_or(f64::INFINITY, |leader| {
            leader.x() + ctx.network.x_adj(self.lane, leader.lane())
        });
        if headway < self.gap || headway < class.attributes.length {
            trace!(
                "generator on lane {} waiting, headway {:.1} m, {} queued",
                ctx.network.lane(self.lane).number(),
                headway,
                self.queue.len()
            );
            return;
        }

        let f_speed = candidate
            .parameters
            .as_ref()
            .map_or(1.0, |params| params[Param::FSpeed]);
        let lane = ctx.network.lane(self.lane);
        let mut speed = f64::min(class.attributes.max_speed, f_speed * lane.speed_limit());
        if let Some(leader) = leader {
            speed = speed.min(leader.speed());
        }

        let Some(candidate) = self.queue.pop_front() else {
            return;
        };
        let tag = class.tag.clone();
        let attributes = class.attributes;
        let mut handle = None;
        let driver: Box<dyn Driver> = match &class.driver {
            DriverSpec::Lmrs { .. } => {
                let params = candidate.parameters.unwrap_or_default();
                Box::new(LmrsDriver::new(tag.clone(), params, candidate.route))
            }
            DriverSpec::External => {
                let (driver, agent) = ExternalDriver::new(tag.clone(), candidate.route);
                handle = Some(agent);
                Box::new(driver)
            }
        };

        let id = ctx
            .fleet
            .admit(ctx.network, &attributes, self.lane, 0.0, speed, driver);
        let serial = ctx.fleet.vehicles[id].serial();
        self.admitted += 1;
        ctx.admitted.push(serial);
        if let Some(handle) = handle {
            ctx.agents.push(SpawnedAgent {
                vehicle: id,
                serial,
                tag: tag.clone(),
                handle,
            });
        }
        debug!(
            "vehicle {} ({}) admitted on lane {} at {:.1} m/s",
            serial,
            tag,
            ctx.network.lane(self.lane).number(),
            speed
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lane::LaneAttributes;
    use crate::math::Point2d;
    use rand::SeedableRng;

    fn network() -> (Network, LaneId) {
        let mut builder = Network::builder();
        let lane = builder
            .add_lane(LaneAttributes::straight(
                1,
                Point2d::new(0.0, 0.0),
                Point2d::new(500.0, 0.0),
                25.0,
            ))
            .unwrap();
        (builder.build().unwrap(), lane)
    }

    fn tick(
        generator: &mut Generator,
        network: &mut Network,
        fleet: &mut Fleet,
        rng: &mut StdRng,
        now: f64,
    ) -> Vec<u64> {
        let mut admitted = vec![];
        let mut agents = vec![];
        let mut ctx = GenerationContext {
            clock: StepClock { now, dt: 0.5, step: 0 },
            network,
            fleet,
            rng,
            admitted: &mut admitted,
            agents: &mut agents,
        };
        generator.control(&mut ctx);
        admitted
    }

    #[test]
    fn waits_for_the_gap() {
        let (mut network, lane) = network();
        let mut fleet = Fleet::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut generator = Generator::new(lane, 20.0, Demand::Saturated);
        generator.prepare(&network).unwrap();

        assert_eq!(tick(&mut generator, &mut network, &mut fleet, &mut rng, 0.0), vec![0]);
        // The admitted vehicle is still at the start of the lane
        assert!(tick(&mut generator, &mut network, &mut fleet, &mut rng, 0.5).is_empty());
        assert_eq!(generator.queue_len(), 1);

        let first = network.lane(lane).vehicles()[0];
        fleet.vehicles[first].transfer(lane, 19.9);
        assert!(tick(&mut generator, &mut network, &mut fleet, &mut rng, 1.0).is_empty());
        fleet.vehicles[first].transfer(lane, 20.0);
        assert_eq!(tick(&mut generator, &mut network, &mut fleet, &mut rng, 1.5), vec![1]);
        assert_eq!(generator.admitted(), 2);
    }

    #[test]
    fn queue_is_fifo() {
        let (mut network, lane) = network();
        let mut fleet = Fleet::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut generator = Generator::new(lane, 10.0, Demand::Uniform { flow: 3600.0 })
            .with_route(Route::default(), 1.0)
            .with_class(VehicleClass::default().with_probability(1.0));
        generator.prepare(&network).unwrap();

        // One arrival per second; the lane stays blocked, so they queue up
        let blocker = fleet.admit(
            &mut network,
            &VehicleAttributes::default(),
            lane,
            0.0,
            0.0,
            Box::new(LmrsDriver::new("car", Parameters::default(), Route::default())),
        );
        for step in 0..4 {
            assert!(tick(&mut generator, &mut network, &mut fleet, &mut rng, step as f64).is_empty());
        }
        assert_eq!(generator.queue_len(), 4);
        let queued = generator
            .queue
            .iter()
            .map(|c| c.parameters.as_ref().map(|p| p[Param::FSpeed]))
            .collect::<Vec<_>>();

        fleet.vehicles[blocker].transfer(lane, 100.0);
        tick(&mut generator, &mut network, &mut fleet, &mut rng, 3.5);
        assert_eq!(generator.queue_len(), 3);
        let remaining = generator
            .queue
            .iter()
            .map(|c| c.parameters.as_ref().map(|p| p[Param::FSpeed]))
            .collect::<Vec<_>>();
        assert_eq!(remaining, queued[1..].to_vec());
    }

    #[test]
    fn unreachable_route_is_rejected() {
        let (network, lane) = network();
        let mut generator =
            Generator::new(lane, 10.0, Demand::Saturated).with_route(Route::new(vec![9]), 1.0);
        assert!(matches!(
            generator.prepare(&network),
            Err(SimError::UnreachableDestination { lane: 1, destination: 9 })
        ));
    }

    #[test]
    fn external_classes_spawn_agents() {
        let (mut network, lane) = network();
        let mut fleet = Fleet::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut generator = Generator::new(lane, 10.0, Demand::Saturated).with_class(
            VehicleClass::new("agent", VehicleAttributes::default(), DriverSpec::External),
        );
        generator.prepare(&network).unwrap();

        let mut admitted = vec![];
        let mut agents = vec![];
        let mut ctx = GenerationContext {
            clock: StepClock { now: 0.0, dt: 0.5, step: 0 },
            network: &mut network,
            fleet: &mut fleet,
            rng: &mut rng,
            admitted: &mut admitted,
            agents: &mut agents,
        };
        generator.control(&mut ctx);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].tag, "agent");
        assert_eq!(fleet.drivers[agents[0].vehicle].tag(), "agent");
    }
}
