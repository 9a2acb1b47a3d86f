//! Tests that run generators, detectors and the observer over longer periods.

use lane_sim::{
    math::Point2d, Collision, Demand, DetectorSample, DriverSpec, Generator, LaneAttributes,
    LaneId, Lateral, LmrsDriver, Network, ParameterTable, Parameters, RemovalReason, Route, RsuId,
    SimConfig, SimObserver, Simulation, VehicleAttributes, VehicleClass, VehicleId,
};

/// Collects detector aggregates and collisions.
#[derive(Default)]
struct Recorder {
    samples: Vec<(u32, DetectorSample)>,
    collisions: Vec<Collision>,
    steps: u64,
    finished: Option<f64>,
}

impl SimObserver for Recorder {
    fn on_detector_sample(&mut self, _rsu: RsuId, lane: u32, sample: &DetectorSample) {
        self.samples.push((lane, *sample));
    }

    fn on_collision(&mut self, collision: &Collision) {
        self.collisions.push(collision.clone());
    }

    fn on_step_start(&mut self, _step: u64, _time: f64) {
        self.steps += 1;
    }

    fn on_finish(&mut self, time: f64) {
        self.finished = Some(time);
    }
}

fn deterministic_car() -> VehicleClass {
    VehicleClass::new(
        "car",
        VehicleAttributes::default(),
        DriverSpec::Lmrs {
            parameters: ParameterTable::new(),
        },
    )
}

/// Two independent lanes fed with different minimum gaps carry different flows.
#[test]
fn generator_gap_sets_the_flow() {
    let mut builder = Network::builder();
    let mut lanes = vec![];
    for (number, y) in [(1, 0.0), (2, 50.0)] {
        let lane = builder
            .add_lane(LaneAttributes::straight(
                number,
                Point2d::new(0.0, y),
                Point2d::new(1000.0, y),
                15.0,
            ))
            .unwrap();
        lanes.push(lane);
    }
    let network = builder.build().unwrap();

    let config = SimConfig {
        step_size: 0.5,
        duration: 600.0,
        ..Default::default()
    };
    let mut sim = Simulation::new(network, config).unwrap();
    for (lane, gap) in [(lanes[0], 20.0), (lanes[1], 30.0)] {
        let generator = Generator::new(lane, gap, Demand::Saturated).with_class(deterministic_car());
        sim.add_generator(generator).unwrap();
        sim.add_detector(lane, 500.0, Some(60.0)).unwrap();
    }

    let mut recorder = Recorder::default();
    sim.run(&mut recorder).unwrap();

    assert_eq!(recorder.steps, 1200);
    assert_eq!(recorder.finished, Some(600.0));
    assert!(recorder.collisions.is_empty());

    // Skip the warm-up while the first vehicles reach the detectors
    let count = |lane: u32| {
        recorder
            .samples
            .iter()
            .filter(|(l, s)| *l == lane && s.time > 120.0)
            .map(|(_, s)| s.count)
            .sum::<u64>()
    };
    let (dense, sparse) = (count(1), count(2));
    assert!(sparse > 0);
    assert!(dense > sparse, "gap 20: {}, gap 30: {}", dense, sparse);
}

/// Vehicles queue behind a generator whose lane is blocked, and enter in order once it clears.
#[test]
fn blocked_generator_queues_vehicles() {
    let mut builder = Network::builder();
    let lane = builder
        .add_lane(LaneAttributes::straight(
            1,
            Point2d::new(0.0, 0.0),
            Point2d::new(300.0, 0.0),
            15.0,
        ))
        .unwrap();
    let config = SimConfig {
        step_size: 0.5,
        ..Default::default()
    };
    let mut sim = Simulation::new(builder.build().unwrap(), config).unwrap();
    let generator = sim
        .add_generator(
            Generator::new(lane, 30.0, Demand::Uniform { flow: 3600.0 })
                .with_class(deterministic_car()),
        )
        .unwrap();

    // The first vehicle enters at once; freezing it blocks the entrance
    let report = sim.step().unwrap();
    assert_eq!(report.admitted, vec![0]);
    let first = sim.iter_vehicles().next().unwrap().id();
    sim.set_vehicle_frozen(first, true);

    let mut admitted = vec![];
    for _ in 0..20 {
        admitted.extend(sim.step().unwrap().admitted);
    }
    let generator_state = sim.get_generator(generator).unwrap();
    assert!(admitted.is_empty());
    assert!(generator_state.queue_len() >= 9);

    sim.set_vehicle_frozen(first, false);
    for _ in 0..200 {
        admitted.extend(sim.step().unwrap().admitted);
    }
    let mut sorted = admitted.clone();
    sorted.sort();
    assert_eq!(admitted, sorted);
    assert!(admitted.len() > 10);
}

fn lane(number: u32, from: f64, to: f64, y: f64) -> LaneAttributes {
    LaneAttributes::straight(number, Point2d::new(from, y), Point2d::new(to, y), 20.0)
}

/// Two side by side lanes, 1 on the left and 2 on the right, of the given length.
/// Only lane 1 continues, onto lane 3 which ends at destination 7.
fn two_lanes_one_exit(length: f64) -> (Network, [LaneId; 3]) {
    let mut builder = Network::builder();
    let left = builder.add_lane(lane(1, 0.0, length, 3.5)).unwrap();
    let right = builder.add_lane(lane(2, 0.0, length, 0.0)).unwrap();
    let exit = builder
        .add_lane(lane(3, length, length + 100.0, 3.5).with_destination(7))
        .unwrap();
    builder.connect(left, exit).unwrap();
    builder.connect_lateral(left, right, true, true).unwrap();
    (builder.build().unwrap(), [left, right, exit])
}

fn lmrs(route: Route) -> LmrsDriver {
    LmrsDriver::new("car", Parameters::default(), route)
}

fn lane_number(sim: &Simulation, vehicle: VehicleId) -> Option<u32> {
    let vehicle = sim.get_vehicle(vehicle)?;
    Some(sim.network().lane(vehicle.lane()).number())
}

/// A vehicle on a lane that does not lead to its destination moves across and arrives.
#[test]
fn route_forces_a_lane_change() {
    let (network, [_, right, _]) = two_lanes_one_exit(400.0);
    let mut sim = Simulation::new(network, SimConfig::default()).unwrap();
    let veh = sim
        .add_vehicle(&VehicleAttributes::default(), right, 0.0, 15.0, lmrs(Route::new(vec![7])))
        .unwrap();

    let mut lanes = vec![2];
    let mut halfway = false;
    let mut removed = vec![];
    for _ in 0..200 {
        let report = sim.step().unwrap();
        assert!(report.collisions.is_empty());
        removed.extend(report.removed);
        let Some(number) = lane_number(&sim, veh) else {
            break;
        };
        if lanes.last() != Some(&number) {
            lanes.push(number);
        }
        if let Some(lc) = sim.get_vehicle(veh).unwrap().lane_change() {
            assert_eq!(lc.direction, Lateral::Left);
            halfway |= lc.progress > 0.0 && lc.progress < 1.0;
        }
    }

    assert_eq!(lanes, vec![2, 1, 3]);
    assert!(halfway);
    assert_eq!(removed, vec![(0, RemovalReason::Arrived)]);
}

/// A vehicle stuck behind a stationary vehicle overtakes it on the left.
#[test]
fn slow_leader_is_overtaken() {
    let mut builder = Network::builder();
    let left = builder.add_lane(lane(1, 0.0, 1000.0, 3.5)).unwrap();
    let right = builder.add_lane(lane(2, 0.0, 1000.0, 0.0)).unwrap();
    builder.connect_lateral(left, right, true, true).unwrap();
    let network = builder.build().unwrap();

    let mut sim = Simulation::new(network, SimConfig::default()).unwrap();
    let attributes = VehicleAttributes::default();
    let leader = sim
        .add_vehicle(&attributes, right, 60.0, 0.0, lmrs(Route::default()))
        .unwrap();
    sim.set_vehicle_frozen(leader, true);
    let veh = sim
        .add_vehicle(&attributes, right, 0.0, 15.0, lmrs(Route::default()))
        .unwrap();

    let mut used_left = false;
    for _ in 0..60 {
        let report = sim.step().unwrap();
        assert!(report.collisions.is_empty());
        used_left |= lane_number(&sim, veh) == Some(1);
    }

    assert!(used_left);
    let leader = sim.get_vehicle(leader).unwrap();
    assert!((leader.x() - 60.0).abs() < 1e-9);
    assert!(sim.get_vehicle(veh).unwrap().x() > leader.front());
}

/// A follower brakes to open a gap for a vehicle indicating into its lane.
#[test]
fn follower_makes_room_for_an_indicating_vehicle() {
    let (network, [left, right, _]) = two_lanes_one_exit(200.0);
    let mut sim = Simulation::new(network, SimConfig::default()).unwrap();
    let attributes = VehicleAttributes::default();
    // Close to the end of its lane, with the follower on the target lane too close to merge
    let merging = sim
        .add_vehicle(&attributes, right, 150.0, 10.0, lmrs(Route::new(vec![7])))
        .unwrap();
    let follower = sim
        .add_vehicle(&attributes, left, 140.0, 10.0, lmrs(Route::default()))
        .unwrap();

    sim.step().unwrap();
    assert_eq!(
        sim.get_vehicle(merging).unwrap().indicator(),
        Some(Lateral::Left)
    );
    assert!(sim.get_vehicle(merging).unwrap().lane_change().is_none());
    // Nothing ahead of the follower on its own lane
    assert!(sim.get_vehicle(follower).unwrap().acceleration() > 0.0);

    sim.step().unwrap();
    assert!(sim.get_vehicle(follower).unwrap().acceleration() < 0.0);
}
