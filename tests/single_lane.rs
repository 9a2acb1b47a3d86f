//! Tests that involve the simulation of a single lane.

use assert_approx_eq::assert_approx_eq;
use lane_sim::{
    math::Point2d, LaneAttributes, LaneId, LmrsDriver, Network, Parameters, RemovalReason, Route,
    SimConfig, Simulation, VehicleAttributes,
};

fn straight(number: u32, from: f64, to: f64, speed_limit: f64) -> LaneAttributes {
    LaneAttributes::straight(
        number,
        Point2d::new(from, 0.0),
        Point2d::new(to, 0.0),
        speed_limit,
    )
}

fn single_lane(length: f64, speed_limit: f64) -> (Network, LaneId) {
    let mut builder = Network::builder();
    let lane = builder.add_lane(straight(1, 0.0, length, speed_limit)).unwrap();
    (builder.build().unwrap(), lane)
}

fn driver() -> LmrsDriver {
    LmrsDriver::new("car", Parameters::default(), Route::default())
}

fn config(step_size: f64) -> SimConfig {
    SimConfig {
        step_size,
        ..Default::default()
    }
}

/// Test that a vehicle's position increases monotonically.
#[test]
fn vehicle_drives_forward() {
    let (network, lane) = single_lane(1000.0, 16.66);
    let mut sim = Simulation::new(network, config(0.1)).unwrap();
    let veh = sim
        .add_vehicle(&VehicleAttributes::default(), lane, 0.0, 0.0, driver())
        .unwrap();

    let mut pos = sim.get_vehicle(veh).unwrap().x();
    for _ in 0..100 {
        sim.step().unwrap();
        let vehicle = sim.get_vehicle(veh).unwrap();
        assert!(vehicle.x() > pos);
        assert!(vehicle.speed() >= 0.0);
        assert!(vehicle.speed() <= 16.66 + 1e-6);
        pos = vehicle.x();
    }
}

/// A vehicle approaching a stationary vehicle comes to rest about `s0` behind it.
#[test]
fn follower_stops_behind_frozen_leader() {
    let (network, lane) = single_lane(500.0, 20.0);
    let mut sim = Simulation::new(network, config(0.5)).unwrap();
    let attributes = VehicleAttributes::default();
    let leader = sim.add_vehicle(&attributes, lane, 60.0, 0.0, driver()).unwrap();
    sim.set_vehicle_frozen(leader, true);
    let follower = sim
        .add_vehicle(&attributes, lane, 60.0 - 50.0 - attributes.length, 10.0, driver())
        .unwrap();

    for _ in 0..240 {
        let report = sim.step().unwrap();
        assert!(report.collisions.is_empty());
    }

    let leader = sim.get_vehicle(leader).unwrap();
    let follower = sim.get_vehicle(follower).unwrap();
    assert_approx_eq!(leader.x(), 60.0);
    let gap = leader.x() - follower.front();
    assert!((gap - 3.0).abs() < 1.0, "gap = {}", gap);
    assert!(follower.has_stopped());
}

/// A detector counts a vehicle whose front crosses it in the same step as the
/// vehicle passes onto the next lane.
#[test]
fn detector_counts_across_lane_boundary() {
    let mut builder = Network::builder();
    let a = builder.add_lane(straight(1, 0.0, 100.0, 20.0)).unwrap();
    let b = builder.add_lane(straight(2, 100.0, 200.0, 20.0)).unwrap();
    builder.connect(a, b).unwrap();
    let mut sim = Simulation::new(builder.build().unwrap(), config(0.5)).unwrap();
    let detector = sim.add_detector(b, 3.0, Some(1.0)).unwrap();
    sim.add_vehicle(&VehicleAttributes::default(), a, 90.0, 20.0, driver())
        .unwrap();

    let mut samples = vec![];
    for _ in 0..3 {
        let report = sim.step().unwrap();
        samples.extend(report.detector_samples.into_iter().map(|(_, lane, s)| (lane, s)));
    }

    let detector = sim.get_rsu(detector).and_then(|rsu| rsu.as_detector()).unwrap();
    assert_eq!(detector.total_count(), 1);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, 2);
    assert_approx_eq!(samples[0].1.time, 1.0);
    assert_eq!(samples[0].1.count, 1);
    assert!(samples[0].1.mean_speed.unwrap() > 15.0);
}

#[test]
fn placement_outside_lane_is_rejected() {
    let (network, lane) = single_lane(100.0, 20.0);
    let mut sim = Simulation::new(network, config(0.5)).unwrap();
    assert!(sim
        .add_vehicle(&VehicleAttributes::default(), lane, 100.0, 0.0, driver())
        .is_err());
    assert!(sim
        .add_vehicle(&VehicleAttributes::default(), lane, -1.0, 0.0, driver())
        .is_err());
    assert!(sim.add_detector(lane, 150.0, None).is_err());
}

/// A vehicle on a merge taper that runs off its end without having changed lanes is removed.
#[test]
fn merge_taper_overrun_is_removed() {
    let mut builder = Network::builder();
    let main = builder.add_lane(straight(1, 0.0, 200.0, 30.0)).unwrap();
    let next = builder.add_lane(straight(2, 200.0, 400.0, 30.0)).unwrap();
    let taper = builder
        .add_lane(
            LaneAttributes::straight(3, Point2d::new(0.0, -3.5), Point2d::new(200.0, -3.5), 30.0)
                .with_kind(lane_sim::LaneType::MergeTaper),
        )
        .unwrap();
    builder.connect(main, next).unwrap();
    builder.connect_lateral(main, taper, false, true).unwrap();
    let mut sim = Simulation::new(builder.build().unwrap(), config(0.5)).unwrap();

    let veh = sim
        .add_vehicle(&VehicleAttributes::default(), taper, 195.0, 30.0, driver())
        .unwrap();
    let serial = sim.get_vehicle(veh).unwrap().serial();
    let report = sim.step().unwrap();

    assert!(sim.get_vehicle(veh).is_none());
    assert_eq!(report.removed, vec![(serial, RemovalReason::DeadEnd)]);
    assert!(sim.network().lane(taper).vehicles().is_empty());
}

/// A vehicle whose route ends at a destination is removed there as arrived.
#[test]
fn vehicle_arrives_at_destination() {
    let mut builder = Network::builder();
    let a = builder.add_lane(straight(1, 0.0, 100.0, 20.0)).unwrap();
    let b = builder
        .add_lane(straight(2, 100.0, 120.0, 20.0).with_destination(7))
        .unwrap();
    builder.connect(a, b).unwrap();
    let mut sim = Simulation::new(builder.build().unwrap(), config(0.5)).unwrap();
    let veh = sim
        .add_vehicle(
            &VehicleAttributes::default(),
            a,
            80.0,
            20.0,
            LmrsDriver::new("car", Parameters::default(), Route::new(vec![7])),
        )
        .unwrap();
    let serial = sim.get_vehicle(veh).unwrap().serial();

    let mut removed = vec![];
    for _ in 0..20 {
        removed.extend(sim.step().unwrap().removed);
    }
    assert_eq!(removed, vec![(serial, RemovalReason::Arrived)]);
}

/// A vehicle touching the rear of the vehicle ahead has crashed into it.
#[test]
fn touching_vehicles_collide() {
    let (network, lane) = single_lane(500.0, 20.0);
    let mut sim = Simulation::new(network, config(0.5)).unwrap();
    let attributes = VehicleAttributes::default();
    let leader = sim.add_vehicle(&attributes, lane, 50.0, 0.0, driver()).unwrap();
    sim.set_vehicle_frozen(leader, true);
    let follower = sim
        .add_vehicle(&attributes, lane, 50.0 - attributes.length, 0.0, driver())
        .unwrap();

    let report = sim.step().unwrap();
    assert_eq!(report.collisions.len(), 1);
    assert_eq!(report.collisions[0].vehicle, 1);
    assert_eq!(report.collisions[0].other, 0);
    assert_eq!(report.removed, vec![(1, RemovalReason::Collision)]);
    assert!(sim.get_vehicle(follower).is_none());
    assert!(sim.get_vehicle(leader).is_some());
}

/// A vehicle stopped a small distance behind another has not crashed.
#[test]
fn nearly_touching_vehicles_do_not_collide() {
    let (network, lane) = single_lane(500.0, 20.0);
    let mut sim = Simulation::new(network, config(0.5)).unwrap();
    let attributes = VehicleAttributes::default();
    let leader = sim.add_vehicle(&attributes, lane, 50.0, 0.0, driver()).unwrap();
    sim.set_vehicle_frozen(leader, true);
    sim.add_vehicle(&attributes, lane, 50.0 - attributes.length - 0.01, 0.0, driver())
        .unwrap();

    for _ in 0..10 {
        let report = sim.step().unwrap();
        assert!(report.collisions.is_empty());
    }
    assert_eq!(sim.iter_vehicles().count(), 2);
}
