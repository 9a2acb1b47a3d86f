use crate::rsu::DetectorSample;
use crate::topology::Lateral;
use crate::RsuId;
use serde::Serialize;

/// The state of one vehicle at the start of a step, after sensing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleSample {
    pub step: u64,
    pub time: f64,
    pub serial: u64,
    /// The number of the lane.
    pub lane: u32,
    pub x: f64,
    pub speed: f64,
    pub acceleration: f64,
    /// Net gap to the leader, if there is one.
    pub gap: Option<f64>,
    pub lane_change: Option<Lateral>,
    /// Lateral progress of the lane change in [0, 1].
    pub lane_change_progress: f64,
}

/// Two vehicles found overlapping.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Collision {
    pub time: f64,
    pub lane: u32,
    /// The vehicle that ran into the other.
    pub vehicle: u64,
    pub other: u64,
}

/// Why a vehicle left the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RemovalReason {
    /// Reached the end of its route.
    Arrived,
    /// Ran off the end of a lane with nothing downstream.
    DeadEnd,
    /// Can no longer follow its route.
    RouteInfeasible,
    Collision,
    /// Removed by the user.
    Removed,
}

/// What happened during one step.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepReport {
    pub step: u64,
    /// Simulated time at the end of the step.
    pub time: f64,
    /// Serials of the vehicles admitted by generators.
    pub admitted: Vec<u64>,
    pub removed: Vec<(u64, RemovalReason)>,
    pub collisions: Vec<Collision>,
    /// Serials of the vehicles whose decision missed the deadline.
    pub timed_out: Vec<u64>,
    pub samples: Vec<VehicleSample>,
    /// Detector periods completed in this step, with the lane number.
    #[serde(skip)]
    pub detector_samples: Vec<(RsuId, u32, DetectorSample)>,
}

/// Receives the output of a running simulation. Every method does nothing by default.
pub trait SimObserver {
    fn on_step_start(&mut self, _step: u64, _time: f64) {}

    fn on_sample(&mut self, _sample: &VehicleSample) {}

    fn on_vehicle_removed(&mut self, _serial: u64, _reason: RemovalReason) {}

    fn on_collision(&mut self, _collision: &Collision) {}

    fn on_detector_sample(&mut self, _rsu: RsuId, _lane: u32, _sample: &DetectorSample) {}

    fn on_step_end(&mut self, _report: &StepReport) {}

    fn on_finish(&mut self, _time: f64) {}
}

/// An observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SimObserver for NoopObserver {}
