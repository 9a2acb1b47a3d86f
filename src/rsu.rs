//! Roadside units: lane-attached devices that observe passing vehicles or signal to them.

use crate::controller::{PeriodicSchedule, StepClock};
use crate::{LaneId, VehicleId};

pub use detector::{Detector, DetectorSample};
pub use light::{LightState, TrafficLight};

mod detector;
mod light;

/// An event dispatched by a lane to the roadside units attached to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LaneEvent {
    /// The front of a vehicle passed the unit's position.
    VehicleCrossed {
        vehicle: VehicleId,
        serial: u64,
        /// Speed at the time of crossing, in m/s.
        speed: f64,
        /// Simulated time of the crossing, in s.
        time: f64,
    },
}

/// The device installed in a roadside unit.
#[derive(Clone, Debug)]
pub enum Device {
    Detector(Detector),
    TrafficLight(TrafficLight),
}

/// A device at a fixed position on a lane.
#[derive(Clone, Debug)]
pub struct Rsu {
    lane: LaneId,
    x: f64,
    /// Whether vehicles may drive through it.
    passable: bool,
    /// Whether drivers take notice of it.
    noticeable: bool,
    schedule: PeriodicSchedule,
    device: Device,
}

impl Rsu {
    /// A detector aggregating over the given period.
    pub fn detector(lane: LaneId, x: f64, period: f64) -> Self {
        Self {
            lane,
            x,
            passable: true,
            noticeable: false,
            schedule: PeriodicSchedule::new(period, period),
            device: Device::Detector(Detector::new()),
        }
    }

    /// A traffic light, updated every step.
    pub fn traffic_light(lane: LaneId, x: f64, light: TrafficLight) -> Self {
        Self {
            lane,
            x,
            passable: false,
            noticeable: true,
            schedule: PeriodicSchedule::every_step(),
            device: Device::TrafficLight(light),
        }
    }

    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// The position along the lane in m.
    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn is_passable(&self) -> bool {
        self.passable
    }

    pub fn is_noticeable(&self) -> bool {
        self.noticeable
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// The detector in this unit, if it is one.
    pub fn as_detector(&self) -> Option<&Detector> {
        match &self.device {
            Device::Detector(detector) => Some(detector),
            _ => None,
        }
    }

    /// The traffic light in this unit, if it is one.
    pub fn as_light(&self) -> Option<&TrafficLight> {
        match &self.device {
            Device::TrafficLight(light) => Some(light),
            _ => None,
        }
    }

    /// The state of the signal shown to approaching drivers, if any.
    pub fn signal(&self) -> Option<LightState> {
        match &self.device {
            Device::TrafficLight(light) if self.noticeable => Some(light.state()),
            _ => None,
        }
    }

    /// Handles an event from the lane.
    pub(crate) fn observe(&mut self, event: &LaneEvent) {
        match (&mut self.device, event) {
            (
                Device::Detector(detector),
                LaneEvent::VehicleCrossed { speed, .. },
            ) => detector.see(*speed),
            (Device::TrafficLight(_), _) => {}
        }
    }

    /// Runs the device's controller on its schedule. Returns whether it was due.
    pub(crate) fn run(&mut self, clock: &mut StepClock) -> bool {
        match &mut self.device {
            Device::Detector(detector) => self.schedule.run(clock.now, detector, clock),
            Device::TrafficLight(light) => self.schedule.run(clock.now, light, clock),
        }
    }
}
