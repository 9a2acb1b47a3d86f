use crate::controller::{Controller, StepClock};
use serde::{Deserialize, Serialize};

/// Counts the vehicles passing a point and their mean speed, per aggregation period.
#[derive(Clone, Debug, Default)]
pub struct Detector {
    count: u64,
    mean_speed: f64,
    samples: Vec<DetectorSample>,
}

/// The aggregate of one detector period.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorSample {
    /// End of the period, in s.
    pub time: f64,
    /// Vehicles seen during the period.
    pub count: u64,
    /// Arithmetic mean of their speeds at crossing, in m/s.
    pub mean_speed: Option<f64>,
}

impl Detector {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a vehicle crossing at the given speed.
    pub fn see(&mut self, speed: f64) {
        self.count += 1;
        self.mean_speed += (speed - self.mean_speed) / self.count as f64;
    }

    /// Vehicles seen in the current period so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The completed periods.
    pub fn samples(&self) -> &[DetectorSample] {
        &self.samples
    }

    /// The vehicles counted over all completed periods.
    pub fn total_count(&self) -> u64 {
        self.samples.iter().map(|s| s.count).sum()
    }
}

impl Controller<StepClock> for Detector {
    fn control(&mut self, clock: &mut StepClock) {
        self.samples.push(DetectorSample {
            time: clock.now,
            count: self.count,
            mean_speed: (self.count > 0).then_some(self.mean_speed),
        });
        self.count = 0;
        self.mean_speed = 0.0;
    }
}
