//! Simulation settings.

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What an externally controlled vehicle does when its agent misses the decision deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierFallback {
    /// Decelerate at the vehicle's maximum deceleration.
    #[default]
    FullStop,
    /// Re-apply the most recently received action.
    HoldLast,
}

/// The settings of a simulation run.
///
/// Every field has a default, so a JSON document only needs to name
/// the settings it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// The fixed time step in s.
    pub step_size: f64,
    /// The simulated time after which [`Simulation::run`](crate::Simulation::run) stops, in s.
    pub duration: f64,
    /// Seed of the simulation's random number generator.
    pub seed: u64,
    /// Aggregation period of detectors added without an explicit period, in s.
    pub detector_period: f64,
    /// Whether crashed vehicles are removed and reported at the end of each step.
    pub check_collisions: bool,
    /// Whether the first collision aborts the run with an error.
    pub stop_on_collision: bool,
    /// Whether a state sample of every vehicle is collected each step.
    pub record_trajectories: bool,
    /// How long the decision barrier waits for external agents, in ms.
    /// `None` waits indefinitely.
    pub barrier_timeout_ms: Option<u64>,
    /// The decision applied to agents that miss the deadline.
    pub barrier_fallback: BarrierFallback,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step_size: 0.5,
            duration: 3600.0,
            seed: 0,
            detector_period: 60.0,
            check_collisions: true,
            stop_on_collision: false,
            record_trajectories: false,
            barrier_timeout_ms: Some(1000),
            barrier_fallback: BarrierFallback::FullStop,
        }
    }
}

impl SimConfig {
    /// Parses and validates settings from a JSON document.
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings describe a runnable simulation.
    pub fn validate(&self) -> SimResult<()> {
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err(SimError::Config(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if !(self.duration >= 0.0) {
            return Err(SimError::Config(format!(
                "duration must not be negative, got {}",
                self.duration
            )));
        }
        if !(self.detector_period >= 0.0) {
            return Err(SimError::Config(format!(
                "detector period must not be negative, got {}",
                self.detector_period
            )));
        }
        Ok(())
    }

    /// The decision barrier timeout, if there is one.
    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    /// The number of steps needed to cover [`duration`](Self::duration).
    pub fn num_steps(&self) -> u64 {
        (self.duration / self.step_size - 1e-9).ceil().max(0.0) as u64
    }
}
