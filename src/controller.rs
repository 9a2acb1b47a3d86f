//! Periodically run control logic shared by roadside units, generators and user controllers.

use crate::driver::Driver;
use crate::network::Network;
use crate::vehicle::Vehicle;
use crate::{RsuSet, VehicleSet};
use serde::{Deserialize, Serialize};

/// Something that acts on a context at scheduled times.
pub trait Controller<C: ?Sized> {
    /// Called when the schedule is due.
    fn control(&mut self, ctx: &mut C);

    /// Called on the steps in between.
    fn no_control(&mut self, _ctx: &mut C) {}
}

/// The simulated time at which a controller runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepClock {
    /// The simulated time in s.
    pub now: f64,
    /// The step size in s.
    pub dt: f64,
    /// The index of the step.
    pub step: u64,
}

/// Decides when a [`Controller`] is due.
///
/// A controller is due when at least `period` has passed since it last ran,
/// and the start time has been reached. A zero period means every step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    period: f64,
    start: f64,
    #[serde(skip)]
    last: Option<f64>,
}

impl PeriodicSchedule {
    pub fn new(period: f64, start: f64) -> Self {
        Self {
            period: period.max(0.0),
            start,
            last: None,
        }
    }

    /// A schedule that runs on every step.
    pub fn every_step() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Whether a controller on this schedule is due at `now`.
    pub fn is_due(&self, now: f64) -> bool {
        const EPS: f64 = 1e-9;
        let elapsed = self.last.map_or(true, |last| now + EPS >= last + self.period);
        elapsed && now + EPS >= self.start
    }

    /// Runs the controller's `control` if it is due, or its `no_control` otherwise.
    /// Returns whether `control` ran.
    pub fn run<C, T>(&mut self, now: f64, controller: &mut T, ctx: &mut C) -> bool
    where
        C: ?Sized,
        T: Controller<C> + ?Sized,
    {
        if self.is_due(now) {
            self.last = Some(now);
            controller.control(ctx);
            true
        } else {
            controller.no_control(ctx);
            false
        }
    }
}

/// What a controller registered with [`Simulation::add_controller`](crate::Simulation::add_controller) sees.
pub struct ControlContext<'a> {
    pub clock: StepClock,
    pub network: &'a Network,
    pub vehicles: &'a VehicleSet,
    /// Roadside units, which a controller may reconfigure.
    pub rsus: &'a mut RsuSet,
}

/// What a unit on board a vehicle sees.
pub struct OnBoardContext<'a> {
    pub clock: StepClock,
    /// The vehicle carrying the unit.
    pub vehicle: &'a Vehicle,
    pub network: &'a Network,
    pub vehicles: &'a VehicleSet,
    pub rsus: &'a RsuSet,
    /// The vehicle's driver, whose route the unit may change.
    pub driver: &'a mut dyn Driver,
}

/// A user controller, run after the on-board units.
pub type BoxedController = Box<dyn for<'a> Controller<ControlContext<'a>>>;

/// A unit carried by a vehicle, dropped together with it.
pub type BoxedOnBoardUnit = Box<dyn for<'a> Controller<OnBoardContext<'a>>>;
