use crate::controller::{Controller, StepClock};
use serde::{Deserialize, Serialize};

/// A fixed-time traffic signal cycling green, amber, red.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    /// The current state.
    state: LightState,
    /// The time since the current state was entered, in s.
    since: f64,
    /// Duration of each state, in s.
    green: f64,
    amber: f64,
    red: f64,
}

/// The state of a traffic light.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum LightState {
    Red,
    Amber,
    Green,
}

impl TrafficLight {
    /// Creates a signal that turns green `offset` seconds before the start of the simulation.
    pub fn fixed_time(green: f64, amber: f64, red: f64, offset: f64) -> Self {
        let mut light = Self {
            state: LightState::Green,
            since: 0.0,
            green: green.max(0.0),
            amber: amber.max(0.0),
            red: red.max(0.0),
        };
        let cycle = light.green + light.amber + light.red;
        if cycle > 0.0 {
            light.advance(offset.rem_euclid(cycle));
        }
        light
    }

    /// A signal that stays red.
    pub fn always_red() -> Self {
        Self::fixed_time(0.0, 0.0, f64::INFINITY, 0.0)
    }

    /// The current state.
    pub fn state(&self) -> LightState {
        self.state
    }

    fn duration(&self, state: LightState) -> f64 {
        match state {
            LightState::Green => self.green,
            LightState::Amber => self.amber,
            LightState::Red => self.red,
        }
    }

    /// Advances the light timing by `dt` seconds.
    fn advance(&mut self, dt: f64) {
        use LightState::*;
        self.since += dt;
        // Bounded so that zero-length states cannot spin forever
        for _ in 0..3 {
            let duration = self.duration(self.state);
            if self.since < duration {
                break;
            }
            self.since -= duration;
            self.state = match self.state {
                Green => Amber,
                Amber => Red,
                Red => Green,
            };
        }
    }
}

impl Controller<StepClock> for TrafficLight {
    fn control(&mut self, clock: &mut StepClock) {
        self.advance(clock.dt);
    }
}
