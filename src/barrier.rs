//! The per-step synchronisation point between the simulation and the drivers.

use crate::config::{BarrierFallback, SimConfig};
use crate::VehicleId;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// How long the barrier waits, and what happens to drivers that miss the deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BarrierPolicy {
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub fallback: BarrierFallback,
}

impl BarrierPolicy {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            timeout: config.barrier_timeout(),
            fallback: config.barrier_fallback,
        }
    }

    /// The deadline for a wait starting at `now`.
    pub fn deadline(&self, now: Instant) -> Option<Instant> {
        self.timeout.map(|timeout| now + timeout)
    }
}

/// Counts the drivers that have decided in the current step.
///
/// The barrier is released once every vehicle active at the start of the step has
/// reported. Reporting twice in a step counts once.
#[derive(Clone, Debug, Default)]
pub struct DecisionBarrier {
    step: u64,
    required: usize,
    reported: HashSet<VehicleId>,
    policy: BarrierPolicy,
}

impl DecisionBarrier {
    pub fn new(policy: BarrierPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> &BarrierPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: BarrierPolicy) {
        self.policy = policy;
    }

    /// Starts a new step that needs `required` decisions.
    pub fn reset(&mut self, step: u64, required: usize) {
        self.step = step;
        self.required = required;
        self.reported.clear();
    }

    /// The step the barrier is counting for.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Records a decision. Returns `false` if this driver already reported this step.
    pub fn report(&mut self, vehicle: VehicleId) -> bool {
        self.reported.insert(vehicle)
    }

    /// The number of distinct decisions recorded this step.
    pub fn count(&self) -> usize {
        self.reported.len()
    }

    /// The number of decisions still missing.
    pub fn remaining(&self) -> usize {
        self.required.saturating_sub(self.reported.len())
    }

    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Waits for the pending drivers in turn, all against one deadline measured from `now`.
    ///
    /// `wait` blocks until the driver's decision arrives or the deadline passes,
    /// returning whether it arrived. Drivers whose decision did not arrive are returned
    /// in order; they have not been reported.
    pub fn wait_for<F>(&mut self, pending: &[VehicleId], now: Instant, mut wait: F) -> Vec<VehicleId>
    where
        F: FnMut(VehicleId, Option<Instant>) -> bool,
    {
        let deadline = self.policy.deadline(now);
        let mut missed = vec![];
        for &vehicle in pending {
            if wait(vehicle, deadline) {
                self.report(vehicle);
            } else {
                missed.push(vehicle);
            }
        }
        missed
    }
}
