//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// An interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    /// Creates a new interval.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Gets the magnitude of the interval.
    pub fn length(&self) -> f64 {
        self.max - self.min
    }

    /// Returns true if this interval overlaps with the other.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.max > other.min && other.max > self.min
    }

    /// Returns true if the value lies in the half-open range `(min, max]`,
    /// i.e. a point moving from `min` to `max` has passed it.
    pub fn swept(&self, value: f64) -> bool {
        value > self.min && value <= self.max
    }
}

impl Debug for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}
