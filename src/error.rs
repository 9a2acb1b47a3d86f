//! Error types.

use thiserror::Error;

/// Errors raised while building a network or setting up and running a simulation.
///
/// Runtime anomalies such as a vehicle that can no longer follow its route, or a
/// generator that cannot admit its next vehicle, are not errors. They are handled
/// by deleting or retrying, respectively.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("lane {0} is referenced but does not exist")]
    UnknownLane(String),

    #[error("lane number {0} is used by more than one lane")]
    DuplicateLane(u32),

    #[error("lane {lane} has {side} neighbour {other}, but the link is not mirrored")]
    AsymmetricLink {
        lane: u32,
        other: u32,
        side: &'static str,
    },

    #[error("lane {0} has a degenerate polyline")]
    DegenerateGeometry(u32),

    #[error("lane {0} has a non-positive speed limit")]
    InvalidSpeedLimit(u32),

    #[error("position {x} is outside lane {lane} of length {length}")]
    OutsideLane { lane: u32, x: f64, length: f64 },

    #[error("destination {destination} cannot be reached from lane {lane}")]
    UnreachableDestination { lane: u32, destination: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("vehicle {vehicle} collided with vehicle {other} on lane {lane} at t = {time} s")]
    Collision {
        time: f64,
        lane: u32,
        vehicle: u64,
        other: u64,
    },
}

/// Shorthand result type for the crate.
pub type SimResult<T> = Result<T, SimError>;
