pub use cgmath;
pub use config::{BarrierFallback, SimConfig};
pub use controller::{ControlContext, Controller, OnBoardContext, PeriodicSchedule, StepClock};
pub use driver::{
    Action, AgentHandle, Decision, DecisionContext, Driver, ExternalDriver, LaneChangeIntent,
    LmrsDriver, Param, ParamDistribution, ParameterTable, Parameters, Percept,
};
pub use error::{SimError, SimResult};
pub use generator::{Demand, DriverSpec, Generator, VehicleClass};
pub use lane::{Lane, LaneAttributes, LaneCurve, LaneSample};
pub use network::{Network, NetworkBuilder};
pub use route::Route;
pub use rsu::{Detector, DetectorSample, LightState, Rsu, TrafficLight};
pub use simulation::{
    Collision, NoopObserver, RemovalReason, Scratch, SimObserver, Simulation, SpawnedAgent,
    StepReport, VehicleSample,
};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use topology::{Enclosure, LaneType, Lateral, Longitudinal};
pub use util::Interval;
pub use vehicle::{LaneChange, Vehicle, VehicleAttributes, LANE_WIDTH};

pub mod barrier;
mod config;
pub mod controller;
pub mod driver;
mod error;
pub mod generator;
mod lane;
pub mod math;
pub mod network;
mod route;
pub mod rsu;
mod simulation;
pub mod topology;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Lane].
    pub struct LaneId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a roadside unit.
    pub struct RsuId;
    /// Unique ID of a [Generator].
    pub struct GeneratorId;
}

type LaneSet = SlotMap<LaneId, Lane>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
/// The roadside units of a simulation.
pub type RsuSet = SlotMap<RsuId, Rsu>;
