use crate::network::Network;
use crate::{LaneId, VehicleId};
use std::collections::HashMap;

/// Caches that are valid for a single step, cleared at the start of every step.
#[derive(Debug, Default)]
pub struct Scratch {
    x_adj: HashMap<(LaneId, LaneId), f64>,
    anticipated: HashMap<(VehicleId, LaneId), f64>,
}

impl Scratch {
    pub(crate) fn clear(&mut self) {
        self.x_adj.clear();
        self.anticipated.clear();
    }

    /// [`Network::x_adj`], memoised per lane pair.
    pub fn x_adj(&mut self, network: &Network, from: LaneId, to: LaneId) -> f64 {
        if from == to {
            return 0.0;
        }
        *self
            .x_adj
            .entry((from, to))
            .or_insert_with(|| network.x_adj(from, to))
    }

    /// The speed a vehicle anticipates on a lane, if already computed this step.
    pub fn anticipated_speed(&self, vehicle: VehicleId, lane: LaneId) -> Option<f64> {
        self.anticipated.get(&(vehicle, lane)).copied()
    }

    pub fn store_anticipated_speed(&mut self, vehicle: VehicleId, lane: LaneId, speed: f64) {
        self.anticipated.insert((vehicle, lane), speed);
    }
}
