use super::{destinations, Network};
use crate::error::{SimError, SimResult};
use crate::lane::{Lane, LaneAttributes, LaneCurve};
use crate::topology::{Lateral, Longitudinal};
use crate::{LaneId, LaneSet};
use log::debug;
use slotmap::SlotMap;
use std::collections::HashMap;

/// Assembles lanes and their links into a [`Network`].
///
/// Lanes are checked as they are added. Links are checked for symmetry when the
/// network is built, after which tapers and destination bookkeeping are derived.
pub struct NetworkBuilder {
    lanes: LaneSet,
    numbers: HashMap<u32, LaneId>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            lanes: SlotMap::with_key(),
            numbers: HashMap::new(),
        }
    }

    /// Adds a lane.
    pub fn add_lane(&mut self, attribs: LaneAttributes) -> SimResult<LaneId> {
        if self.numbers.contains_key(&attribs.number) {
            return Err(SimError::DuplicateLane(attribs.number));
        }
        if !(attribs.speed_limit > 0.0) || !attribs.speed_limit.is_finite() {
            return Err(SimError::InvalidSpeedLimit(attribs.number));
        }
        let curve =
            LaneCurve::new(&attribs.points).ok_or(SimError::DegenerateGeometry(attribs.number))?;
        let id = self
            .lanes
            .insert_with_key(|id| Lane::new(id, &attribs, curve));
        self.numbers.insert(attribs.number, id);
        Ok(id)
    }

    fn check(&self, id: LaneId) -> SimResult<()> {
        match self.lanes.contains_key(id) {
            true => Ok(()),
            false => Err(SimError::UnknownLane(format!("{:?}", id))),
        }
    }

    /// Sets the lane downstream of `lane`. The reverse link must be set as well.
    pub fn set_down(&mut self, lane: LaneId, down: LaneId) -> SimResult<()> {
        self.check(lane)?;
        self.check(down)?;
        self.lanes[lane].down = Some(down);
        Ok(())
    }

    /// Sets the lane upstream of `lane`. The reverse link must be set as well.
    pub fn set_up(&mut self, lane: LaneId, up: LaneId) -> SimResult<()> {
        self.check(lane)?;
        self.check(up)?;
        self.lanes[lane].up = Some(up);
        Ok(())
    }

    /// Sets the lane to one side of `lane`, and whether vehicles may change into it.
    pub fn set_lateral(
        &mut self,
        lane: LaneId,
        dir: Lateral,
        other: LaneId,
        allowed: bool,
    ) -> SimResult<()> {
        self.check(lane)?;
        self.check(other)?;
        let l = &mut self.lanes[lane];
        match dir {
            Lateral::Left => l.left = Some(other),
            Lateral::Right => l.right = Some(other),
        }
        l.set_permission(dir, allowed);
        Ok(())
    }

    /// Links two lanes end to start, in both directions.
    pub fn connect(&mut self, up: LaneId, down: LaneId) -> SimResult<()> {
        self.set_down(up, down)?;
        self.set_up(down, up)
    }

    /// Links two side-by-side lanes in both directions.
    ///
    /// `to_right` permits changes from `left` to `right`, `to_left` the reverse.
    pub fn connect_lateral(
        &mut self,
        left: LaneId,
        right: LaneId,
        to_right: bool,
        to_left: bool,
    ) -> SimResult<()> {
        self.set_lateral(left, Lateral::Right, right, to_right)?;
        self.set_lateral(right, Lateral::Left, left, to_left)
    }

    /// Validates the links and initialises the network.
    pub fn build(mut self) -> SimResult<Network> {
        self.check_symmetry()?;
        self.propagate_tapers();
        destinations::initialise(&mut self.lanes);

        let mut destinations = self
            .lanes
            .values()
            .filter_map(|l| l.destination())
            .collect::<Vec<_>>();
        destinations.sort_unstable();
        destinations.dedup();

        debug!(
            "built network with {} lanes and {} destinations",
            self.lanes.len(),
            destinations.len()
        );

        Ok(Network {
            lanes: self.lanes,
            numbers: self.numbers,
            destinations,
        })
    }

    fn check_symmetry(&self) -> SimResult<()> {
        for lane in self.lanes.values() {
            let links = [
                ("downstream", lane.down, Some(Longitudinal::Up), None),
                ("upstream", lane.up, Some(Longitudinal::Down), None),
                ("left", lane.left, None, Some(Lateral::Right)),
                ("right", lane.right, None, Some(Lateral::Left)),
            ];
            for (side, other, back_lon, back_lat) in links {
                let Some(other) = other else { continue };
                let other = &self.lanes[other];
                let back = match (back_lon, back_lat) {
                    (Some(dir), _) => other.longitudinal(dir),
                    (_, Some(dir)) => other.lateral(dir),
                    _ => None,
                };
                if back != Some(lane.id()) {
                    return Err(SimError::AsymmetricLink {
                        lane: lane.number(),
                        other: other.number(),
                        side,
                    });
                }
            }
        }
        Ok(())
    }

    /// Points each taper, and the lanes with a lateral neighbour leading up to it, at the taper.
    fn propagate_tapers(&mut self) {
        let tapers = self
            .lanes
            .values()
            .filter(|l| l.kind().is_taper())
            .map(|l| l.id())
            .collect::<Vec<_>>();

        for taper in tapers {
            self.lanes[taper].taper = Some(taper);
            let mut cur = self.lanes[taper].up;
            let mut steps = 0;
            while let Some(id) = cur {
                let lane = &mut self.lanes[id];
                if id == taper || steps > self.numbers.len() {
                    break;
                }
                if lane.left.is_none() && lane.right.is_none() {
                    break;
                }
                lane.taper = Some(taper);
                cur = lane.up;
                steps += 1;
            }
        }
    }
}
