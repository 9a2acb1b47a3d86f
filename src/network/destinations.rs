//! Lane-change bookkeeping towards each destination.
//!
//! For every destination, a breadth-first pass starts at the lanes tagged with it
//! and walks upstream and sideways, recording on each lane the fewest lane changes
//! still needed and the position by which they must be done.

use super::map_between;
use crate::topology::Lateral;
use crate::{LaneId, LaneSet};
use smallvec::SmallVec;
use std::collections::{BTreeSet, VecDeque};

pub(super) fn initialise(lanes: &mut LaneSet) {
    let destinations = lanes
        .values()
        .filter_map(|l| l.destination())
        .collect::<BTreeSet<_>>();
    for dest in destinations {
        propagate(lanes, dest);
    }
}

fn propagate(lanes: &mut LaneSet, dest: u32) {
    let mut queue = VecDeque::new();
    for (id, lane) in lanes.iter_mut() {
        if lane.destination() == Some(dest) {
            let length = lane.length();
            lane.lane_changes.insert(dest, 0);
            lane.x_lane_changes.insert(dest, length);
            queue.push_back(id);
        }
    }

    while let Some(id) = queue.pop_front() {
        let lane = &lanes[id];
        let n = lane.lane_changes[&dest];
        let x = lane.x_lane_changes[&dest];

        let mut updates = SmallVec::<[(LaneId, u32, f64); 3]>::new();
        for dir in [Lateral::Left, Lateral::Right] {
            let Some(adj) = lane.lateral(dir) else { continue };
            // Traffic on the neighbour must be allowed to move across into this lane,
            // and can only do so while the two lanes run side by side
            if lanes[adj].can_change(dir.flip()) {
                let x = map_between(lanes, id, adj, x.min(lane.length()));
                updates.push((adj, n + 1, x));
            }
        }
        if let Some(up) = lane.up {
            updates.push((up, n, x + lanes[up].length()));
        }

        for (target, n, x) in updates {
            let target_lane = &mut lanes[target];
            let better = target_lane
                .lane_changes
                .get(&dest)
                .map_or(true, |old| n < *old);
            if better {
                target_lane.lane_changes.insert(dest, n);
                target_lane.x_lane_changes.insert(dest, x);
                queue.push_back(target);
            }
        }
    }
}
