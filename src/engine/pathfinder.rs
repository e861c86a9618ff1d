// Bounded A* over the zone graph. The search arrays are kept between
// invocations and validity is tracked with a generation counter, so nothing
// needs zeroing on the hot path; only the main thread runs queries.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::config::MAX_ZONES;
use super::geom::Point;
use super::zone::ZoneStore;

#[derive(Copy, Clone)]
struct OpenNode {
    f: f32,
    seq: u32,
    zone: u16,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.seq == other.seq
    }
}
impl Eq for OpenNode {}

impl Ord for OpenNode {
    // Min-heap on f; ties go to the most recently pushed node.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reusable A* state. One instance per server context.
pub struct Pathfinder {
    which_list: Vec<u16>,
    parent: Vec<u16>,
    g_cost: Vec<f32>,
    closed_gen: u16,
}

impl Default for Pathfinder {
    fn default() -> Self {
        Self::new()
    }
}

impl Pathfinder {
    pub fn new() -> Self {
        Pathfinder {
            which_list: vec![0; MAX_ZONES],
            parent: vec![0; MAX_ZONES],
            g_cost: vec![0.0; MAX_ZONES],
            closed_gen: 0,
        }
    }

    /// Shortest path from `start` to `goal`, emitted goal-first: the caller
    /// walks the plan from the back (the entry closest to the bot).
    ///
    /// Out-of-range ids, an oversized graph, or an unreachable goal all
    /// yield an empty list; no-path is not an error.
    pub fn find_path(
        &mut self,
        zones: &ZoneStore,
        start: u16,
        goal: u16,
        goal_point: Point,
    ) -> Vec<Point> {
        let n = zones.len();
        if n == 0 || n > MAX_ZONES {
            return Vec::new();
        }
        if start as usize >= n || goal as usize >= n {
            return Vec::new();
        }
        if start == goal {
            return vec![goal_point, zones.get(start).unwrap().centroid];
        }

        // Advance the generation markers instead of clearing the arrays.
        if self.closed_gen > u16::MAX - 3 {
            self.which_list.iter_mut().for_each(|w| *w = 0);
            self.closed_gen = 0;
        }
        self.closed_gen += 2;
        let on_closed = self.closed_gen;
        let on_open = on_closed - 1;

        let heuristic = |from: u16, to: u16| -> f32 {
            zones
                .get(from)
                .unwrap()
                .centroid
                .distance_to(zones.get(to).unwrap().centroid)
        };

        let mut heap = BinaryHeap::new();
        let mut seq = 0u32;
        self.g_cost[start as usize] = 0.0;
        self.which_list[start as usize] = on_open;
        heap.push(OpenNode {
            f: heuristic(start, goal),
            seq,
            zone: start,
        });

        let mut found = false;
        while let Some(node) = heap.pop() {
            let z = node.zone as usize;
            if self.which_list[z] == on_closed {
                continue; // stale heap entry
            }
            if node.zone == goal {
                found = true;
                break;
            }
            self.which_list[z] = on_closed;

            for nb in &zones.get(node.zone).unwrap().neighbors {
                let t = nb.zone_id as usize;
                if t >= n || self.which_list[t] == on_closed {
                    continue;
                }
                let tentative = self.g_cost[z] + nb.dist_to;
                if self.which_list[t] == on_open && tentative >= self.g_cost[t] {
                    continue;
                }
                self.g_cost[t] = tentative;
                self.parent[t] = node.zone;
                self.which_list[t] = on_open;
                seq += 1;
                heap.push(OpenNode {
                    f: tentative + heuristic(nb.zone_id, goal),
                    seq,
                    zone: nb.zone_id,
                });
            }
        }

        if !found {
            return Vec::new();
        }

        // Walk the parent chain from the goal. Both the gateway into each
        // zone and the zone center are stored so a bot hugging a wall stub
        // still has a reachable intermediate point.
        let mut path = vec![goal_point, zones.get(goal).unwrap().centroid];
        let mut z = goal;
        while z != start {
            let p = self.parent[z as usize];
            path.push(find_gateway(zones, p, z));
            z = p;
            path.push(zones.get(z).unwrap().centroid);
        }
        path.push(zones.get(start).unwrap().centroid);
        path
    }
}

/// The gateway point used when traveling from `from` into `to`. The argument
/// order matters: teleporter links exist only on the source zone.
pub fn find_gateway(zones: &ZoneStore, from: u16, to: u16) -> Point {
    let zone = zones.get(from).expect("gateway from unknown zone");
    match zone.neighbor_index(to) {
        Some(i) => zone.neighbors[i].border_center,
        // Parent chains only cross real edges; this is unreachable in a
        // well-formed mesh but a centroid keeps a bot moving if it happens.
        None => zones.get(to).map(|z| z.centroid).unwrap_or(zone.centroid),
    }
}
