// Navigation mesh zones and their owning store. Zones form an arena: edges
// refer to other zones by index, and after the build completes the store is
// immutable for the lifetime of the level.

use serde::Serialize;

use super::geom::{find_centroid, polygon_contains, Point, Rect};
use super::spatial::{SpatialGrid, TypeMask};

/// A directed link to an adjacent zone. For teleporter links the border
/// collapses onto the entry point and the cost is zero.
#[derive(Clone, Debug)]
pub struct NeighboringZone {
    pub zone_id: u16,
    pub border_start: Point,
    pub border_end: Point,
    pub border_center: Point,
    /// Travel cost from the owning zone's centroid to the border center.
    pub dist_to: f32,
    /// Cached centroid of the target zone.
    pub center: Point,
}

/// One convex cell of the navigation mesh.
#[derive(Clone, Debug)]
pub struct Zone {
    pub id: u16,
    pub bounds: Vec<Point>,
    pub centroid: Point,
    pub extent: Rect,
    pub neighbors: Vec<NeighboringZone>,
}

impl Zone {
    pub fn new(id: u16, bounds: Vec<Point>) -> Self {
        let centroid = find_centroid(&bounds);
        let extent = Rect::bounding(&bounds);
        Zone {
            id,
            bounds,
            centroid,
            extent,
            neighbors: Vec::new(),
        }
    }

    /// Index into `neighbors` for the edge leading to `zone_id`.
    pub fn neighbor_index(&self, zone_id: u16) -> Option<usize> {
        self.neighbors.iter().position(|n| n.zone_id == zone_id)
    }
}

/// Wire/debug representation of a zone for spectator consumers.
#[derive(Clone, Debug, Serialize)]
pub struct ZoneSnapshot {
    pub id: u16,
    pub bounds: Vec<Point>,
    pub centroid: Point,
    pub neighbors: Vec<NeighborSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NeighborSnapshot {
    pub target_id: u16,
    pub border_start: Point,
    pub border_end: Point,
    pub border_center: Point,
    pub cost: f32,
    pub target_center: Point,
}

/// Owns all zones contiguously, with a private spatial index for point
/// lookups. Zone ids equal their index.
pub struct ZoneStore {
    zones: Vec<Zone>,
    grid: SpatialGrid,
    world_bounds: Rect,
}

impl ZoneStore {
    pub fn empty(world_bounds: Rect) -> Self {
        ZoneStore {
            zones: Vec::new(),
            grid: SpatialGrid::new(world_bounds),
            world_bounds,
        }
    }

    /// Build a store from finished zones. Ids are rewritten to match indices.
    pub fn from_zones(mut zones: Vec<Zone>, world_bounds: Rect) -> Self {
        let mut grid = SpatialGrid::new(world_bounds);
        for (i, zone) in zones.iter_mut().enumerate() {
            zone.id = i as u16;
            grid.insert(i as u32, TypeMask::NAV_ZONE, zone.extent, None);
        }
        ZoneStore {
            zones,
            grid,
            world_bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, id: u16) -> Option<&Zone> {
        self.zones.get(id as usize)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut [Zone] {
        &mut self.zones
    }

    pub fn world_bounds(&self) -> Rect {
        self.world_bounds
    }

    /// Zone containing the point. The query rect is slightly dilated because
    /// the point may sit exactly on a zone border; if no zone contains the
    /// point exactly, the lowest-id candidate whose extent was hit wins.
    pub fn find_zone_containing(&self, p: Point) -> Option<u16> {
        let candidates = self.grid.find_in_rect(TypeMask::NAV_ZONE, Rect::around(p, 0.1));
        for &id in &candidates {
            let zone = &self.zones[id as usize];
            if zone.extent.contains(p) && polygon_contains(&zone.bounds, p) {
                return Some(zone.id);
            }
        }
        // Boundary-tolerant fallback: candidates are sorted by id, so this is
        // the lowest-id zone near the point.
        candidates.first().map(|&id| id as u16)
    }

    pub fn snapshot(&self) -> Vec<ZoneSnapshot> {
        self.zones
            .iter()
            .map(|z| ZoneSnapshot {
                id: z.id,
                bounds: z.bounds.clone(),
                centroid: z.centroid,
                neighbors: z
                    .neighbors
                    .iter()
                    .map(|n| NeighborSnapshot {
                        target_id: n.zone_id,
                        border_start: n.border_start,
                        border_end: n.border_end,
                        border_center: n.border_center,
                        cost: n.dist_to,
                        target_center: n.center,
                    })
                    .collect(),
            })
            .collect()
    }
}
