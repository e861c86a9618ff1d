// Bucket-grid spatial index over game objects. Objects are stored with their
// AABB and an optional collision polygon; wall occlusion rays refine against
// the polygon. Queries over-approximate: callers filter with exact geometry.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use super::geom::{polygon_contains, segments_intersect, Point, Rect};

bitflags! {
    /// Compact object-kind filter used by spatial queries. Exact object data
    /// lives with the owner; the mask only narrows candidate sets.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeMask: u32 {
        const SHIP         = 1 << 0;
        const ROBOT        = 1 << 1;
        const BARRIER      = 1 << 2;
        const BULLET       = 1 << 3;
        const TELEPORTER   = 1 << 4;
        const NAV_ZONE     = 1 << 5;
        const LOADOUT_ZONE = 1 << 6;
        const FLAG         = 1 << 7;
        const TURRET       = 1 << 8;
    }
}

impl TypeMask {
    pub const ANY_SHIP: TypeMask = TypeMask::SHIP.union(TypeMask::ROBOT);
}

/// One indexed object.
#[derive(Clone, Debug)]
pub struct DbEntry {
    pub id: u32,
    pub mask: TypeMask,
    pub extent: Rect,
    /// Exact outline for wall-type objects; `None` for point-ish objects.
    pub poly: Option<Vec<Point>>,
}

/// Fixed-grid spatial hash. The bucket width is sized so the longer world
/// axis spans about `BUCKET_ROW_COUNT` buckets.
pub struct SpatialGrid {
    bucket_width: f32,
    buckets: HashMap<(i32, i32), Vec<u32>>,
    entries: HashMap<u32, DbEntry>,
}

pub const BUCKET_ROW_COUNT: f32 = 24.0;

impl SpatialGrid {
    pub fn new(world: Rect) -> Self {
        let span = world.width().max(world.height());
        SpatialGrid {
            bucket_width: (span / BUCKET_ROW_COUNT).max(1.0),
            buckets: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn bucket_range(&self, rect: Rect) -> (i32, i32, i32, i32) {
        (
            (rect.min.x / self.bucket_width).floor() as i32,
            (rect.min.y / self.bucket_width).floor() as i32,
            (rect.max.x / self.bucket_width).floor() as i32,
            (rect.max.y / self.bucket_width).floor() as i32,
        )
    }

    pub fn insert(&mut self, id: u32, mask: TypeMask, extent: Rect, poly: Option<Vec<Point>>) {
        self.remove(id);
        let (x0, y0, x1, y1) = self.bucket_range(extent);
        for bx in x0..=x1 {
            for by in y0..=y1 {
                self.buckets.entry((bx, by)).or_default().push(id);
            }
        }
        self.entries.insert(
            id,
            DbEntry {
                id,
                mask,
                extent,
                poly,
            },
        );
    }

    pub fn remove(&mut self, id: u32) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        let (x0, y0, x1, y1) = self.bucket_range(entry.extent);
        for bx in x0..=x1 {
            for by in y0..=y1 {
                if let Some(cell) = self.buckets.get_mut(&(bx, by)) {
                    cell.retain(|&e| e != id);
                }
            }
        }
    }

    pub fn update_extent(&mut self, id: u32, new_extent: Rect) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let old = self.bucket_range(entry.extent);
        let new = self.bucket_range(new_extent);
        if old == new {
            self.entries.get_mut(&id).unwrap().extent = new_extent;
            return;
        }
        let (mask, poly) = {
            let e = &self.entries[&id];
            (e.mask, e.poly.clone())
        };
        self.insert(id, mask, new_extent, poly);
    }

    pub fn entry(&self, id: u32) -> Option<&DbEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All objects whose extent intersects `rect` and whose mask matches.
    /// Results are sorted by id so iteration order is deterministic.
    pub fn find_in_rect(&self, mask: TypeMask, rect: Rect) -> Vec<u32> {
        let (x0, y0, x1, y1) = self.bucket_range(rect);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for bx in x0..=x1 {
            for by in y0..=y1 {
                let Some(cell) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for &id in cell {
                    if !seen.insert(id) {
                        continue;
                    }
                    let entry = &self.entries[&id];
                    if entry.mask.intersects(mask) && entry.extent.intersects_or_borders(&rect) {
                        out.push(id);
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Wall-occlusion ray: true iff the open segment `a -> b` crosses no
    /// barrier polygon interior. Grazing along an edge counts as visible.
    pub fn point_can_see_point(&self, a: Point, b: Point) -> bool {
        let rect = Rect::from_points(a, b);
        for id in self.find_in_rect(TypeMask::BARRIER, rect) {
            let entry = &self.entries[&id];
            let Some(poly) = &entry.poly else {
                continue;
            };
            if segment_crosses_polygon(poly, a, b) {
                return false;
            }
        }
        true
    }
}

/// Does the open segment enter the polygon interior?
fn segment_crosses_polygon(poly: &[Point], a: Point, b: Point) -> bool {
    const E: f64 = 1e-6;
    for i in 0..poly.len() {
        let p = poly[i];
        let q = poly[(i + 1) % poly.len()];
        if let Some((t, u)) = segments_intersect(a, b, p, q) {
            // A proper crossing strictly inside both segments.
            if t > E && t < 1.0 - E && u > E && u < 1.0 - E {
                return true;
            }
        }
    }
    // No proper crossing: the segment is either fully outside or fully
    // inside; test the midpoint.
    polygon_contains(poly, Point::new((a.x + b.x) * 0.5, (a.y + b.y) * 0.5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Rect {
        Rect::new(Point::new(0.0, 0.0), Point::new(1000.0, 1000.0))
    }

    fn wall(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<Point> {
        vec![
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ]
    }

    #[test]
    fn test_insert_and_query() {
        let mut grid = SpatialGrid::new(world());
        grid.insert(
            1,
            TypeMask::SHIP,
            Rect::around(Point::new(100.0, 100.0), 24.0),
            None,
        );
        grid.insert(
            2,
            TypeMask::BARRIER,
            Rect::new(Point::new(400.0, 0.0), Point::new(600.0, 500.0)),
            Some(wall(400.0, 0.0, 600.0, 500.0)),
        );

        let hits = grid.find_in_rect(
            TypeMask::SHIP,
            Rect::new(Point::new(0.0, 0.0), Point::new(200.0, 200.0)),
        );
        assert_eq!(hits, vec![1]);

        let all = grid.find_in_rect(
            TypeMask::SHIP | TypeMask::BARRIER,
            Rect::new(Point::new(0.0, 0.0), Point::new(1000.0, 1000.0)),
        );
        assert_eq!(all, vec![1, 2]);

        // Mask filters out non-matching kinds.
        let none = grid.find_in_rect(
            TypeMask::TELEPORTER,
            Rect::new(Point::new(0.0, 0.0), Point::new(1000.0, 1000.0)),
        );
        assert!(none.is_empty());
    }

    #[test]
    fn test_remove_and_update() {
        let mut grid = SpatialGrid::new(world());
        let extent = Rect::around(Point::new(100.0, 100.0), 24.0);
        grid.insert(7, TypeMask::ROBOT, extent, None);
        assert_eq!(grid.len(), 1);

        grid.update_extent(7, Rect::around(Point::new(900.0, 900.0), 24.0));
        let near_old = grid.find_in_rect(
            TypeMask::ROBOT,
            Rect::new(Point::new(0.0, 0.0), Point::new(200.0, 200.0)),
        );
        assert!(near_old.is_empty());
        let near_new = grid.find_in_rect(
            TypeMask::ROBOT,
            Rect::new(Point::new(800.0, 800.0), Point::new(1000.0, 1000.0)),
        );
        assert_eq!(near_new, vec![7]);

        grid.remove(7);
        assert!(grid.is_empty());
        grid.remove(7); // double-remove is a no-op
    }

    #[test]
    fn test_los_blocked_by_wall() {
        let mut grid = SpatialGrid::new(world());
        grid.insert(
            1,
            TypeMask::BARRIER,
            Rect::new(Point::new(400.0, 0.0), Point::new(600.0, 500.0)),
            Some(wall(400.0, 0.0, 600.0, 500.0)),
        );

        // Straight through the wall.
        assert!(!grid.point_can_see_point(Point::new(100.0, 100.0), Point::new(900.0, 100.0)));
        // Above the wall.
        assert!(grid.point_can_see_point(Point::new(100.0, 700.0), Point::new(900.0, 700.0)));
        // Unrelated corner of the map.
        assert!(grid.point_can_see_point(Point::new(10.0, 900.0), Point::new(300.0, 950.0)));
    }

    #[test]
    fn test_los_segment_inside_wall() {
        let mut grid = SpatialGrid::new(world());
        grid.insert(
            1,
            TypeMask::BARRIER,
            Rect::new(Point::new(400.0, 0.0), Point::new(600.0, 500.0)),
            Some(wall(400.0, 0.0, 600.0, 500.0)),
        );
        // Both endpoints inside the wall: no edge crossing, still blocked.
        assert!(!grid.point_can_see_point(Point::new(450.0, 100.0), Point::new(550.0, 100.0)));
    }

    #[test]
    fn test_empty_results_are_legal() {
        let grid = SpatialGrid::new(world());
        assert!(grid
            .find_in_rect(TypeMask::SHIP, Rect::around(Point::new(10.0, 10.0), 5.0))
            .is_empty());
        assert!(grid.point_can_see_point(Point::new(0.0, 0.0), Point::new(999.0, 999.0)));
    }
}
