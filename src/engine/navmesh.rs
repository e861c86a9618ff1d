// Navigation mesh construction. The pipeline mirrors what the server does at
// level start: dilate every barrier by the ship radius, union the buffers,
// triangulate the remaining free space, aggregate triangles into convex
// polygons on a u16 grid, wire shared-edge adjacency plus one-way teleporter
// links, then prune zones unreachable from any spawn or teleporter exit.

use thiserror::Error;
use tracing::{info, warn};

use super::config::*;
use super::geom::{
    offset_polygon, triangulate_with_holes, union_polygons, Point, Rect, UnionRing,
};
use super::level::LevelSpec;
use super::polymesh::{aggregate_triangles_into_convex_polys, PolyMesh, MESH_NULL_IDX};
use super::zone::{NeighboringZone, Zone, ZoneStore};

#[derive(Debug, Error)]
pub enum NavmeshError {
    #[error("level bounds exceed the 16-bit coordinate range")]
    BoundsOverflow,
    #[error("triangulation produced no triangles")]
    EmptyNavmesh,
    #[error("navmesh too complex: {0}")]
    NavmeshTooComplex(String),
}

/// Zone generator selection from the host configuration. Even-numbered modes
/// prune unreachable zones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorMode {
    Disabled,
    RectSplit,
    RectSplitPruned,
    Triangles,
    TrianglesPruned,
    Aggregated,
    AggregatedPruned,
}

impl GeneratorMode {
    pub fn from_u8(v: u8) -> GeneratorMode {
        match v {
            0 => GeneratorMode::Disabled,
            1 => GeneratorMode::RectSplit,
            2 => GeneratorMode::RectSplitPruned,
            3 => GeneratorMode::Triangles,
            4 => GeneratorMode::TrianglesPruned,
            5 => GeneratorMode::Aggregated,
            _ => GeneratorMode::AggregatedPruned,
        }
    }

    pub fn prunes(self) -> bool {
        matches!(
            self,
            GeneratorMode::RectSplitPruned
                | GeneratorMode::TrianglesPruned
                | GeneratorMode::AggregatedPruned
        )
    }

    pub fn aggregates(self) -> bool {
        matches!(self, GeneratorMode::Aggregated | GeneratorMode::AggregatedPruned)
    }
}

/// Build the zone store for a level. Runs once at level start, before any
/// bot exists; the result is immutable afterwards.
pub fn build_zones(level: &LevelSpec, mode: GeneratorMode) -> Result<ZoneStore, NavmeshError> {
    let wb = level.world_bounds;
    if mode == GeneratorMode::Disabled {
        return Ok(ZoneStore::empty(wb));
    }
    if wb.min.x < -NAV_COORD_FIX
        || wb.min.y < -NAV_COORD_FIX
        || wb.max.x > NAV_COORD_FIX
        || wb.max.y > NAV_COORD_FIX
    {
        return Err(NavmeshError::BoundsOverflow);
    }
    if matches!(mode, GeneratorMode::RectSplit | GeneratorMode::RectSplitPruned) {
        warn!("rectangle-split zone generator is not available; using triangles");
    }

    // Pad the world so border zones have room, clamping back into the
    // quantizable range.
    let mut bounds = wb.expand(NAV_WORLD_PAD);
    bounds.min.x = bounds.min.x.max(-NAV_COORD_FIX);
    bounds.min.y = bounds.min.y.max(-NAV_COORD_FIX);
    bounds.max.x = bounds.max.x.min(NAV_COORD_FIX);
    bounds.max.y = bounds.max.y.min(NAV_COORD_FIX);

    // Dilate each barrier by the ship radius and union the buffers.
    let buffers: Vec<Vec<Point>> = level
        .barriers
        .iter()
        .map(|b| offset_polygon(&b.points, SHIP_RADIUS))
        .collect();
    let rings = union_polygons(&buffers);

    let (points, tris) = triangulate_free_space(bounds, &rings)?;
    if tris.is_empty() {
        return Err(NavmeshError::EmptyNavmesh);
    }

    // Shift into unsigned range and aggregate. nvp 3 keeps raw triangles.
    let shifted: Vec<Point> = points
        .iter()
        .map(|p| Point::new(p.x + NAV_COORD_FIX, p.y + NAV_COORD_FIX))
        .collect();
    let nvp = if mode.aggregates() { NAV_NVP } else { 3 };
    let mesh = aggregate_triangles_into_convex_polys(&shifted, &tris, nvp)
        .map_err(NavmeshError::NavmeshTooComplex)?;

    // Materialize zones from the mesh polygons.
    let mut zones: Vec<Zone> = Vec::new();
    let mut poly_to_zone: Vec<u16> = vec![u16::MAX; mesh.npolys()];
    for i in 0..mesh.npolys() {
        let nv = mesh.poly_vert_count(i);
        if nv < 3 {
            continue;
        }
        let bounds_pts: Vec<Point> = mesh.poly(i)[..nv]
            .iter()
            .map(|&v| {
                let q = mesh.verts[v as usize];
                Point::new(q[0] as f32 - NAV_COORD_FIX, q[1] as f32 - NAV_COORD_FIX)
            })
            .collect();
        poly_to_zone[i] = zones.len() as u16;
        zones.push(Zone::new(zones.len() as u16, bounds_pts));
    }
    if zones.len() > MAX_ZONES {
        return Err(NavmeshError::NavmeshTooComplex(format!(
            "{} zones exceed the {MAX_ZONES} cap",
            zones.len()
        )));
    }

    build_zone_connections(&mesh, &poly_to_zone, &mut zones);

    let mut store = ZoneStore::from_zones(zones, bounds);
    add_teleporter_edges(&mut store, level);

    if mode.prunes() {
        store = prune_unreachable(store, level);
    }
    info!(zones = store.len(), "navmesh built");
    Ok(store)
}

/// Turn the union rings into triangulation regions. Filled rings are holes;
/// rings bounding enclosed free pockets become island regions of their own,
/// carrying the filled rings that sit inside them.
fn triangulate_free_space(
    bounds: Rect,
    rings: &[UnionRing],
) -> Result<(Vec<Point>, Vec<[usize; 3]>), NavmeshError> {
    struct Region {
        outer: Vec<Point>,
        holes: Vec<Vec<Point>>,
    }

    let mut regions = vec![Region {
        outer: bounds.corners().to_vec(),
        holes: Vec::new(),
    }];
    for ring in rings.iter().filter(|r| !r.filled) {
        regions.push(Region {
            outer: ring.points.clone(),
            holes: Vec::new(),
        });
    }

    for ring in rings.iter().filter(|r| r.filled) {
        let clipped = confine_hole(&ring.points, bounds);
        if clipped.len() < 3 {
            continue;
        }
        // A wall ring inside a free pocket is that island's hole; everything
        // else belongs to the main region.
        let probe = clipped[0];
        let owner = regions[1..]
            .iter()
            .position(|r| super::geom::polygon_contains(&r.outer, probe))
            .map(|i| i + 1)
            .unwrap_or(0);
        regions[owner].holes.push(clipped);
    }

    let mut all_points: Vec<Point> = Vec::new();
    let mut all_tris: Vec<[usize; 3]> = Vec::new();
    for (i, region) in regions.iter().enumerate() {
        match triangulate_with_holes(&region.outer, &region.holes) {
            Ok((pts, tris)) => {
                let base = all_points.len();
                all_points.extend(pts);
                all_tris.extend(tris.iter().map(|t| [t[0] + base, t[1] + base, t[2] + base]));
            }
            Err(e) if i == 0 => {
                warn!("free-space triangulation failed: {e}");
                return Err(NavmeshError::EmptyNavmesh);
            }
            Err(e) => warn!("skipping untriangulable pocket: {e}"),
        }
    }
    Ok((all_points, all_tris))
}

/// Keep a hole ring strictly inside the outer bounds; walls poking past the
/// world edge are clipped slightly inside it.
fn confine_hole(ring: &[Point], bounds: Rect) -> Vec<Point> {
    let extent = Rect::bounding(ring);
    if bounds.contains(extent.min) && bounds.contains(extent.max) {
        return ring.to_vec();
    }
    clip_ring_to_rect(ring, bounds.expand(-0.5))
}

/// Sutherland-Hodgman clip of a ring against an axis-aligned rect.
fn clip_ring_to_rect(ring: &[Point], rect: Rect) -> Vec<Point> {
    let mut pts = ring.to_vec();
    for side in 0..4 {
        let inside = |p: Point| -> bool {
            match side {
                0 => p.x >= rect.min.x,
                1 => p.x <= rect.max.x,
                2 => p.y >= rect.min.y,
                _ => p.y <= rect.max.y,
            }
        };
        let cross_at = |a: Point, b: Point| -> Point {
            match side {
                0 | 1 => {
                    let x = if side == 0 { rect.min.x } else { rect.max.x };
                    let t = (x - a.x) / (b.x - a.x);
                    Point::new(x, a.y + t * (b.y - a.y))
                }
                _ => {
                    let y = if side == 2 { rect.min.y } else { rect.max.y };
                    let t = (y - a.y) / (b.y - a.y);
                    Point::new(a.x + t * (b.x - a.x), y)
                }
            }
        };
        let input = std::mem::take(&mut pts);
        if input.is_empty() {
            break;
        }
        let n = input.len();
        for i in 0..n {
            let cur = input[i];
            let prev = input[(i + n - 1) % n];
            match (inside(prev), inside(cur)) {
                (true, true) => pts.push(cur),
                (true, false) => pts.push(cross_at(prev, cur)),
                (false, true) => {
                    pts.push(cross_at(prev, cur));
                    pts.push(cur);
                }
                (false, false) => {}
            }
        }
    }
    pts
}

#[derive(Clone, Copy)]
struct MeshEdge {
    vert: [u16; 2],
    poly: [u16; 2],
}

/// Wire reciprocal neighbor records from the mesh adjacency, using the
/// edge-matching scheme recast borrows from Eric Lengyel: edges are keyed by
/// their lower vertex on the first pass and matched on the second.
fn build_zone_connections(mesh: &PolyMesh, poly_to_zone: &[u16], zones: &mut [Zone]) {
    if zones.is_empty() {
        return;
    }
    let nverts = mesh.verts.len();
    let mut first_edge: Vec<u16> = vec![MESH_NULL_IDX; nverts];
    let mut next_edge: Vec<u16> = Vec::new();
    let mut edges: Vec<MeshEdge> = Vec::new();

    // First pass: edges whose start vertex is the smaller index.
    for i in 0..mesh.npolys() {
        let t = mesh.poly(i);
        if t[0] == MESH_NULL_IDX {
            continue;
        }
        for j in 0..mesh.nvp {
            let v0 = t[j];
            if v0 == MESH_NULL_IDX {
                break;
            }
            let v1 = if j + 1 >= mesh.nvp || t[j + 1] == MESH_NULL_IDX {
                t[0]
            } else {
                t[j + 1]
            };
            if v0 < v1 {
                let e = edges.len() as u16;
                edges.push(MeshEdge {
                    vert: [v0, v1],
                    // Matching left and right marks the edge as unpaired.
                    poly: [i as u16, i as u16],
                });
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = e;
            }
        }
    }

    // Second pass: match the reversed edges.
    for i in 0..mesh.npolys() {
        let t = mesh.poly(i);
        if t[0] == MESH_NULL_IDX {
            continue;
        }
        for j in 0..mesh.nvp {
            let v0 = t[j];
            if v0 == MESH_NULL_IDX {
                break;
            }
            let v1 = if j + 1 >= mesh.nvp || t[j + 1] == MESH_NULL_IDX {
                t[0]
            } else {
                t[j + 1]
            };
            if v0 > v1 {
                let mut e = first_edge[v1 as usize];
                while e != MESH_NULL_IDX {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u16;
                        break;
                    }
                    e = next_edge[e as usize];
                }
            }
        }
    }

    let centroids: Vec<Point> = zones.iter().map(|z| z.centroid).collect();
    for e in &edges {
        if e.poly[0] == e.poly[1] {
            continue;
        }
        let za = poly_to_zone[e.poly[0] as usize];
        let zb = poly_to_zone[e.poly[1] as usize];
        if za == u16::MAX || zb == u16::MAX {
            continue;
        }
        let va = mesh.verts[e.vert[0] as usize];
        let vb = mesh.verts[e.vert[1] as usize];
        let border_start = Point::new(va[0] as f32 - NAV_COORD_FIX, va[1] as f32 - NAV_COORD_FIX);
        let border_end = Point::new(vb[0] as f32 - NAV_COORD_FIX, vb[1] as f32 - NAV_COORD_FIX);
        let border_center = Point::new(
            (border_start.x + border_end.x) * 0.5,
            (border_start.y + border_end.y) * 0.5,
        );
        zones[za as usize].neighbors.push(NeighboringZone {
            zone_id: zb,
            border_start,
            border_end,
            border_center,
            dist_to: centroids[za as usize].distance_to(border_center),
            center: centroids[zb as usize],
        });
        zones[zb as usize].neighbors.push(NeighboringZone {
            zone_id: za,
            border_start,
            border_end,
            border_center,
            dist_to: centroids[zb as usize].distance_to(border_center),
            center: centroids[za as usize],
        });
    }
}

/// One-way zero-cost edges for each teleporter entry -> destination pair
/// whose zones differ.
fn add_teleporter_edges(store: &mut ZoneStore, level: &LevelSpec) {
    let mut pending: Vec<(u16, NeighboringZone)> = Vec::new();
    for tp in &level.teleporters {
        let Some(origin) = store.find_zone_containing(tp.entry) else {
            continue;
        };
        for &dest in &tp.destinations {
            let Some(target) = store.find_zone_containing(dest) else {
                continue;
            };
            if target == origin {
                continue;
            }
            pending.push((
                origin,
                NeighboringZone {
                    zone_id: target,
                    border_start: tp.entry,
                    border_end: dest,
                    border_center: tp.entry,
                    // Free travel; with many destinations this undercharges,
                    // which the pathfinder tolerates.
                    dist_to: 0.0,
                    center: store.get(target).unwrap().centroid,
                },
            ));
        }
    }
    for (origin, edge) in pending {
        store.zones_mut()[origin as usize].neighbors.push(edge);
    }
}

/// Remove zones no bot could ever occupy: flood from every zone holding a
/// spawn point or teleporter destination, following edge direction, then
/// renumber the survivors so ids stay equal to indices.
fn prune_unreachable(store: ZoneStore, level: &LevelSpec) -> ZoneStore {
    let mut reachable = vec![false; store.len()];
    let mut stack: Vec<u16> = Vec::new();
    let mut seed = |p: Point, stack: &mut Vec<u16>, reachable: &mut Vec<bool>| {
        if let Some(z) = store.find_zone_containing(p) {
            if !reachable[z as usize] {
                reachable[z as usize] = true;
                stack.push(z);
            }
        }
    };
    for team in &level.teams {
        for &sp in &team.spawn_points {
            seed(sp, &mut stack, &mut reachable);
        }
    }
    for tp in &level.teleporters {
        for &d in &tp.destinations {
            seed(d, &mut stack, &mut reachable);
        }
    }

    while let Some(z) = stack.pop() {
        for nb in &store.get(z).unwrap().neighbors {
            let t = nb.zone_id as usize;
            if t < reachable.len() && !reachable[t] {
                reachable[t] = true;
                stack.push(nb.zone_id);
            }
        }
    }

    let kept = reachable.iter().filter(|&&r| r).count();
    if kept == 0 {
        warn!("no zone is reachable from any spawn; navmesh is empty");
        return ZoneStore::empty(store.world_bounds());
    }
    if kept < store.len() {
        info!(pruned = store.len() - kept, kept, "pruned unreachable zones");
    }

    let mut id_map = vec![u16::MAX; store.len()];
    let mut next = 0u16;
    for (i, &r) in reachable.iter().enumerate() {
        if r {
            id_map[i] = next;
            next += 1;
        }
    }

    let world = store.world_bounds();
    let mut new_zones = Vec::with_capacity(kept);
    for zone in store.zones() {
        if !reachable[zone.id as usize] {
            continue;
        }
        let mut z = zone.clone();
        z.neighbors.retain(|n| id_map[n.zone_id as usize] != u16::MAX);
        for n in &mut z.neighbors {
            n.zone_id = id_map[n.zone_id as usize];
        }
        new_zones.push(z);
    }
    ZoneStore::from_zones(new_zones, world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geom::{is_convex, polygon_contains};
    use crate::engine::level::{rect_barrier, TeleporterSpec};

    fn open_level(size: f32) -> LevelSpec {
        let mut level = LevelSpec::new(Rect::new(Point::new(0.0, 0.0), Point::new(size, size)));
        level.teams.push(crate::engine::level::TeamSpec {
            spawn_points: vec![Point::new(size / 2.0, size / 2.0)],
        });
        level
    }

    fn assert_mesh_invariants(store: &ZoneStore) {
        for zone in store.zones() {
            assert!(zone.bounds.len() >= 3);
            assert!(is_convex(&zone.bounds), "zone {} not convex", zone.id);
            assert!(
                polygon_contains(&zone.bounds, zone.centroid),
                "zone {} centroid outside bounds",
                zone.id
            );
            assert_eq!(store.find_zone_containing(zone.centroid), Some(zone.id));
            for nb in &zone.neighbors {
                assert!((nb.zone_id as usize) < store.len());
            }
        }
        // Reciprocal-edge property for non-teleporter edges.
        for zone in store.zones() {
            for nb in zone.neighbors.iter().filter(|n| n.dist_to > 0.0) {
                let back = store.get(nb.zone_id).unwrap();
                let twin = back
                    .neighbors
                    .iter()
                    .find(|m| m.zone_id == zone.id && m.border_center == nb.border_center);
                assert!(
                    twin.is_some(),
                    "edge {} -> {} has no reciprocal",
                    zone.id,
                    nb.zone_id
                );
            }
        }
    }

    #[test]
    fn test_disabled_mode_builds_nothing() {
        let store = build_zones(&open_level(500.0), GeneratorMode::Disabled).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_level_aggregated() {
        let store = build_zones(&open_level(500.0), GeneratorMode::AggregatedPruned).unwrap();
        assert!(!store.is_empty());
        assert_mesh_invariants(&store);
    }

    #[test]
    fn test_open_level_triangle_mode() {
        let store = build_zones(&open_level(500.0), GeneratorMode::Triangles).unwrap();
        assert!(!store.is_empty());
        for zone in store.zones() {
            assert_eq!(zone.bounds.len(), 3);
        }
        assert_mesh_invariants(&store);
    }

    #[test]
    fn test_single_wall_splits_space() {
        let mut level = open_level(1000.0);
        level.teams[0].spawn_points = vec![Point::new(100.0, 100.0)];
        level.barriers.push(rect_barrier(400.0, 0.0, 600.0, 500.0));
        let store = build_zones(&level, GeneratorMode::AggregatedPruned).unwrap();
        assert!(store.len() >= 2);
        assert_mesh_invariants(&store);
        // No zone centroid may sit inside the wall.
        let wall = &level.barriers[0].points;
        for zone in store.zones() {
            assert!(!polygon_contains(wall, zone.centroid));
        }
        // Both sides of the wall are walkable and reachable.
        assert!(store.find_zone_containing(Point::new(100.0, 100.0)).is_some());
        assert!(store.find_zone_containing(Point::new(900.0, 900.0)).is_some());
    }

    #[test]
    fn test_bounds_overflow_boundary() {
        let ok = LevelSpec::new(Rect::new(
            Point::new(-32767.0, -32767.0),
            Point::new(32767.0, 32767.0),
        ));
        assert!(build_zones(&ok, GeneratorMode::Aggregated).is_ok());

        let too_big = LevelSpec::new(Rect::new(
            Point::new(-32768.0, -32768.0),
            Point::new(32767.0, 32767.0),
        ));
        assert!(matches!(
            build_zones(&too_big, GeneratorMode::Aggregated),
            Err(NavmeshError::BoundsOverflow)
        ));
    }

    #[test]
    fn test_wall_past_world_edge_is_clipped() {
        let mut level = open_level(1000.0);
        level.teams[0].spawn_points = vec![Point::new(100.0, 500.0)];
        // Wall sticking far out of the world on both ends.
        level.barriers.push(rect_barrier(480.0, -400.0, 520.0, 1400.0));
        let store = build_zones(&level, GeneratorMode::Aggregated).unwrap();
        assert!(!store.is_empty());
        assert_mesh_invariants(&store);
    }

    #[test]
    fn test_prune_without_seeds_empties_mesh() {
        let mut level = open_level(500.0);
        level.teams.clear();
        let store = build_zones(&level, GeneratorMode::AggregatedPruned).unwrap();
        assert!(store.is_empty());
        // Without pruning the zones survive.
        let unpruned = build_zones(&level, GeneratorMode::Aggregated).unwrap();
        assert!(!unpruned.is_empty());
    }

    #[test]
    fn test_teleporter_edge_is_one_way_zero_cost() {
        let mut level = open_level(1000.0);
        level.teleporters.push(TeleporterSpec {
            entry: Point::new(100.0, 100.0),
            destinations: vec![Point::new(900.0, 900.0)],
            delay_ms: None,
            cooldown_ms: None,
            engineered: false,
        });
        let store = build_zones(&level, GeneratorMode::Aggregated).unwrap();
        let origin = store.find_zone_containing(Point::new(100.0, 100.0)).unwrap();
        let target = store.find_zone_containing(Point::new(900.0, 900.0)).unwrap();
        if origin == target {
            // Open map may aggregate both corners into one zone; nothing to
            // assert in that case.
            return;
        }
        let zone = store.get(origin).unwrap();
        let link = zone
            .neighbors
            .iter()
            .find(|n| n.zone_id == target && n.dist_to == 0.0)
            .expect("teleporter edge missing");
        assert_eq!(link.border_start, Point::new(100.0, 100.0));
        assert_eq!(link.border_end, Point::new(900.0, 900.0));
        assert_eq!(link.border_center, Point::new(100.0, 100.0));
    }
}
