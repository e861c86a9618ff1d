// 2D geometry kernel: points, rects, polygon predicates, boolean union,
// triangulation with holes. All predicates compute in f64 internally; with
// world coordinates up to +/-32767 an f32 cross product loses too many bits.

use std::collections::HashMap;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A 2D point / vector in world units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    /// A vector of the given length pointing at `angle` radians.
    pub fn polar(len: f32, angle: f32) -> Self {
        Point::new(len * angle.cos(), len * angle.sin())
    }

    pub fn len(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn len_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        (*self - other).len()
    }

    pub fn dist_squared(&self, other: Point) -> f32 {
        (*self - other).len_squared()
    }

    /// Angle of the ray from self to `other`, in radians.
    pub fn angle_to(&self, other: Point) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn dot(&self, other: Point) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Scale to the given length. A zero vector stays zero.
    pub fn normalize_to(&self, len: f32) -> Point {
        let l = self.len();
        if l <= f32::EPSILON {
            Point::default()
        } else {
            Point::new(self.x / l * len, self.y / l * len)
        }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned extent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(min: Point, max: Point) -> Self {
        Rect { min, max }
    }

    /// Rect spanning two arbitrary corner points.
    pub fn from_points(a: Point, b: Point) -> Self {
        Rect {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Square rect of half-width `radius` around a center point.
    pub fn around(center: Point, radius: f32) -> Self {
        Rect {
            min: center - Point::new(radius, radius),
            max: center + Point::new(radius, radius),
        }
    }

    /// AABB of a polygon. Empty input yields a degenerate rect at origin.
    pub fn bounding(points: &[Point]) -> Self {
        let mut r = match points.first() {
            Some(&p) => Rect::new(p, p),
            None => return Rect::default(),
        };
        for &p in &points[1..] {
            r.extend(p);
        }
        r
    }

    pub fn extend(&mut self, p: Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// True when the rects overlap or merely share an edge or corner.
    pub fn intersects_or_borders(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }

    pub fn expand(&self, amount: f32) -> Rect {
        Rect {
            min: self.min - Point::new(amount, amount),
            max: self.max + Point::new(amount, amount),
        }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn diagonal(&self) -> f32 {
        self.min.distance_to(self.max)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }
}

#[inline]
fn cross3(a: Point, b: Point, c: Point) -> f64 {
    let abx = b.x as f64 - a.x as f64;
    let aby = b.y as f64 - a.y as f64;
    let acx = c.x as f64 - a.x as f64;
    let acy = c.y as f64 - a.y as f64;
    abx * acy - aby * acx
}

/// Twice the signed area; positive for counter-clockwise winding.
pub fn signed_area2(poly: &[Point]) -> f64 {
    let mut sum = 0.0f64;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        sum += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    sum
}

pub fn polygon_area(poly: &[Point]) -> f64 {
    signed_area2(poly).abs() * 0.5
}

/// Reorder so the polygon winds counter-clockwise (positive signed area).
pub fn ensure_ccw(poly: &[Point]) -> Vec<Point> {
    if signed_area2(poly) < 0.0 {
        poly.iter().rev().copied().collect()
    } else {
        poly.to_vec()
    }
}

pub fn ensure_cw(poly: &[Point]) -> Vec<Point> {
    if signed_area2(poly) > 0.0 {
        poly.iter().rev().copied().collect()
    } else {
        poly.to_vec()
    }
}

/// True when every turn of the polygon has the same sign (collinear runs allowed).
pub fn is_convex(poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut pos = false;
    let mut neg = false;
    for i in 0..n {
        let c = cross3(poly[i], poly[(i + 1) % n], poly[(i + 2) % n]);
        if c > 1e-6 {
            pos = true;
        } else if c < -1e-6 {
            neg = true;
        }
        if pos && neg {
            return false;
        }
    }
    true
}

/// Area centroid of a simple polygon. Falls back to the vertex average for
/// degenerate (near zero area) input.
pub fn find_centroid(poly: &[Point]) -> Point {
    let a2 = signed_area2(poly);
    if a2.abs() < 1e-9 {
        let n = poly.len().max(1) as f64;
        let (sx, sy) = poly
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
        return Point::new((sx / n) as f32, (sy / n) as f32);
    }
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for i in 0..poly.len() {
        let p = poly[i];
        let q = poly[(i + 1) % poly.len()];
        let w = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        cx += (p.x as f64 + q.x as f64) * w;
        cy += (p.y as f64 + q.y as f64) * w;
    }
    Point::new((cx / (3.0 * a2)) as f32, (cy / (3.0 * a2)) as f32)
}

/// Even-odd ray-casting containment test. Points on the boundary may land on
/// either side; callers that care dilate their query instead.
pub fn polygon_contains(poly: &[Point], p: Point) -> bool {
    let (px, py) = (p.x as f64, p.y as f64);
    let mut inside = false;
    let n = poly.len();
    let mut j = n - 1;
    for i in 0..n {
        let (ix, iy) = (poly[i].x as f64, poly[i].y as f64);
        let (jx, jy) = (poly[j].x as f64, poly[j].y as f64);
        if (iy > py) != (jy > py) {
            let x_at = ix + (py - iy) * (jx - ix) / (jy - iy);
            if px < x_at {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Parametric segment intersection. Returns `(t, u)` with the hit at
/// `a1 + (a2-a1)*t == b1 + (b2-b1)*u`; `None` for parallel segments.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<(f64, f64)> {
    let d1x = a2.x as f64 - a1.x as f64;
    let d1y = a2.y as f64 - a1.y as f64;
    let d2x = b2.x as f64 - b1.x as f64;
    let d2y = b2.y as f64 - b1.y as f64;
    let denom = d1x * d2y - d1y * d2x;
    if denom.abs() < 1e-9 {
        return None;
    }
    let ex = b1.x as f64 - a1.x as f64;
    let ey = b1.y as f64 - a1.y as f64;
    let t = (ex * d2y - ey * d2x) / denom;
    let u = (ex * d1y - ey * d1x) / denom;
    const E: f64 = 1e-9;
    if (-E..=1.0 + E).contains(&t) && (-E..=1.0 + E).contains(&u) {
        Some((t.clamp(0.0, 1.0), u.clamp(0.0, 1.0)))
    } else {
        None
    }
}

/// True when the polygons overlap: any edge crossing, or one containing the other.
pub fn polygons_intersect(a: &[Point], b: &[Point]) -> bool {
    for i in 0..a.len() {
        let a1 = a[i];
        let a2 = a[(i + 1) % a.len()];
        for j in 0..b.len() {
            if segments_intersect(a1, a2, b[j], b[(j + 1) % b.len()]).is_some() {
                return true;
            }
        }
    }
    polygon_contains(a, b[0]) || polygon_contains(b, a[0])
}

/// First point of the polygon within `radius_sq` of `center`, if any.
pub fn polygon_circle_intersect(poly: &[Point], center: Point, radius_sq: f32) -> Option<Point> {
    if polygon_contains(poly, center) {
        return Some(center);
    }
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        let closest = closest_point_on_segment(a, b, center);
        if closest.dist_squared(center) <= radius_sq {
            return Some(closest);
        }
    }
    None
}

fn closest_point_on_segment(a: Point, b: Point, p: Point) -> Point {
    let d = b - a;
    let len_sq = d.len_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(d) / len_sq).clamp(0.0, 1.0);
    a + d * t
}

/// First intersection of the ray `start -> end` with the polygon boundary.
/// Returns the ray parameter in [0,1] and the unit edge normal facing the ray.
pub fn polygon_line_intersect(poly: &[Point], start: Point, end: Point) -> Option<(f32, Point)> {
    let mut best: Option<(f64, Point)> = None;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        if let Some((t, _)) = segments_intersect(start, end, a, b) {
            if best.map(|(bt, _)| t < bt).unwrap_or(true) {
                let edge = b - a;
                let mut normal = Point::new(edge.y, -edge.x).normalize_to(1.0);
                if normal.dot(end - start) > 0.0 {
                    normal = normal * -1.0;
                }
                best = Some((t, normal));
            }
        }
    }
    best.map(|(t, n)| (t as f32, n))
}

/// Shared-boundary test: true when the two polygons have collinear edge
/// sections overlapping for at least `epsilon` units. Writes the overlap
/// segment endpoints on success.
pub fn zones_touch(a: &[Point], b: &[Point], epsilon: f32) -> Option<(Point, Point)> {
    const COLLINEAR_DIST: f64 = 0.01;
    for i in 0..a.len() {
        let a1 = a[i];
        let a2 = a[(i + 1) % a.len()];
        let d = a2 - a1;
        let edge_len = d.len() as f64;
        if edge_len < 1e-9 {
            continue;
        }
        for j in 0..b.len() {
            let b1 = b[j];
            let b2 = b[(j + 1) % b.len()];
            // Perpendicular distance of both endpoints from the line through a1-a2.
            let dist1 = cross3(a1, a2, b1).abs() / edge_len;
            let dist2 = cross3(a1, a2, b2).abs() / edge_len;
            if dist1 > COLLINEAR_DIST || dist2 > COLLINEAR_DIST {
                continue;
            }
            let len_sq = d.len_squared();
            let t1 = ((b1 - a1).dot(d) / len_sq).clamp(0.0, 1.0);
            let t2 = ((b2 - a1).dot(d) / len_sq).clamp(0.0, 1.0);
            let lo = t1.min(t2);
            let hi = t1.max(t2);
            if (hi - lo) * d.len() >= epsilon {
                return Some((a1 + d * lo, a1 + d * hi));
            }
        }
    }
    None
}

/// Dilate a simple polygon outward by `amount` with mitered joins. Long
/// spikes at acute corners are clamped to three times the offset distance.
pub fn offset_polygon(poly: &[Point], amount: f32) -> Vec<Point> {
    let poly = ensure_ccw(poly);
    let n = poly.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = poly[(i + n - 1) % n];
        let cur = poly[i];
        let next = poly[(i + 1) % n];

        // Outward normals of the two adjacent edges (interior is to the left
        // of a CCW edge, so outward is the right-hand normal).
        let e1 = cur - prev;
        let e2 = next - cur;
        let n1 = Point::new(e1.y, -e1.x).normalize_to(amount);
        let n2 = Point::new(e2.y, -e2.x).normalize_to(amount);

        let p1 = prev + n1;
        let p2 = cur + n1;
        let p3 = cur + n2;
        let p4 = next + n2;

        let d1 = p2 - p1;
        let d2 = p4 - p3;
        let denom = d1.x as f64 * d2.y as f64 - d1.y as f64 * d2.x as f64;
        let miter = if denom.abs() < 1e-9 {
            p2
        } else {
            let ex = p3.x as f64 - p1.x as f64;
            let ey = p3.y as f64 - p1.y as f64;
            let t = (ex * d2.y as f64 - ey * d2.x as f64) / denom;
            p1 + d1 * t as f32
        };
        let spike = miter - cur;
        let max_len = amount.abs() * 3.0;
        if spike.len() > max_len {
            out.push(cur + spike.normalize_to(max_len));
        } else {
            out.push(miter);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Boolean union (non-zero fill)
// ---------------------------------------------------------------------------

/// A closed ring produced by `union_polygons`, classified by what its
/// interior contains.
#[derive(Clone, Debug)]
pub struct UnionRing {
    pub points: Vec<Point>,
    /// True when the ring bounds filled (solid) area; false when it bounds an
    /// enclosed free pocket inside the union.
    pub filled: bool,
}

fn point_key(p: Point) -> (u32, u32) {
    (p.x.to_bits(), p.y.to_bits())
}

/// Union of a set of simple polygons with non-zero fill. Edges are split at
/// all pairwise intersections; fragments covered by another polygon are
/// discarded and the survivors are stitched back into closed rings.
pub fn union_polygons(polys: &[Vec<Point>]) -> Vec<UnionRing> {
    let polys: Vec<Vec<Point>> = polys
        .iter()
        .filter(|p| p.len() >= 3)
        .map(|p| ensure_ccw(p))
        .collect();
    if polys.is_empty() {
        return Vec::new();
    }
    if polys.len() == 1 {
        return vec![UnionRing {
            points: polys[0].clone(),
            filled: true,
        }];
    }

    // (polygon index, edge start, edge end)
    struct EdgeRec {
        poly: usize,
        a: Point,
        b: Point,
        cuts: Vec<(f64, Point)>,
    }
    let mut edges: Vec<EdgeRec> = Vec::new();
    for (pi, poly) in polys.iter().enumerate() {
        for i in 0..poly.len() {
            edges.push(EdgeRec {
                poly: pi,
                a: poly[i],
                b: poly[(i + 1) % poly.len()],
                cuts: Vec::new(),
            });
        }
    }

    // Split every edge at its intersections with edges of other polygons.
    // Each intersection point is computed once and shared by both edges so
    // the stitch below can match endpoints bit-exactly.
    for i in 0..edges.len() {
        for j in (i + 1)..edges.len() {
            if edges[i].poly == edges[j].poly {
                continue;
            }
            if let Some((t, u)) = segments_intersect(edges[i].a, edges[i].b, edges[j].a, edges[j].b)
            {
                let d = edges[i].b - edges[i].a;
                let hit = edges[i].a + d * t as f32;
                edges[i].cuts.push((t, hit));
                edges[j].cuts.push((u, hit));
            }
        }
    }

    // Emit fragments whose midpoint is not covered by any other polygon.
    struct Frag {
        start: Point,
        end: Point,
    }
    let mut frags: Vec<Frag> = Vec::new();
    for edge in &mut edges {
        edge.cuts.sort_by(|x, y| x.0.total_cmp(&y.0));
        let mut pts = Vec::with_capacity(edge.cuts.len() + 2);
        pts.push(edge.a);
        for &(_, p) in &edge.cuts {
            pts.push(p);
        }
        pts.push(edge.b);
        for w in pts.windows(2) {
            let (s, e) = (w[0], w[1]);
            if s.dist_squared(e) < 1e-12 {
                continue;
            }
            let mid = Point::new((s.x + e.x) * 0.5, (s.y + e.y) * 0.5);
            let covered = polys
                .iter()
                .enumerate()
                .any(|(pi, poly)| pi != edge.poly && polygon_contains(poly, mid));
            if !covered {
                frags.push(Frag { start: s, end: e });
            }
        }
    }

    // Stitch fragments into rings by following endpoint matches. Fragments
    // keep the CCW direction of their source polygon, so the walk is directed.
    let mut by_start: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (i, f) in frags.iter().enumerate() {
        by_start.entry(point_key(f.start)).or_default().push(i);
    }
    let mut used = vec![false; frags.len()];
    let mut rings: Vec<Vec<Point>> = Vec::new();
    for i in 0..frags.len() {
        if used[i] {
            continue;
        }
        let mut ring = vec![frags[i].start];
        let first_key = point_key(frags[i].start);
        let mut cur = i;
        used[i] = true;
        loop {
            let end_key = point_key(frags[cur].end);
            if end_key == first_key {
                rings.push(ring);
                break;
            }
            ring.push(frags[cur].end);
            let next = by_start
                .get(&end_key)
                .and_then(|cands| cands.iter().find(|&&c| !used[c]).copied());
            match next {
                Some(n) => {
                    used[n] = true;
                    cur = n;
                }
                None => break, // open chain; drop it
            }
        }
    }

    rings
        .into_iter()
        .map(simplify_ring)
        .filter(|r| r.len() >= 3 && polygon_area(r) > 1e-6)
        .map(|r| {
            let filled = ring_interior_filled(&r, &polys);
            UnionRing { points: r, filled }
        })
        .collect()
}

/// Drop consecutive duplicates and collinear runs.
fn simplify_ring(ring: Vec<Point>) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(ring.len());
    for p in ring {
        if out.last().map(|&q| q.dist_squared(p) < 1e-12).unwrap_or(false) {
            continue;
        }
        out.push(p);
    }
    if out.len() >= 2 && out[0].dist_squared(out[out.len() - 1]) < 1e-12 {
        out.pop();
    }
    let mut i = 0;
    while out.len() >= 3 && i < out.len() {
        let n = out.len();
        let prev = out[(i + n - 1) % n];
        let next = out[(i + 1) % n];
        if cross3(prev, out[i], next).abs() < 1e-6 {
            out.remove(i);
        } else {
            i += 1;
        }
    }
    out
}

/// Sample a point just inside the ring and test whether an input polygon
/// covers it. That decides whether the ring bounds solid area or a pocket.
fn ring_interior_filled(ring: &[Point], polys: &[Vec<Point>]) -> bool {
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        let edge = b - a;
        if edge.len() < 1e-3 {
            continue;
        }
        let mid = Point::new((a.x + b.x) * 0.5, (a.y + b.y) * 0.5);
        let normal = Point::new(edge.y, -edge.x).normalize_to(0.01);
        for sample in [mid + normal, mid - normal] {
            if polygon_contains(ring, sample) {
                return polys.iter().any(|p| polygon_contains(p, sample));
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Triangulation with holes (ear clipping with hole bridging)
// ---------------------------------------------------------------------------

fn point_in_triangle(p: Point, a: Point, b: Point, c: Point) -> bool {
    const E: f64 = 1e-9;
    cross3(a, b, p) >= -E && cross3(b, c, p) >= -E && cross3(c, a, p) >= -E
}

/// Triangulate the region inside `outer` but outside every hole polygon.
/// Returns the vertex list and triangle index triples. Triangle winding is
/// counter-clockwise.
pub fn triangulate_with_holes(
    outer: &[Point],
    holes: &[Vec<Point>],
) -> Result<(Vec<Point>, Vec<[usize; 3]>), String> {
    if outer.len() < 3 {
        return Err("outer boundary needs at least 3 vertices".into());
    }
    let mut ring = ensure_ccw(outer);

    let mut holes: Vec<Vec<Point>> = holes
        .iter()
        .filter(|h| h.len() >= 3)
        .map(|h| ensure_cw(h))
        .collect();
    // Bridge right-most holes first so earlier bridges cannot block later rays.
    holes.sort_by(|a, b| {
        let ax = a.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        let bx = b.iter().map(|p| p.x).fold(f32::MIN, f32::max);
        bx.total_cmp(&ax)
    });
    for hole in &holes {
        ring = bridge_hole(ring, hole)?;
    }

    let tris = ear_clip(&ring);
    if tris.is_empty() {
        return Err("triangulation produced no triangles".into());
    }
    Ok((ring, tris))
}

/// Splice a hole into the outer ring via a bridge from the hole's maximum-x
/// vertex to a visible outer vertex.
fn bridge_hole(ring: Vec<Point>, hole: &[Point]) -> Result<Vec<Point>, String> {
    let m_idx = (0..hole.len())
        .max_by(|&i, &j| hole[i].x.total_cmp(&hole[j].x))
        .unwrap();
    let m = hole[m_idx];

    // Cast a ray in +x from M; find the closest crossing outer edge.
    let mut best: Option<(usize, f64)> = None; // (edge index, intersection x)
    let n = ring.len();
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let (ay, by) = (a.y as f64, b.y as f64);
        let my = m.y as f64;
        if (ay <= my && by > my) || (by <= my && ay > my) {
            let t = (my - ay) / (by - ay);
            let x = a.x as f64 + t * (b.x as f64 - a.x as f64);
            if x >= m.x as f64 - 1e-9 && best.map(|(_, bx)| x < bx).unwrap_or(true) {
                best = Some((i, x));
            }
        }
    }
    let (edge_idx, ix) = best.ok_or_else(|| "hole is not inside the outer boundary".to_string())?;
    let hit = Point::new(ix as f32, m.y);

    // Candidate bridge vertex: the endpoint of the crossed edge with larger x.
    let (a, b) = (ring[edge_idx], ring[(edge_idx + 1) % n]);
    let mut p_idx = if a.x > b.x { edge_idx } else { (edge_idx + 1) % n };

    // If a reflex outer vertex lies inside triangle (M, hit, candidate), the
    // bridge would cross the boundary; pick the reflex vertex closest in
    // angle to the +x axis instead.
    let p = ring[p_idx];
    let mut best_alt: Option<(usize, f64)> = None;
    for i in 0..n {
        if i == p_idx {
            continue;
        }
        let v = ring[i];
        let reflex = cross3(ring[(i + n - 1) % n], v, ring[(i + 1) % n]) < 0.0;
        if !reflex || !point_in_triangle(v, m, hit, p) && !point_in_triangle(v, m, p, hit) {
            continue;
        }
        let dx = (v.x - m.x) as f64;
        let dy = ((v.y - m.y) as f64).abs();
        if dx <= 0.0 {
            continue;
        }
        let tan = dy / dx;
        if best_alt.map(|(_, bt)| tan < bt).unwrap_or(true) {
            best_alt = Some((i, tan));
        }
    }
    if let Some((alt, _)) = best_alt {
        p_idx = alt;
    }

    // Splice: ...P, M, hole..., M, P, ...
    let mut out = Vec::with_capacity(ring.len() + hole.len() + 2);
    out.extend_from_slice(&ring[..=p_idx]);
    for k in 0..=hole.len() {
        out.push(hole[(m_idx + k) % hole.len()]);
    }
    out.push(ring[p_idx]);
    out.extend_from_slice(&ring[p_idx + 1..]);
    Ok(out)
}

/// Ear-clip a counter-clockwise ring (which may contain bridge duplicates).
fn ear_clip(ring: &[Point]) -> Vec<[usize; 3]> {
    let n = ring.len();
    let mut idx: Vec<usize> = (0..n).collect();
    let mut tris = Vec::new();

    while idx.len() > 3 {
        let m = idx.len();
        let mut clipped = false;
        for i in 0..m {
            let prev = ring[idx[(i + m - 1) % m]];
            let cur = ring[idx[i]];
            let next = ring[idx[(i + 1) % m]];
            let c = cross3(prev, cur, next);
            if c < -1e-9 {
                continue; // reflex
            }
            if c <= 1e-9 {
                // Degenerate ear (bridge spur); remove without emitting.
                idx.remove(i);
                clipped = true;
                break;
            }
            let mut blocked = false;
            for (k, &vi) in idx.iter().enumerate() {
                if k == (i + m - 1) % m || k == i || k == (i + 1) % m {
                    continue;
                }
                let v = ring[vi];
                if same_point(v, prev) || same_point(v, cur) || same_point(v, next) {
                    continue;
                }
                if point_in_triangle(v, prev, cur, next) {
                    blocked = true;
                    break;
                }
            }
            if blocked {
                continue;
            }
            tris.push([idx[(i + m - 1) % m], idx[i], idx[(i + 1) % m]]);
            idx.remove(i);
            clipped = true;
            break;
        }
        if !clipped {
            // Numerical stalemate: clip the most convex corner to guarantee
            // progress.
            let i = (0..m)
                .max_by(|&i, &j| {
                    let ci = cross3(ring[idx[(i + m - 1) % m]], ring[idx[i]], ring[idx[(i + 1) % m]]);
                    let cj = cross3(ring[idx[(j + m - 1) % m]], ring[idx[j]], ring[idx[(j + 1) % m]]);
                    ci.total_cmp(&cj)
                })
                .unwrap();
            tris.push([idx[(i + m - 1) % m], idx[i], idx[(i + 1) % m]]);
            idx.remove(i);
        }
    }
    if idx.len() == 3 {
        tris.push([idx[0], idx[1], idx[2]]);
    }
    tris.retain(|t| cross3(ring[t[0]], ring[t[1]], ring[t[2]]).abs() > 1e-9);
    tris
}

fn same_point(a: Point, b: Point) -> bool {
    a.x == b.x && a.y == b.y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_poly(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<Point> {
        vec![
            Point::new(x1, y1),
            Point::new(x2, y1),
            Point::new(x2, y2),
            Point::new(x1, y2),
        ]
    }

    fn tri_area_sum(verts: &[Point], tris: &[[usize; 3]]) -> f64 {
        tris.iter()
            .map(|t| {
                polygon_area(&[verts[t[0]], verts[t[1]], verts[t[2]]])
            })
            .sum()
    }

    #[test]
    fn test_point_basics() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance_to(b), 5.0);
        assert_eq!(a.dist_squared(b), 25.0);
        let p = Point::polar(2.0, std::f32::consts::FRAC_PI_2);
        assert!(p.x.abs() < 1e-6);
        assert!((p.y - 2.0).abs() < 1e-6);
        assert!((a.angle_to(Point::new(0.0, 1.0)) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_rect_ops() {
        let r = Rect::from_points(Point::new(10.0, 20.0), Point::new(0.0, 5.0));
        assert_eq!(r.min, Point::new(0.0, 5.0));
        assert_eq!(r.max, Point::new(10.0, 20.0));
        assert!(r.contains(Point::new(5.0, 10.0)));
        assert!(!r.contains(Point::new(-1.0, 10.0)));
        assert_eq!(r.center(), Point::new(5.0, 12.5));

        let other = Rect::new(Point::new(10.0, 5.0), Point::new(20.0, 20.0));
        assert!(r.intersects_or_borders(&other)); // shares the x == 10 edge
        let far = Rect::new(Point::new(11.0, 5.0), Point::new(20.0, 20.0));
        assert!(!r.intersects_or_borders(&far));

        let grown = r.expand(2.0);
        assert_eq!(grown.min, Point::new(-2.0, 3.0));
        assert_eq!(grown.max, Point::new(12.0, 22.0));
    }

    #[test]
    fn test_is_convex() {
        assert!(is_convex(&rect_poly(0.0, 0.0, 10.0, 10.0)));
        let concave = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(5.0, 2.0), // dent
            Point::new(0.0, 10.0),
        ];
        assert!(!is_convex(&concave));
        // Winding direction must not matter.
        let cw: Vec<Point> = rect_poly(0.0, 0.0, 10.0, 10.0).into_iter().rev().collect();
        assert!(is_convex(&cw));
    }

    #[test]
    fn test_polygon_contains() {
        let poly = rect_poly(0.0, 0.0, 10.0, 10.0);
        assert!(polygon_contains(&poly, Point::new(5.0, 5.0)));
        assert!(!polygon_contains(&poly, Point::new(15.0, 5.0)));
        assert!(!polygon_contains(&poly, Point::new(5.0, -0.1)));
    }

    #[test]
    fn test_centroid() {
        let poly = rect_poly(0.0, 0.0, 10.0, 20.0);
        let c = find_centroid(&poly);
        assert!((c.x - 5.0).abs() < 1e-4);
        assert!((c.y - 10.0).abs() < 1e-4);
        assert!(polygon_contains(&poly, c));
    }

    #[test]
    fn test_segments_intersect() {
        let hit = segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        );
        let (t, u) = hit.unwrap();
        assert!((t - 0.5).abs() < 1e-9);
        assert!((u - 0.5).abs() < 1e-9);

        assert!(segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
        )
        .is_none());
    }

    #[test]
    fn test_polygons_intersect() {
        let a = rect_poly(0.0, 0.0, 10.0, 10.0);
        let b = rect_poly(5.0, 5.0, 15.0, 15.0);
        let c = rect_poly(20.0, 20.0, 30.0, 30.0);
        let inner = rect_poly(2.0, 2.0, 3.0, 3.0);
        assert!(polygons_intersect(&a, &b));
        assert!(!polygons_intersect(&a, &c));
        assert!(polygons_intersect(&a, &inner)); // containment counts
    }

    #[test]
    fn test_polygon_circle_intersect() {
        let poly = rect_poly(0.0, 0.0, 10.0, 10.0);
        assert!(polygon_circle_intersect(&poly, Point::new(15.0, 5.0), 26.0).is_some());
        assert!(polygon_circle_intersect(&poly, Point::new(15.0, 5.0), 24.0).is_none());
        // Center inside the polygon always hits.
        assert!(polygon_circle_intersect(&poly, Point::new(5.0, 5.0), 1.0).is_some());
    }

    #[test]
    fn test_polygon_line_intersect() {
        let poly = rect_poly(10.0, 0.0, 20.0, 10.0);
        let (t, normal) =
            polygon_line_intersect(&poly, Point::new(0.0, 5.0), Point::new(30.0, 5.0)).unwrap();
        assert!((t - 1.0 / 3.0).abs() < 1e-5);
        assert!(normal.x < -0.99); // faces back toward the ray origin
        assert!(
            polygon_line_intersect(&poly, Point::new(0.0, 20.0), Point::new(30.0, 20.0)).is_none()
        );
    }

    #[test]
    fn test_zones_touch() {
        let a = rect_poly(0.0, 0.0, 10.0, 10.0);
        let b = rect_poly(10.0, 2.0, 20.0, 8.0);
        let (s, e) = zones_touch(&a, &b, 1.0).unwrap();
        let (lo, hi) = if s.y < e.y { (s, e) } else { (e, s) };
        assert!((lo.x - 10.0).abs() < 1e-4 && (hi.x - 10.0).abs() < 1e-4);
        assert!((lo.y - 2.0).abs() < 1e-4);
        assert!((hi.y - 8.0).abs() < 1e-4);

        // Touching at a single corner is not a shared border.
        let c = rect_poly(10.0, 10.0, 20.0, 20.0);
        assert!(zones_touch(&a, &c, 1.0).is_none());

        let far = rect_poly(30.0, 0.0, 40.0, 10.0);
        assert!(zones_touch(&a, &far, 1.0).is_none());
    }

    #[test]
    fn test_offset_polygon() {
        let poly = rect_poly(10.0, 10.0, 20.0, 20.0);
        let grown = offset_polygon(&poly, 5.0);
        assert_eq!(grown.len(), 4);
        let extent = Rect::bounding(&grown);
        assert!((extent.min.x - 5.0).abs() < 1e-3);
        assert!((extent.max.y - 25.0).abs() < 1e-3);
        assert!((polygon_area(&grown) - 400.0).abs() < 1e-2);
    }

    #[test]
    fn test_union_single_polygon() {
        let rings = union_polygons(&[rect_poly(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(rings.len(), 1);
        assert!(rings[0].filled);
        assert!((polygon_area(&rings[0].points) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_union_disjoint() {
        let rings = union_polygons(&[
            rect_poly(0.0, 0.0, 10.0, 10.0),
            rect_poly(20.0, 0.0, 30.0, 10.0),
        ]);
        assert_eq!(rings.len(), 2);
        assert!(rings.iter().all(|r| r.filled));
        let total: f64 = rings.iter().map(|r| polygon_area(&r.points)).sum();
        assert!((total - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_union_overlapping_rects() {
        let rings = union_polygons(&[
            rect_poly(0.0, 0.0, 10.0, 10.0),
            rect_poly(5.0, 5.0, 15.0, 15.0),
        ]);
        assert_eq!(rings.len(), 1);
        assert!(rings[0].filled);
        // 100 + 100 - 25 overlap
        assert!((polygon_area(&rings[0].points) - 175.0).abs() < 1e-2);
    }

    #[test]
    fn test_union_contained_polygon_is_absorbed() {
        let rings = union_polygons(&[
            rect_poly(0.0, 0.0, 20.0, 20.0),
            rect_poly(5.0, 5.0, 10.0, 10.0),
        ]);
        assert_eq!(rings.len(), 1);
        assert!((polygon_area(&rings[0].points) - 400.0).abs() < 1e-2);
    }

    #[test]
    fn test_union_frame_classifies_pocket() {
        // Four bars crossing like a # sign; the center square is an enclosed
        // free pocket. Every bar-bar contact is a proper crossing.
        let rings = union_polygons(&[
            rect_poly(0.0, 10.0, 60.0, 20.0),  // lower horizontal
            rect_poly(0.0, 40.0, 60.0, 50.0),  // upper horizontal
            rect_poly(10.0, 0.0, 20.0, 60.0),  // left vertical
            rect_poly(40.0, 0.0, 50.0, 60.0),  // right vertical
        ]);
        assert_eq!(rings.len(), 2);
        let filled: Vec<_> = rings.iter().filter(|r| r.filled).collect();
        let pockets: Vec<_> = rings.iter().filter(|r| !r.filled).collect();
        assert_eq!(filled.len(), 1);
        assert_eq!(pockets.len(), 1);
        // Outline encloses the bar material (2000) plus the pocket (400).
        assert!((polygon_area(&filled[0].points) - 2400.0).abs() < 1e-2);
        assert!((polygon_area(&pockets[0].points) - 400.0).abs() < 1e-2);
    }

    #[test]
    fn test_triangulate_no_holes() {
        let outer = rect_poly(0.0, 0.0, 100.0, 50.0);
        let (verts, tris) = triangulate_with_holes(&outer, &[]).unwrap();
        assert_eq!(verts.len(), 4);
        assert_eq!(tris.len(), 2);
        assert!((tri_area_sum(&verts, &tris) - 5000.0).abs() < 1e-3);
    }

    #[test]
    fn test_triangulate_with_one_hole() {
        let outer = rect_poly(0.0, 0.0, 100.0, 100.0);
        let hole = rect_poly(40.0, 40.0, 60.0, 60.0);
        let (verts, tris) = triangulate_with_holes(&outer, &[hole.clone()]).unwrap();
        let area = tri_area_sum(&verts, &tris);
        assert!((area - (10000.0 - 400.0)).abs() < 1e-2, "area was {area}");
        // No triangle centroid may land inside the hole.
        for t in &tris {
            let c = find_centroid(&[verts[t[0]], verts[t[1]], verts[t[2]]]);
            assert!(!polygon_contains(&hole, c));
        }
    }

    #[test]
    fn test_triangulate_with_two_holes() {
        let outer = rect_poly(0.0, 0.0, 100.0, 100.0);
        let h1 = rect_poly(10.0, 10.0, 30.0, 30.0);
        let h2 = rect_poly(60.0, 50.0, 80.0, 90.0);
        let (verts, tris) =
            triangulate_with_holes(&outer, &[h1.clone(), h2.clone()]).unwrap();
        let area = tri_area_sum(&verts, &tris);
        assert!((area - (10000.0 - 400.0 - 800.0)).abs() < 1e-2, "area was {area}");
        for t in &tris {
            let c = find_centroid(&[verts[t[0]], verts[t[1]], verts[t[2]]]);
            assert!(!polygon_contains(&h1, c));
            assert!(!polygon_contains(&h2, c));
        }
    }

    #[test]
    fn test_triangulate_triangle_hole() {
        let outer = rect_poly(0.0, 0.0, 200.0, 200.0);
        let hole = vec![
            Point::new(80.0, 80.0),
            Point::new(120.0, 80.0),
            Point::new(100.0, 120.0),
        ];
        let (verts, tris) = triangulate_with_holes(&outer, &[hole.clone()]).unwrap();
        let hole_area = polygon_area(&hole);
        let area = tri_area_sum(&verts, &tris);
        assert!((area - (40000.0 - hole_area)).abs() < 1.0, "area was {area}");
    }
}
