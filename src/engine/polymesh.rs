// Triangle aggregation into convex polygons, the way recast builds its poly
// mesh: vertices are quantized to unsigned 16-bit grid coordinates, welded,
// and adjacent triangles are merged greedily while the union stays convex.

use super::geom::Point;
use std::collections::HashMap;

/// Sentinel for unused polygon vertex slots.
pub const MESH_NULL_IDX: u16 = u16::MAX;

/// Vertex/polygon counts above this make the mesh unusable downstream.
pub const MESH_MAX_ITEMS: usize = 0xFFE;

/// A polygon soup over a welded u16 vertex grid. `polys` is a flat array of
/// `npolys * nvp` vertex indices; unused slots hold `MESH_NULL_IDX`.
#[derive(Clone, Debug)]
pub struct PolyMesh {
    pub verts: Vec<[u16; 2]>,
    pub polys: Vec<u16>,
    pub nvp: usize,
}

impl PolyMesh {
    pub fn npolys(&self) -> usize {
        if self.nvp == 0 {
            0
        } else {
            self.polys.len() / self.nvp
        }
    }

    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp..(i + 1) * self.nvp]
    }

    /// Number of used vertex slots in polygon `i`.
    pub fn poly_vert_count(&self, i: usize) -> usize {
        self.poly(i).iter().take_while(|&&v| v != MESH_NULL_IDX).count()
    }
}

#[inline]
fn cross_i64(a: [u16; 2], b: [u16; 2], c: [u16; 2]) -> i64 {
    let abx = b[0] as i64 - a[0] as i64;
    let aby = b[1] as i64 - a[1] as i64;
    let acx = c[0] as i64 - a[0] as i64;
    let acy = c[1] as i64 - a[1] as i64;
    abx * acy - aby * acx
}

fn ring_is_convex(verts: &[[u16; 2]], ring: &[u16]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let a = verts[ring[i] as usize];
        let b = verts[ring[(i + 1) % n] as usize];
        let c = verts[ring[(i + 2) % n] as usize];
        if cross_i64(a, b, c) < 0 {
            return false;
        }
    }
    true
}

/// Smallest turn cross product of the ring; the merge candidate with the
/// largest value keeps the mesh as convex as possible.
fn convexity_margin(verts: &[[u16; 2]], ring: &[u16]) -> i64 {
    let n = ring.len();
    let mut min = i64::MAX;
    for i in 0..n {
        let a = verts[ring[i] as usize];
        let b = verts[ring[(i + 1) % n] as usize];
        let c = verts[ring[(i + 2) % n] as usize];
        min = min.min(cross_i64(a, b, c));
    }
    min
}

/// Join two rings along the shared edge `(ring_a[ea] -> ring_a[ea+1])`,
/// which appears reversed in `ring_b` at `eb`.
fn merge_rings(ring_a: &[u16], ring_b: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = ring_a.len();
    let nb = ring_b.len();
    let mut out = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        out.push(ring_a[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        out.push(ring_b[(eb + 1 + i) % nb]);
    }
    out
}

/// Find the shared edge between two rings: returns `(ea, eb)` such that
/// `a[ea] == b[eb+1]` and `a[ea+1] == b[eb]`.
fn shared_edge(ring_a: &[u16], ring_b: &[u16]) -> Option<(usize, usize)> {
    let na = ring_a.len();
    let nb = ring_b.len();
    for ea in 0..na {
        let (u, v) = (ring_a[ea], ring_a[(ea + 1) % na]);
        for eb in 0..nb {
            if ring_b[eb] == v && ring_b[(eb + 1) % nb] == u {
                return Some((ea, eb));
            }
        }
    }
    None
}

/// Build an aggregated poly mesh from triangulated free space.
///
/// `points` must already be offset into the unsigned 16-bit range; they are
/// rounded onto the integer grid and welded. `nvp` is the maximum vertex
/// count per output polygon, 3..=8.
pub fn aggregate_triangles_into_convex_polys(
    points: &[Point],
    tris: &[[usize; 3]],
    nvp: usize,
) -> Result<PolyMesh, String> {
    if !(3..=8).contains(&nvp) {
        return Err(format!("nvp {nvp} out of range 3..=8"));
    }

    // Quantize and weld.
    let mut verts: Vec<[u16; 2]> = Vec::new();
    let mut index_of: HashMap<[u16; 2], u16> = HashMap::new();
    let mut remap: Vec<u16> = Vec::with_capacity(points.len());
    for p in points {
        let q = [
            p.x.round().clamp(0.0, 65534.0) as u16,
            p.y.round().clamp(0.0, 65534.0) as u16,
        ];
        let idx = *index_of.entry(q).or_insert_with(|| {
            verts.push(q);
            (verts.len() - 1) as u16
        });
        remap.push(idx);
    }
    if verts.len() > MESH_MAX_ITEMS {
        return Err(format!("too many mesh vertices ({})", verts.len()));
    }

    // Seed polygons from the triangles, dropping any the quantization
    // flattened, and orienting all of them counter-clockwise.
    let mut polys: Vec<Vec<u16>> = Vec::new();
    for t in tris {
        let mut ring = vec![remap[t[0]], remap[t[1]], remap[t[2]]];
        if ring[0] == ring[1] || ring[1] == ring[2] || ring[0] == ring[2] {
            continue;
        }
        let c = cross_i64(
            verts[ring[0] as usize],
            verts[ring[1] as usize],
            verts[ring[2] as usize],
        );
        if c == 0 {
            continue;
        }
        if c < 0 {
            ring.reverse();
        }
        polys.push(ring);
    }

    // Greedy merge: keep joining the pair with the best convexity margin.
    loop {
        let mut best: Option<(i64, usize, usize, usize, usize)> = None;
        for ia in 0..polys.len() {
            for ib in (ia + 1)..polys.len() {
                if polys[ia].len() + polys[ib].len() - 2 > nvp {
                    continue;
                }
                let Some((ea, eb)) = shared_edge(&polys[ia], &polys[ib]) else {
                    continue;
                };
                let merged = merge_rings(&polys[ia], &polys[ib], ea, eb);
                if !ring_is_convex(&verts, &merged) {
                    continue;
                }
                let margin = convexity_margin(&verts, &merged);
                let better = match best {
                    None => true,
                    Some((bm, bia, bib, _, _)) => {
                        margin > bm || (margin == bm && (ia, ib) < (bia, bib))
                    }
                };
                if better {
                    best = Some((margin, ia, ib, ea, eb));
                }
            }
        }
        match best {
            Some((_, ia, ib, ea, eb)) => {
                let merged = merge_rings(&polys[ia], &polys[ib], ea, eb);
                polys[ia] = merged;
                polys.swap_remove(ib);
            }
            None => break,
        }
    }

    if polys.len() > MESH_MAX_ITEMS {
        return Err(format!("too many mesh polygons ({})", polys.len()));
    }

    let mut flat = vec![MESH_NULL_IDX; polys.len() * nvp];
    for (i, ring) in polys.iter().enumerate() {
        for (j, &v) in ring.iter().enumerate() {
            flat[i * nvp + j] = v;
        }
    }
    Ok(PolyMesh {
        verts,
        polys: flat,
        nvp,
    })
}
