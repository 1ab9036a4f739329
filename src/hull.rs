//! Convex hull of the sample footprint.
//!
//! The fitted model is only constrained inside the region the data actually
//! covers, so every session records the hull of its sample positions (in
//! earth-centered cartesian coordinates) as the validity boundary. This is
//! consumed as an opaque geometry primitive: points in, hull vertex indices
//! out.
//!
//! Incremental construction: seed a non-degenerate tetrahedron, then insert
//! the remaining points one at a time, replacing the faces each point can
//! see with a fan from its horizon edges.

use crate::coords::{cross, dot};
use std::collections::HashSet;

#[derive(Debug, Clone)]
struct Face {
    v: [usize; 3],
    normal: [f64; 3],
    anchor: [f64; 3],
}

impl Face {
    fn new(v: [usize; 3], pts: &[[f64; 3]], interior: [f64; 3]) -> Self {
        let (a, b, c) = (pts[v[0]], pts[v[1]], pts[v[2]]);
        let mut normal = cross(sub(b, a), sub(c, a));
        let mut v = v;
        if dot(normal, sub(interior, a)) > 0.0 {
            // Flip to keep the normal pointing away from the interior.
            v.swap(1, 2);
            normal = [-normal[0], -normal[1], -normal[2]];
        }
        Face {
            v,
            normal,
            anchor: a,
        }
    }

    #[inline]
    fn sees(&self, p: [f64; 3], eps: f64) -> bool {
        dot(self.normal, sub(p, self.anchor)) > eps * norm(self.normal)
    }
}

#[inline]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Indices of the points forming the convex hull boundary, sorted.
///
/// Degenerate inputs (fewer than four points, or a footprint too close to
/// a plane to seed a tetrahedron at the working tolerance) fall back to
/// reporting every point as a boundary vertex, with a warning; the fit
/// session carries on either way.
pub fn convex_hull_vertices(points: &[[f64; 3]]) -> Vec<usize> {
    let n = points.len();
    if n < 4 {
        return (0..n).collect();
    }

    // Tolerance scaled to the footprint extent.
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for p in points {
        for d in 0..3 {
            lo[d] = lo[d].min(p[d]);
            hi[d] = hi[d].max(p[d]);
        }
    }
    let diag = norm(sub(hi, lo));
    let eps = 1e-9 * diag.max(1.0);

    let Some(seed) = seed_tetrahedron(points, eps) else {
        log::warn!(
            "[HULL] footprint is degenerate at tolerance {eps:.3e}; reporting all {n} points as boundary vertices"
        );
        return (0..n).collect();
    };

    let interior = centroid(&seed.map(|i| points[i]));
    let mut faces = vec![
        Face::new([seed[0], seed[1], seed[2]], points, interior),
        Face::new([seed[0], seed[1], seed[3]], points, interior),
        Face::new([seed[0], seed[2], seed[3]], points, interior),
        Face::new([seed[1], seed[2], seed[3]], points, interior),
    ];

    for idx in 0..n {
        if seed.contains(&idx) {
            continue;
        }
        let p = points[idx];
        let visible: Vec<usize> = (0..faces.len()).filter(|&f| faces[f].sees(p, eps)).collect();
        if visible.is_empty() {
            continue;
        }

        // Horizon: directed edges of the visible region whose twin belongs
        // to a hidden face.
        let mut visible_edges: HashSet<(usize, usize)> = HashSet::new();
        for &f in &visible {
            let v = faces[f].v;
            for e in 0..3 {
                visible_edges.insert((v[e], v[(e + 1) % 3]));
            }
        }
        let horizon: Vec<(usize, usize)> = visible_edges
            .iter()
            .filter(|&&(u, v)| !visible_edges.contains(&(v, u)))
            .cloned()
            .collect();

        let visible_set: HashSet<usize> = visible.into_iter().collect();
        let mut kept: Vec<Face> = faces
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !visible_set.contains(i))
            .map(|(_, f)| f)
            .collect();
        for (u, v) in horizon {
            kept.push(Face::new([u, v, idx], points, interior));
        }
        faces = kept;
    }

    let mut verts: Vec<usize> = faces.iter().flat_map(|f| f.v).collect();
    verts.sort_unstable();
    verts.dedup();
    verts
}

/// Pick four points spanning a volume above the tolerance, or None if the
/// cloud is degenerate.
fn seed_tetrahedron(points: &[[f64; 3]], eps: f64) -> Option<[usize; 4]> {
    let n = points.len();
    let p0 = (0..n).min_by(|&a, &b| points[a][0].total_cmp(&points[b][0]))?;

    let p1 = (0..n).max_by(|&a, &b| {
        norm(sub(points[a], points[p0])).total_cmp(&norm(sub(points[b], points[p0])))
    })?;
    if norm(sub(points[p1], points[p0])) <= eps {
        return None;
    }

    let line = sub(points[p1], points[p0]);
    let p2 = (0..n).max_by(|&a, &b| {
        let da = norm(cross(line, sub(points[a], points[p0])));
        let db = norm(cross(line, sub(points[b], points[p0])));
        da.total_cmp(&db)
    })?;
    let area2 = norm(cross(line, sub(points[p2], points[p0])));
    if area2 <= eps * norm(line) {
        return None;
    }

    let normal = cross(line, sub(points[p2], points[p0]));
    let p3 = (0..n).max_by(|&a, &b| {
        let da = dot(normal, sub(points[a], points[p0])).abs();
        let db = dot(normal, sub(points[b], points[p0])).abs();
        da.total_cmp(&db)
    })?;
    if dot(normal, sub(points[p3], points[p0])).abs() <= eps * norm(normal) {
        return None;
    }

    Some([p0, p1, p2, p3])
}

fn centroid(pts: &[[f64; 3]; 4]) -> [f64; 3] {
    let mut c = [0.0; 3];
    for p in pts {
        for d in 0..3 {
            c[d] += p[d] * 0.25;
        }
    }
    c
}
