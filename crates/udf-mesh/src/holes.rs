//! Hole detection and filling.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::Mesh;

/// Vertices around one hole, in fill order.
#[derive(Debug, Clone)]
pub struct BoundaryLoop {
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Outcome of a hole filling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoleFillReport {
    /// Holes closed with new triangles.
    pub filled: usize,
    /// Holes left open because they exceeded the edge limit.
    pub skipped: usize,
    /// Triangles added across all filled holes.
    pub triangles_added: usize,
}

/// Collect the closed boundary loops of `mesh`.
///
/// An open edge belongs to exactly one face, so it exists as one directed
/// half-edge. Each loop follows those half-edges backwards, which is the
/// winding a patch needs to agree with its neighbours.
pub fn detect_holes(mesh: &Mesh, adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let half_edges: HashSet<(u32, u32)> = mesh
        .faces
        .iter()
        .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
        .collect();

    let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
    for (a, b) in adjacency.boundary_edges() {
        let (from, to) = if half_edges.contains(&(a, b)) {
            (b, a)
        } else {
            (a, b)
        };
        successors.entry(from).or_default().push(to);
    }
    if successors.is_empty() {
        return Vec::new();
    }
    // Edge order comes from a hash map; fix it so pinched vertices always
    // split the same way.
    for next in successors.values_mut() {
        next.sort_unstable();
    }

    let mut starts: Vec<u32> = successors.keys().copied().collect();
    starts.sort_unstable();

    let mut loops = Vec::new();
    for start in starts {
        // A pinched vertex can open more than one loop.
        while successors.get(&start).is_some_and(|s| !s.is_empty()) {
            let mut vertices = vec![start];
            let mut current = start;
            let closed = loop {
                match successors.get_mut(&current).and_then(Vec::pop) {
                    Some(next) if next == start => break true,
                    Some(next) => {
                        vertices.push(next);
                        current = next;
                    }
                    None => break false,
                }
            };

            if !closed {
                warn!(start, length = vertices.len(), "Boundary chain does not close");
            } else if vertices.len() >= 3 {
                loops.push(BoundaryLoop { vertices });
            }
        }
    }

    debug!(
        holes = loops.len(),
        sizes = ?loops.iter().map(BoundaryLoop::edge_count).collect::<Vec<_>>(),
        "Detected holes"
    );
    loops
}

/// Triangulate one hole by ear clipping in the plane of best fit.
///
/// Falls back to a fan over the remaining vertices if no ear is found,
/// which happens for strongly non-planar or self-overlapping loops.
fn fill_hole_ear_clipping(mesh: &Mesh, boundary: &BoundaryLoop) -> Vec<[u32; 3]> {
    let n = boundary.vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let positions: Vec<Point3<f64>> = boundary
        .vertices
        .iter()
        .map(|&v| mesh.vertices[v as usize].position)
        .collect();
    let polygon = project_to_plane(&positions);

    let mut ring: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);

    while ring.len() > 3 {
        let len = ring.len();
        let corner = |i: usize| (ring[(i + len - 1) % len], ring[i], ring[(i + 1) % len]);
        let Some(i) = (0..len).find(|&i| is_ear(&polygon, &ring, corner(i))) else {
            debug!(remaining = len, "No ear found, closing with a fan");
            break;
        };
        let (a, b, c) = corner(i);
        triangles.push([boundary.vertices[a], boundary.vertices[b], boundary.vertices[c]]);
        ring.remove(i);
    }

    let apex = ring[0];
    triangles.extend(ring[1..].windows(2).map(|w| {
        [
            boundary.vertices[apex],
            boundary.vertices[w[0]],
            boundary.vertices[w[1]],
        ]
    }));
    triangles
}

/// Express the loop in a 2D basis of its Newell plane, counter-clockwise.
fn project_to_plane(positions: &[Point3<f64>]) -> Vec<[f64; 2]> {
    let n = positions.len();
    let normal = (0..n)
        .map(|i| positions[i].coords.cross(&positions[(i + 1) % n].coords))
        .fold(Vector3::zeros(), |acc, c| acc + c)
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector3::z);

    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);

    positions
        .iter()
        .map(|p| [p.coords.dot(&u), p.coords.dot(&v)])
        .collect()
}

fn cross2(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn is_ear(polygon: &[[f64; 2]], ring: &[usize], (a, b, c): (usize, usize, usize)) -> bool {
    let (pa, pb, pc) = (polygon[a], polygon[b], polygon[c]);
    if cross2(pa, pb, pc) <= 0.0 {
        return false;
    }
    ring.iter()
        .filter(|&&k| k != a && k != b && k != c)
        .all(|&k| {
            let p = polygon[k];
            cross2(pa, pb, p) < 0.0 || cross2(pb, pc, p) < 0.0 || cross2(pc, pa, p) < 0.0
        })
}

/// Fill all holes with at most `max_hole_edges` boundary edges.
///
/// Holes are triangulated in parallel, then merged into the face list.
pub fn fill_holes_with_max_edges(mesh: &mut Mesh, max_hole_edges: usize) -> HoleFillReport {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(mesh, &adjacency);

    let (fillable, skipped): (Vec<_>, Vec<_>) = holes
        .into_iter()
        .partition(|hole| hole.edge_count() <= max_hole_edges);

    for hole in &skipped {
        warn!(edges = hole.edge_count(), max_hole_edges, "Leaving large hole open");
    }

    let new_triangles: Vec<Vec<[u32; 3]>> = fillable
        .par_iter()
        .map(|hole| fill_hole_ear_clipping(mesh, hole))
        .collect();

    let mut report = HoleFillReport {
        filled: new_triangles.len(),
        skipped: skipped.len(),
        triangles_added: 0,
    };
    for triangles in new_triangles {
        report.triangles_added += triangles.len();
        mesh.faces.extend(triangles);
    }

    if report.filled > 0 {
        info!(
            holes = report.filled,
            triangles = report.triangles_added,
            "Filled holes"
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;

    /// Unit cube with the z = 1 face removed.
    fn open_box_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        for (x, y, z) in [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (1.0, 1.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 0.0, 1.0),
            (1.0, 1.0, 1.0),
            (0.0, 1.0, 1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }

        mesh.faces.extend([
            [0, 2, 1],
            [0, 3, 2],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ]);

        mesh
    }

    #[test]
    fn test_detect_holes() {
        let mesh = open_box_mesh();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&mesh, &adjacency);

        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
    }

    #[test]
    fn test_fill_holes_closes_box_with_consistent_winding() {
        let mut mesh = open_box_mesh();
        let report = fill_holes_with_max_edges(&mut mesh, 100);

        assert_eq!(report.filled, 1);
        assert_eq!(report.triangles_added, 2);

        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_watertight());
        assert!((mesh.signed_volume() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_large_holes_are_skipped() {
        let mut mesh = open_box_mesh();
        let report = fill_holes_with_max_edges(&mut mesh, 3);

        assert_eq!(report.filled, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(mesh.face_count(), 10);
    }

    #[test]
    fn test_closed_mesh_has_no_holes() {
        let mut mesh = open_box_mesh();
        fill_holes_with_max_edges(&mut mesh, 100);
        let report = fill_holes_with_max_edges(&mut mesh, 100);
        assert_eq!(report, HoleFillReport::default());
    }

    #[test]
    fn test_pinched_boundary_walk_is_repeatable() {
        // Two unit squares of a 3x3 lattice touching only at the centre (4)
        let mesh = Mesh::from_parts(
            (0..9).map(|v| Point3::new(f64::from(v % 3), f64::from(v / 3), 0.0)),
            vec![[0, 1, 4], [0, 4, 3], [4, 5, 8], [4, 8, 7]],
        );

        for _ in 0..20 {
            let adjacency = MeshAdjacency::build(&mesh.faces);
            let holes = detect_holes(&mesh, &adjacency);
            assert_eq!(holes.len(), 1);
            assert_eq!(holes[0].vertices, vec![0, 3, 4, 7, 8, 5, 4, 1]);
        }
    }

    #[test]
    fn test_concave_hole_triangulates_inside_outline() {
        // L-shaped outline in the z = 0 plane, counter-clockwise from +z.
        let outline = [
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (1.0, 1.0),
            (1.0, 2.0),
            (0.0, 2.0),
        ];
        let mesh = Mesh::from_parts(
            outline.iter().map(|&(x, y)| Point3::new(x, y, 0.0)),
            Vec::new(),
        );
        let hole = BoundaryLoop {
            vertices: (0..6).collect(),
        };

        let triangles = fill_hole_ear_clipping(&mesh, &hole);
        assert_eq!(triangles.len(), 4);

        let patch = Mesh::from_parts(mesh.vertices.iter().map(|v| v.position), triangles);
        for tri in patch.triangles() {
            assert!(tri.normal().is_some_and(|n| n.z > 0.0));
        }
        assert!((patch.surface_area() - 3.0).abs() < 1e-10);
    }
}
