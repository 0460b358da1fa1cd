//! Mesh cleanup operations: duplicate and degenerate removal, welding, compaction.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::{Mesh, Triangle};

/// Drop faces that repeat an index or have area at most `area_epsilon`.
/// Returns how many were dropped.
pub fn remove_degenerate_faces(mesh: &mut Mesh, area_epsilon: f64) -> usize {
    let before = mesh.faces.len();
    let vertices = &mesh.vertices;

    mesh.faces.retain(|&[i0, i1, i2]| {
        if i0 == i1 || i1 == i2 || i0 == i2 {
            return false;
        }
        let tri = Triangle::new(
            vertices[i0 as usize].position,
            vertices[i1 as usize].position,
            vertices[i2 as usize].position,
        );
        tri.area() > area_epsilon
    });

    let removed = before - mesh.faces.len();
    if removed > 0 {
        info!(removed, area_epsilon, "Dropped degenerate faces");
    }
    removed
}

/// Keep only the first face over each vertex triple, whatever its winding.
/// Returns how many were dropped.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let before = mesh.faces.len();

    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(before);
    mesh.faces.retain(|face| {
        let mut key = *face;
        key.sort_unstable();
        seen.insert(key)
    });

    let removed = before - mesh.faces.len();
    if removed > 0 {
        info!(removed, "Dropped duplicate faces");
    }
    removed
}

/// Merge each vertex into the lowest-indexed unmerged vertex within
/// `epsilon`, then drop faces that collapsed. Returns the merge count.
///
/// Candidates come from a hash grid of `2 * epsilon` cells.
pub fn weld_vertices(mesh: &mut Mesh, epsilon: f64) -> usize {
    if mesh.vertices.is_empty() || epsilon <= 0.0 {
        return 0;
    }

    let cell_size = epsilon * 2.0;
    let mut spatial_hash: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
    for (idx, vertex) in mesh.vertices.iter().enumerate() {
        spatial_hash
            .entry(pos_to_cell(&vertex.position, cell_size))
            .or_default()
            .push(idx as u32);
    }

    let mut remap: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    let mut merged_count = 0;

    for (idx, vertex) in mesh.vertices.iter().enumerate() {
        let idx = idx as u32;
        if remap[idx as usize] != idx {
            continue;
        }

        let cell = pos_to_cell(&vertex.position, cell_size);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(candidates) = spatial_hash.get(&(cell.0 + dx, cell.1 + dy, cell.2 + dz))
                    else {
                        continue;
                    };
                    for &other in candidates {
                        if other <= idx || remap[other as usize] != other {
                            continue;
                        }
                        let dist = (vertex.position - mesh.vertices[other as usize].position).norm();
                        if dist < epsilon {
                            remap[other as usize] = idx;
                            merged_count += 1;
                        }
                    }
                }
            }
        }
    }

    if merged_count == 0 {
        return 0;
    }

    for face in &mut mesh.faces {
        for v in face.iter_mut() {
            *v = remap[*v as usize];
        }
    }
    mesh.faces
        .retain(|&[i0, i1, i2]| i0 != i1 && i1 != i2 && i0 != i2);

    info!(merged = merged_count, epsilon, "Welded coincident vertices");
    merged_count
}

/// Compact the vertex list to the vertices some face uses.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let original_count = mesh.vertices.len();

    let mut referenced = vec![false; original_count];
    for face in &mesh.faces {
        for &v in face {
            referenced[v as usize] = true;
        }
    }

    if referenced.iter().all(|&r| r) {
        return 0;
    }

    let mut remap = vec![u32::MAX; original_count];
    let mut new_vertices = Vec::with_capacity(original_count);
    for (old_idx, vertex) in mesh.vertices.drain(..).enumerate() {
        if referenced[old_idx] {
            remap[old_idx] = new_vertices.len() as u32;
            new_vertices.push(vertex);
        }
    }

    for face in &mut mesh.faces {
        for v in face.iter_mut() {
            *v = remap[*v as usize];
        }
    }

    let removed = original_count - new_vertices.len();
    mesh.vertices = new_vertices;

    if removed > 0 {
        info!(removed, "Dropped unreferenced vertices");
    }
    removed
}

/// Remove excess faces on edges shared by more than two faces.
///
/// For each such edge the two largest faces are kept. Returns the number of
/// faces removed.
pub fn fix_non_manifold_edges(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let nm_edges: Vec<(u32, u32)> = adjacency.non_manifold_edges().collect();
    if nm_edges.is_empty() {
        return 0;
    }

    debug!(edges = nm_edges.len(), "Resolving non-manifold edges");

    let mut faces_to_remove: HashSet<u32> = HashSet::new();
    for &(v0, v1) in &nm_edges {
        let Some(faces) = adjacency.faces_for_edge(v0, v1) else {
            continue;
        };
        let mut by_area: Vec<(u32, f64)> = faces
            .iter()
            .filter_map(|&fi| mesh.triangle(fi as usize).map(|t| (fi, t.area())))
            .collect();
        by_area.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        faces_to_remove.extend(by_area.iter().skip(2).map(|&(fi, _)| fi));
    }

    let mut idx = 0u32;
    mesh.faces.retain(|_| {
        let keep = !faces_to_remove.contains(&idx);
        idx += 1;
        keep
    });

    info!(
        edges = nm_edges.len(),
        faces_removed = faces_to_remove.len(),
        "Resolved non-manifold edges"
    );
    faces_to_remove.len()
}

/// Flip every face when the mesh is inside-out.
///
/// Returns true when the faces were flipped.
pub fn orient_outward(mesh: &mut Mesh) -> bool {
    if mesh.is_inside_out() {
        mesh.flip_faces();
        info!(faces = mesh.face_count(), "Surface was inside-out, flipped");
        true
    } else {
        false
    }
}

/// Compute vertex normals as the area-weighted average of adjacent faces.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); mesh.vertices.len()];

    for &face in &mesh.faces {
        if let Some(tri) = mesh.triangle_for(face) {
            // Length is twice the area
            let weighted = tri.normal_unnormalized();
            for v in face {
                accum[v as usize] += weighted;
            }
        }
    }

    for (vertex, n) in mesh.vertices.iter_mut().zip(accum) {
        let len = n.norm();
        vertex.normal = (len > f64::EPSILON).then(|| n / len);
    }

    debug!(vertices = mesh.vertices.len(), "Vertex normals updated");
}

fn pos_to_cell(pos: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    let c = (pos.coords / cell_size).map(|v| v.floor() as i64);
    (c.x, c.y, c.z)
}

impl Mesh {
    fn triangle_for(&self, [i0, i1, i2]: [u32; 3]) -> Option<Triangle> {
        Some(Triangle::new(
            self.vertices.get(i0 as usize)?.position,
            self.vertices.get(i1 as usize)?.position,
            self.vertices.get(i2 as usize)?.position,
        ))
    }
}
