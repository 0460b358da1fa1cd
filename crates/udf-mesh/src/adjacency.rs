//! Edge and vertex adjacency for triangle meshes.

use hashbrown::HashMap;

/// Adjacency information for a face list.
///
/// Edges are stored with the smaller vertex index first.
#[derive(Debug, Clone)]
pub struct MeshAdjacency {
    edge_to_faces: HashMap<(u32, u32), Vec<u32>>,
    vertex_to_faces: HashMap<u32, Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency information from a list of faces.
    ///
    /// ```
    /// use udf_mesh::MeshAdjacency;
    ///
    /// let adj = MeshAdjacency::build(&[[0, 1, 2], [1, 3, 2]]);
    /// assert_eq!(adj.boundary_edge_count(), 4);
    /// ```
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> =
            HashMap::with_capacity(faces.len() * 3 / 2);
        let mut vertex_to_faces: HashMap<u32, Vec<u32>> = HashMap::with_capacity(faces.len() / 2);

        for (face_idx, face) in faces.iter().enumerate() {
            let face_idx = face_idx as u32;
            for &v in face {
                vertex_to_faces.entry(v).or_default().push(face_idx);
            }
            for i in 0..3 {
                let edge = normalize_edge(face[i], face[(i + 1) % 3]);
                edge_to_faces.entry(edge).or_default().push(face_idx);
            }
        }

        Self {
            edge_to_faces,
            vertex_to_faces,
        }
    }

    /// Faces adjacent to an edge, in either direction.
    pub fn faces_for_edge(&self, v0: u32, v1: u32) -> Option<&[u32]> {
        self.edge_to_faces
            .get(&normalize_edge(v0, v1))
            .map(Vec::as_slice)
    }

    /// Faces adjacent to a vertex.
    pub fn faces_for_vertex(&self, v: u32) -> &[u32] {
        self.vertex_to_faces.get(&v).map_or(&[], Vec::as_slice)
    }

    /// Iterate over edges with exactly one adjacent face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(&edge, _)| edge)
    }

    /// Count edges with exactly one adjacent face.
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() == 1)
            .count()
    }

    /// Iterate over edges shared by more than two faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(&edge, _)| edge)
    }

    /// Count edges shared by more than two faces.
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_to_faces
            .values()
            .filter(|faces| faces.len() > 2)
            .count()
    }

    /// True when every edge has at most two adjacent faces.
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() <= 2)
    }

    /// True when no edge is a boundary edge.
    pub fn is_watertight(&self) -> bool {
        self.edge_to_faces.values().all(|faces| faces.len() >= 2)
    }

    /// Total number of unique edges.
    pub fn edge_count(&self) -> usize {
        self.edge_to_faces.len()
    }

    /// Number of vertices referenced by at least one face.
    pub fn vertex_count(&self) -> usize {
        self.vertex_to_faces.len()
    }

    /// Euler characteristic `V - E + F` over referenced vertices.
    ///
    /// A closed genus-0 surface gives 2.
    pub fn euler_characteristic(&self, face_count: usize) -> i64 {
        self.vertex_count() as i64 - self.edge_count() as i64 + face_count as i64
    }
}

#[inline]
fn normalize_edge(v0: u32, v1: u32) -> (u32, u32) {
    if v0 < v1 { (v0, v1) } else { (v1, v0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Vec<[u32; 3]> {
        vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]]
    }

    #[test]
    fn test_single_triangle() {
        let adj = MeshAdjacency::build(&[[0, 1, 2]]);
        assert_eq!(adj.edge_count(), 3);
        assert_eq!(adj.boundary_edge_count(), 3);
        assert!(adj.is_manifold());
        assert!(!adj.is_watertight());
    }

    #[test]
    fn test_tetrahedron_is_closed() {
        let faces = tetrahedron();
        let adj = MeshAdjacency::build(&faces);
        assert!(adj.is_watertight());
        assert!(adj.is_manifold());
        assert_eq!(adj.edge_count(), 6);
        assert_eq!(adj.euler_characteristic(faces.len()), 2);
    }

    #[test]
    fn test_non_manifold_edge() {
        let adj = MeshAdjacency::build(&[[0, 1, 2], [1, 0, 3], [0, 1, 4]]);
        assert_eq!(adj.non_manifold_edge_count(), 1);
        assert_eq!(adj.non_manifold_edges().next(), Some((0, 1)));
        assert!(!adj.is_manifold());
    }

    #[test]
    fn test_lookup_is_direction_independent() {
        let adj = MeshAdjacency::build(&tetrahedron());
        assert_eq!(adj.faces_for_edge(2, 0), adj.faces_for_edge(0, 2));
        assert_eq!(adj.faces_for_vertex(3).len(), 3);
        assert!(adj.faces_for_vertex(99).is_empty());
    }
}
