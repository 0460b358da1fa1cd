//! Mapping the extracted surface back to input coordinates and cleaning it.

use std::path::Path;

use nalgebra::Point3;
use serde::Serialize;
use tracing::{info, warn};
use udf_mesh::{
    Mesh, MeshResult, OperationTimer, fill_holes_with_max_edges, orient_outward,
    remove_degenerate_faces, remove_duplicate_faces, remove_unreferenced_vertices,
};

use crate::config::ReconConfig;
use crate::error::RepairWarning;
use crate::transform::ScaleTransform;

/// Reconstructed mesh ready for export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinalMesh {
    /// Vertex positions in input coordinates.
    pub positions: Vec<[f32; 3]>,
    /// Triangles, counter-clockwise seen from outside.
    pub faces: Vec<[u32; 3]>,
    /// Repairs applied on the way.
    pub warnings: Vec<RepairWarning>,
}

impl FinalMesh {
    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Widen back into a [`Mesh`].
    pub fn to_mesh(&self) -> Mesh {
        Mesh::from_parts(
            self.positions
                .iter()
                .map(|&[x, y, z]| Point3::new(f64::from(x), f64::from(y), f64::from(z))),
            self.faces.clone(),
        )
    }

    /// Write as binary PLY.
    pub fn save(&self, path: impl AsRef<Path>) -> MeshResult<()> {
        self.to_mesh().save(path)
    }
}

/// Rescale a normalized mesh and repair it.
///
/// Steps, in order: rescale, drop duplicate faces, drop degenerate faces,
/// fill holes up to `max_hole_edges`, orient outward, drop unreferenced
/// vertices. Every repair that changed something is logged at `warn` and
/// recorded in [`FinalMesh::warnings`].
pub fn finalize(mut mesh: Mesh, transform: &ScaleTransform, config: &ReconConfig) -> FinalMesh {
    let _timer = OperationTimer::with_items("finalize mesh", mesh.face_count());
    let mut warnings = Vec::new();

    for vertex in &mut mesh.vertices {
        vertex.position = transform.rescale(&vertex.position);
    }

    let duplicates = remove_duplicate_faces(&mut mesh);
    if duplicates > 0 {
        warnings.push(RepairWarning::DuplicateFacesRemoved { faces: duplicates });
    }

    let degenerate = remove_degenerate_faces(&mut mesh, config.degenerate_area_epsilon);
    if degenerate > 0 {
        warnings.push(RepairWarning::DegenerateFacesRemoved { faces: degenerate });
    }

    let holes = fill_holes_with_max_edges(&mut mesh, config.max_hole_edges);
    if holes.filled > 0 {
        warnings.push(RepairWarning::HolesFilled {
            holes: holes.filled,
            triangles: holes.triangles_added,
        });
    }
    if holes.skipped > 0 {
        warnings.push(RepairWarning::HolesSkipped {
            holes: holes.skipped,
        });
    }

    if orient_outward(&mut mesh) {
        warnings.push(RepairWarning::OrientationFlipped {
            faces: mesh.face_count(),
        });
    }

    remove_unreferenced_vertices(&mut mesh);

    for warning in &warnings {
        warn!(code = warning.code(), "{}", warning);
    }
    info!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        warnings = warnings.len(),
        "Mesh finalized"
    );

    FinalMesh {
        positions: mesh.positions_f32(),
        faces: mesh.faces,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn octahedron(faces: Vec<[u32; 3]>) -> Mesh {
        Mesh::from_parts(
            [
                Point3::new(0.5, 0.0, 0.0),
                Point3::new(-0.5, 0.0, 0.0),
                Point3::new(0.0, 0.5, 0.0),
                Point3::new(0.0, -0.5, 0.0),
                Point3::new(0.0, 0.0, 0.5),
                Point3::new(0.0, 0.0, -0.5),
            ],
            faces,
        )
    }

    const OUTWARD: [[u32; 3]; 8] = [
        [0, 2, 4],
        [2, 1, 4],
        [1, 3, 4],
        [3, 0, 4],
        [2, 0, 5],
        [1, 2, 5],
        [3, 1, 5],
        [0, 3, 5],
    ];

    fn identity() -> ScaleTransform {
        ScaleTransform {
            center: Vector3::zeros(),
            scale: 1.0,
        }
    }

    #[test]
    fn test_clean_mesh_has_no_warnings() {
        let result = finalize(octahedron(OUTWARD.to_vec()), &identity(), &ReconConfig::default());
        assert!(result.warnings.is_empty());
        assert_eq!(result.face_count(), 8);
        assert_eq!(result.vertex_count(), 6);
    }

    #[test]
    fn test_rescale_applies_transform() {
        let transform = ScaleTransform {
            center: Vector3::new(10.0, 0.0, -4.0),
            scale: 4.0,
        };
        let result = finalize(octahedron(OUTWARD.to_vec()), &transform, &ReconConfig::default());
        assert_eq!(result.positions[0], [12.0, 0.0, -4.0]);
        assert_eq!(result.positions[5], [10.0, 0.0, -6.0]);
    }

    #[test]
    fn test_repairs_are_reported() {
        // Inside-out, missing one face, with a reversed duplicate, a
        // collapsed face and a stray vertex
        let mut faces: Vec<[u32; 3]> = OUTWARD[1..].iter().map(|&[a, b, c]| [a, c, b]).collect();
        faces.push([2, 1, 4]);
        faces.push([3, 3, 4]);
        let mut mesh = octahedron(faces);
        mesh.vertices.push(udf_mesh::Vertex::from_coords(9.0, 9.0, 9.0));

        let result = finalize(mesh, &identity(), &ReconConfig::default());

        assert_eq!(
            result.warnings,
            vec![
                RepairWarning::DuplicateFacesRemoved { faces: 1 },
                RepairWarning::DegenerateFacesRemoved { faces: 1 },
                RepairWarning::HolesFilled {
                    holes: 1,
                    triangles: 1
                },
                RepairWarning::OrientationFlipped { faces: 8 },
            ]
        );
        assert_eq!(result.vertex_count(), 6);

        let mesh = result.to_mesh();
        assert!(mesh.is_watertight());
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_large_hole_is_skipped() {
        let config = ReconConfig {
            max_hole_edges: 2,
            ..ReconConfig::default()
        };
        let result = finalize(octahedron(OUTWARD[1..].to_vec()), &identity(), &config);
        assert!(result
            .warnings
            .contains(&RepairWarning::HolesSkipped { holes: 1 }));
        assert_eq!(result.face_count(), 7);
    }
}
