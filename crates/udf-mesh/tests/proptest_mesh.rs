//! Property-based tests for mesh cleanup operations.
//!
//! Run with: cargo test -p udf-mesh -- proptest

use udf_mesh::{
    Mesh, MeshAdjacency, PointCloud, Vertex, fill_holes_with_max_edges, orient_outward,
    remove_degenerate_faces, remove_duplicate_faces, remove_unreferenced_vertices, weld_vertices,
};
use nalgebra::Point3;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_vertex() -> impl Strategy<Value = Vertex> {
    prop::array::uniform3(-10.0..10.0f64).prop_map(|[x, y, z]| Vertex::from_coords(x, y, z))
}

/// A mesh whose face indices are always in range.
fn arb_mesh(max_vertices: usize, max_faces: usize) -> impl Strategy<Value = Mesh> {
    (3..=max_vertices).prop_flat_map(move |num_vertices| {
        let vertices = prop::collection::vec(arb_vertex(), num_vertices);
        let n = num_vertices as u32;
        let faces = prop::collection::vec(prop::array::uniform3(0..n), 1..=max_faces);
        (vertices, faces).prop_map(|(vertices, faces)| Mesh { vertices, faces })
    })
}

/// Octahedron with the given radius, wound outward.
fn octahedron(radius: f64) -> Mesh {
    let positions = [
        Point3::new(radius, 0.0, 0.0),
        Point3::new(-radius, 0.0, 0.0),
        Point3::new(0.0, radius, 0.0),
        Point3::new(0.0, -radius, 0.0),
        Point3::new(0.0, 0.0, radius),
        Point3::new(0.0, 0.0, -radius),
    ];
    Mesh::from_parts(
        positions,
        vec![
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ],
    )
}

fn assert_indices_valid(mesh: &Mesh) -> Result<(), TestCaseError> {
    let n = mesh.vertex_count() as u32;
    for face in &mesh.faces {
        prop_assert!(face.iter().all(|&v| v < n), "face {:?} out of range {}", face, n);
    }
    Ok(())
}

// =============================================================================
// Property Tests: Cleanup
// =============================================================================

proptest! {
    #[test]
    fn proptest_remove_degenerate_leaves_distinct_indices(mesh in arb_mesh(20, 30)) {
        let mut m = mesh.clone();
        let removed = remove_degenerate_faces(&mut m, 0.0);

        prop_assert_eq!(m.face_count() + removed, mesh.face_count());
        for face in &m.faces {
            prop_assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2]);
        }
    }

    #[test]
    fn proptest_remove_duplicates_is_idempotent(mesh in arb_mesh(10, 40)) {
        let mut m = mesh.clone();
        remove_duplicate_faces(&mut m);
        let after_first = m.faces.clone();
        prop_assert_eq!(remove_duplicate_faces(&mut m), 0);
        prop_assert_eq!(m.faces, after_first);
    }

    #[test]
    fn proptest_weld_keeps_indices_valid(mesh in arb_mesh(30, 30), eps in 1e-6..1.0f64) {
        let mut m = mesh.clone();
        weld_vertices(&mut m, eps);
        prop_assert!(m.face_count() <= mesh.face_count());
        assert_indices_valid(&m)?;
    }

    #[test]
    fn proptest_compaction_keeps_indices_valid(mesh in arb_mesh(40, 10)) {
        let mut m = mesh.clone();
        let removed = remove_unreferenced_vertices(&mut m);

        prop_assert_eq!(m.vertex_count() + removed, mesh.vertex_count());
        prop_assert_eq!(m.face_count(), mesh.face_count());
        assert_indices_valid(&m)?;
        prop_assert_eq!(MeshAdjacency::build(&m.faces).vertex_count(), m.vertex_count());
    }

    #[test]
    fn proptest_surface_area_non_negative(mesh in arb_mesh(20, 20)) {
        prop_assert!(mesh.surface_area() >= 0.0);
        prop_assert!(mesh.signed_volume().is_finite());
    }
}

// =============================================================================
// Property Tests: Closed Surfaces
// =============================================================================

proptest! {
    #[test]
    fn proptest_orient_outward_gives_positive_volume(radius in 0.1..50.0f64, flip in any::<bool>()) {
        let mut mesh = octahedron(radius);
        if flip {
            mesh.flip_faces();
        }
        let flipped = orient_outward(&mut mesh);

        prop_assert_eq!(flipped, flip);
        prop_assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn proptest_fill_restores_removed_face(radius in 0.1..50.0f64, drop in 0usize..8) {
        let mut mesh = octahedron(radius);
        let full_volume = mesh.signed_volume();
        mesh.faces.remove(drop);

        let report = fill_holes_with_max_edges(&mut mesh, 100);

        prop_assert_eq!(report.filled, 1);
        prop_assert!(mesh.is_watertight());
        prop_assert_eq!(mesh.euler_characteristic(), 2);
        prop_assert!((mesh.signed_volume() - full_volume).abs() < 1e-9 * radius.powi(3).max(1.0));
    }

    #[test]
    fn proptest_cloud_bounds_contain_points(
        coords in prop::collection::vec(prop::array::uniform3(-100.0..100.0f64), 1..50)
    ) {
        let positions: Vec<Point3<f64>> = coords.iter().map(|&[x, y, z]| Point3::new(x, y, z)).collect();
        let cloud = PointCloud::from_positions(&positions);
        let (min, max) = cloud.bounds().expect("non-empty cloud");

        for p in cloud.positions() {
            prop_assert!(p.x >= min.x && p.y >= min.y && p.z >= min.z);
            prop_assert!(p.x <= max.x && p.y <= max.y && p.z <= max.z);
        }
    }
}
