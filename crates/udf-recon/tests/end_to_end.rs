//! Full reconstructions, from in-memory clouds and through the store.

use std::path::Path;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use udf_mesh::{CloudPoint, Mesh, PointCloud};
use udf_recon::{
    AnalyticSphereField, DistanceVolume, ErrorCategory, FinalMesh, Grid, ReconConfig,
    ReconContext, ReconError, ReconRequest, Reconstructor, SmoothRequest, UPLOAD_PREFIX,
    processed_cells, select_narrow_band,
};

/// Fibonacci sphere of radius one around the origin.
fn unit_sphere(n: usize, with_normals: bool) -> PointCloud {
    let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    let mut cloud = PointCloud::with_capacity(n);
    for i in 0..n {
        let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
        let r = (1.0 - y * y).sqrt();
        let theta = golden * i as f64;
        let dir = Vector3::new(r * theta.cos(), y, r * theta.sin());
        cloud.push(if with_normals {
            CloudPoint::with_normal(Point3::from(dir), dir)
        } else {
            CloudPoint::new(Point3::from(dir))
        });
    }
    cloud
}

fn sphere_reconstructor(config: ReconConfig) -> Reconstructor {
    let ctx = ReconContext::from_config(config).with_model(Arc::new(AnalyticSphereField));
    Reconstructor::new(Arc::new(ctx))
}

fn pointcloud_reconstructor() -> Reconstructor {
    Reconstructor::new(Arc::new(ReconContext::from_config(ReconConfig::default())))
}

fn max_radial_error(mesh: &FinalMesh) -> f64 {
    mesh.positions
        .iter()
        .map(|p| {
            let r = Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64).norm();
            (r - 1.0).abs()
        })
        .fold(0.0, f64::max)
}

fn assert_closed_sphere(mesh: &FinalMesh) {
    let mesh = mesh.to_mesh();
    assert!(mesh.is_watertight(), "mesh has boundary edges");
    assert_eq!(mesh.euler_characteristic(), 2);
    assert!(mesh.signed_volume() > 0.0, "mesh is inside out");
}

// =============================================================================
// In-memory clouds
// =============================================================================

#[test]
fn test_sphere_field_reconstructs_unit_sphere() {
    let reconstructor = sphere_reconstructor(ReconConfig::default());
    let mesh = reconstructor
        .reconstruct_cloud(&unit_sphere(1000, true), 128)
        .unwrap();

    assert!(mesh.face_count() > 10_000);
    assert!(max_radial_error(&mesh) < 0.01);
    assert_closed_sphere(&mesh);
    assert!(mesh.warnings.is_empty(), "{:?}", mesh.warnings);
}

#[test]
fn test_pointcloud_field_without_normals() {
    let mesh = pointcloud_reconstructor()
        .reconstruct_cloud(&unit_sphere(1000, false), 32)
        .unwrap();

    assert!(max_radial_error(&mesh) < 0.03);
    assert_closed_sphere(&mesh);
}

#[test]
fn test_output_is_in_input_coordinates() {
    let reconstructor = sphere_reconstructor(ReconConfig::default());
    let mut cloud = unit_sphere(500, true);
    for point in &mut cloud.points {
        point.position = Point3::from(point.position.coords * 20.0 + Vector3::new(100.0, -5.0, 3.0));
    }

    let mesh = reconstructor.reconstruct_cloud(&cloud, 32).unwrap();
    let (min, max) = mesh.to_mesh().bounds().unwrap();
    let center = (min.coords + max.coords) / 2.0;
    assert!((center - Vector3::new(100.0, -5.0, 3.0)).norm() < 0.5);
    assert!((max.x - min.x - 40.0).abs() < 1.0);
}

#[test]
fn test_torus_without_normals_has_genus_one() {
    let (major, minor) = (2.0, 0.75);
    let mut cloud = PointCloud::with_capacity(160 * 60);
    for i in 0..160 {
        for j in 0..60 {
            let u = 2.0 * std::f64::consts::PI * f64::from(i) / 160.0;
            let v = 2.0 * std::f64::consts::PI * f64::from(j) / 60.0;
            let ring = major + minor * v.cos();
            cloud.push(CloudPoint::new(Point3::new(
                ring * u.cos(),
                ring * u.sin(),
                minor * v.sin(),
            )));
        }
    }

    let mesh = pointcloud_reconstructor()
        .reconstruct_cloud(&cloud, 64)
        .unwrap()
        .to_mesh();
    assert!(mesh.is_watertight(), "mesh has boundary edges");
    assert_eq!(mesh.euler_characteristic(), 0);
}

#[test]
fn test_two_spheres_without_normals_stay_closed() {
    let mut cloud = PointCloud::with_capacity(2000);
    for offset in [-3.0, 3.0] {
        for point in &unit_sphere(1000, false).points {
            cloud.push(CloudPoint::new(point.position + Vector3::new(offset, 0.0, 0.0)));
        }
    }

    let mesh = pointcloud_reconstructor()
        .reconstruct_cloud(&cloud, 64)
        .unwrap()
        .to_mesh();
    assert!(mesh.is_watertight(), "mesh has boundary edges");
    assert_eq!(mesh.euler_characteristic(), 4);
}

#[test]
fn test_planar_grid_cloud_reconstructs() {
    // 400 points sharing z = 0
    let mut cloud = PointCloud::with_capacity(400);
    for i in 0..400 {
        cloud.push(CloudPoint::new(Point3::new(
            f64::from(i % 20),
            f64::from(i / 20),
            0.0,
        )));
    }

    let mesh = pointcloud_reconstructor()
        .reconstruct_cloud(&cloud, 32)
        .unwrap();
    assert!(mesh.face_count() > 0);
    assert!(mesh.positions.iter().all(|p| p[2].abs() < 1.0));
}

#[test]
fn test_repeated_reconstruction_is_identical() {
    let cloud = PointCloud::from_positions(&[
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
    ]);
    let reconstructor = pointcloud_reconstructor();

    let first = format!("{:?}", reconstructor.reconstruct_cloud(&cloud, 3));
    for _ in 0..20 {
        assert_eq!(format!("{:?}", reconstructor.reconstruct_cloud(&cloud, 3)), first);
    }
}

// =============================================================================
// Narrow band coverage
// =============================================================================

/// Every cell the true surface passes through must be triangulated.
fn assert_crossing_cells_processed(n: usize) {
    const R: f64 = 0.37;
    let grid = Grid::with_size(n, 1.05).unwrap();
    let signed: Vec<f64> = grid.points().map(|p| p.coords.norm() - R).collect();
    let volume =
        DistanceVolume::from_values(grid, signed.iter().map(|s| s.abs()).collect()).unwrap();
    let band = select_narrow_band(&volume, 2.0 * grid.voxel_size()).unwrap();
    let cells = processed_cells(&grid, &band);

    let mut crossing = 0;
    for i in 0..n - 1 {
        for j in 0..n - 1 {
            for k in 0..n - 1 {
                let mut inside = false;
                let mut outside = false;
                for corner in 0..8 {
                    let s = signed[grid.linearize(
                        i + (corner & 1),
                        j + ((corner >> 1) & 1),
                        k + ((corner >> 2) & 1),
                    )];
                    inside |= s < 0.0;
                    outside |= s >= 0.0;
                }
                if inside && outside {
                    crossing += 1;
                    let cell = grid.linearize(i, j, k);
                    assert!(cells.binary_search(&cell).is_ok(), "cell ({i}, {j}, {k}) skipped");
                }
            }
        }
    }
    assert!(crossing > 0);
}

#[test]
fn test_band_covers_crossing_cells_at_128() {
    assert_crossing_cells_processed(128);
}

#[test]
fn test_band_covers_crossing_cells_at_192() {
    assert_crossing_cells_processed(192);
}

// =============================================================================
// Requests through the store
// =============================================================================

fn store_config(root: &Path) -> ReconConfig {
    ReconConfig {
        supported_resolutions: vec![32, 48],
        default_resolution: 32,
        storage_root: root.to_path_buf(),
        ..ReconConfig::default()
    }
}

fn uploaded_files(root: &Path) -> usize {
    std::fs::read_dir(root.join(UPLOAD_PREFIX))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[test]
fn test_request_round_trip() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("clouds")).unwrap();
    unit_sphere(800, false)
        .save(root.path().join("clouds/ball.xyz"))
        .unwrap();

    let reconstructor = sphere_reconstructor(store_config(root.path()));
    let request = ReconRequest::from_json(r#"{"file_path": "clouds/ball.xyz"}"#).unwrap();
    let response = reconstructor.handle(&request).unwrap();

    let prefix = format!("{UPLOAD_PREFIX}/");
    assert!(response.mesh_reference.starts_with(&prefix));
    assert!(response.mesh_reference.ends_with(".ply"));
    assert!(response.warnings.is_empty());
    assert_eq!(uploaded_files(root.path()), 1);

    let mesh = Mesh::load(root.path().join(&response.mesh_reference)).unwrap();
    assert!(mesh.is_watertight());
    assert_eq!(mesh.euler_characteristic(), 2);

    // Each request gets its own name
    let again = reconstructor
        .handle(&ReconRequest::new("clouds/ball.xyz").with_resolution(48))
        .unwrap();
    assert_ne!(again.mesh_reference, response.mesh_reference);
    assert_eq!(uploaded_files(root.path()), 2);
}

#[test]
fn test_rejected_requests_upload_nothing() {
    let root = tempfile::tempdir().unwrap();
    unit_sphere(200, false)
        .save(root.path().join("ball.xyz"))
        .unwrap();
    std::fs::write(root.path().join("ball.obj"), "v 0 0 0\n").unwrap();
    let reconstructor = sphere_reconstructor(store_config(root.path()));

    let err = reconstructor
        .handle(&ReconRequest::new("ball.xyz").with_resolution(64))
        .unwrap_err();
    assert!(matches!(err, ReconError::UnsupportedResolution { resolution: 64, .. }));

    let err = reconstructor.handle(&ReconRequest::new("ball.obj")).unwrap_err();
    assert!(matches!(err, ReconError::UnsupportedExtension { .. }));

    let err = reconstructor
        .handle(&ReconRequest::new("missing.xyz"))
        .unwrap_err();
    assert!(matches!(err, ReconError::MissingSource { .. }));
    assert_eq!(err.category(), ErrorCategory::InputError);

    assert_eq!(uploaded_files(root.path()), 0);
}

#[test]
fn test_geometry_failure_uploads_nothing() {
    let root = tempfile::tempdir().unwrap();
    PointCloud::from_positions(&[Point3::new(1.0, 1.0, 1.0); 6])
        .save(root.path().join("flat.xyz"))
        .unwrap();
    let reconstructor = sphere_reconstructor(store_config(root.path()));

    let err = reconstructor.handle(&ReconRequest::new("flat.xyz")).unwrap_err();
    assert!(matches!(err, ReconError::ZeroExtent));
    assert_eq!(uploaded_files(root.path()), 0);
}

#[test]
fn test_smooth_request_round_trip() {
    let root = tempfile::tempdir().unwrap();
    unit_sphere(800, true)
        .save(root.path().join("ball.ply"))
        .unwrap();
    let reconstructor = sphere_reconstructor(store_config(root.path()));
    let reconstructed = reconstructor.handle(&ReconRequest::new("ball.ply")).unwrap();

    let request = SmoothRequest::from_json(&format!(
        r#"{{"file_path": "{}", "smoothing_algorithm": "taubin", "smoothing_iterations": 5}}"#,
        reconstructed.mesh_reference
    ))
    .unwrap();
    let smoothed = reconstructor.smooth(&request).unwrap();
    assert_ne!(smoothed.mesh_reference, reconstructed.mesh_reference);

    let before = Mesh::load(root.path().join(&reconstructed.mesh_reference)).unwrap();
    let after = Mesh::load(root.path().join(&smoothed.mesh_reference)).unwrap();
    assert!(after.face_count() > 0);
    assert!(after.vertex_count() <= before.vertex_count());
    assert!(after.is_watertight());
}
