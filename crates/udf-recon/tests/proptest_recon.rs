//! Property-based tests for normalization, grid indexing and band selection.
//!
//! Run with: cargo test -p udf-recon -- proptest

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use udf_mesh::PointCloud;
use udf_recon::{DistanceVolume, Grid, ScaleTransform, processed_cells, select_narrow_band};

// =============================================================================
// Strategies
// =============================================================================

fn arb_point(range: f64) -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-range..range).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// A cloud with at least one axis of real extent.
fn arb_cloud() -> impl Strategy<Value = PointCloud> {
    prop::collection::vec(arb_point(1000.0), 4..64)
        .prop_filter("needs extent", |points| {
            let first = points[0];
            points.iter().any(|p| (p - first).norm() > 1e-3)
        })
        .prop_map(|points| PointCloud::from_positions(&points))
}

fn arb_unit_vector() -> impl Strategy<Value = Vector3<f64>> {
    prop::array::uniform3(-1.0..1.0f64)
        .prop_filter("non-zero", |[x, y, z]| x * x + y * y + z * z > 1e-2)
        .prop_map(|[x, y, z]| Vector3::new(x, y, z).normalize())
}

/// Signed sample of a random plane or sphere inside the grid cube.
#[derive(Debug, Clone)]
enum Surface {
    Plane { normal: Vector3<f64>, offset: f64 },
    Sphere { center: Point3<f64>, radius: f64 },
}

impl Surface {
    fn signed(&self, p: &Point3<f64>) -> f64 {
        match self {
            Surface::Plane { normal, offset } => normal.dot(&p.coords) - offset,
            Surface::Sphere { center, radius } => (p - center).norm() - radius,
        }
    }
}

fn arb_surface() -> impl Strategy<Value = Surface> {
    prop_oneof![
        (arb_unit_vector(), -0.3..0.3f64)
            .prop_map(|(normal, offset)| Surface::Plane { normal, offset }),
        (arb_point(0.1), 0.1..0.35f64)
            .prop_map(|(center, radius)| Surface::Sphere { center, radius }),
    ]
}

// =============================================================================
// Normalization
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn proptest_normalize_rescale_round_trip(cloud in arb_cloud()) {
        let transform = ScaleTransform::from_cloud(&cloud).unwrap();
        for p in cloud.positions() {
            let back = transform.rescale(&transform.normalize(&p));
            prop_assert!((back - p).norm() <= 1e-9 * transform.scale.max(1.0));
        }
    }

    #[test]
    fn proptest_normalized_cloud_fits_unit_cube(cloud in arb_cloud()) {
        let transform = ScaleTransform::from_cloud(&cloud).unwrap();
        let normalized = transform.normalize_cloud(&cloud);
        let (min, max) = normalized.bounds().unwrap();
        for axis in 0..3 {
            prop_assert!(min[axis] >= -0.5 - 1e-12);
            prop_assert!(max[axis] <= 0.5 + 1e-12);
        }
        let extent = max - min;
        prop_assert!((extent.max() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn proptest_linearize_is_bijective(n in 2usize..80, seed in any::<u64>()) {
        let grid = Grid::new(n).unwrap();
        let flat = (seed % grid.len() as u64) as usize;
        let [i, j, k] = grid.delinearize(flat);
        prop_assert!(i < n && j < n && k < n);
        prop_assert_eq!(grid.linearize(i, j, k), flat);
    }
}

// =============================================================================
// Band selection
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn proptest_band_holds_every_near_point(surface in arb_surface(), n in 12usize..28) {
        let grid = Grid::new(n).unwrap();
        let values = grid.points().map(|p| surface.signed(&p).abs()).collect();
        let volume = DistanceVolume::from_values(grid, values).unwrap();
        let threshold = 2.0 * grid.voxel_size();
        let band = select_narrow_band(&volume, threshold).unwrap();

        prop_assert!(band.indices().windows(2).all(|w| w[0] < w[1]));
        for flat in 0..grid.len() {
            let near = volume.get(flat) < threshold;
            prop_assert_eq!(band.contains(flat), near);
        }
    }

    #[test]
    fn proptest_band_covers_every_crossing_cell(surface in arb_surface(), n in 12usize..28) {
        let grid = Grid::new(n).unwrap();
        let signed: Vec<f64> = grid.points().map(|p| surface.signed(&p)).collect();
        let volume =
            DistanceVolume::from_values(grid, signed.iter().map(|s| s.abs()).collect()).unwrap();
        let band = select_narrow_band(&volume, 2.0 * grid.voxel_size()).unwrap();
        let cells = processed_cells(&grid, &band);

        for i in 0..n - 1 {
            for j in 0..n - 1 {
                for k in 0..n - 1 {
                    let corners = (0..8).map(|c| {
                        signed[grid.linearize(i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1))]
                    });
                    let (lo, hi) = corners.fold((f64::MAX, f64::MIN), |(lo, hi), s| {
                        (lo.min(s), hi.max(s))
                    });
                    if lo < 0.0 && hi >= 0.0 {
                        prop_assert!(cells.binary_search(&grid.linearize(i, j, k)).is_ok());
                    }
                }
            }
        }
    }
}
