//! Sampling passes over the grid.
//!
//! The coarse pass evaluates every grid point without gradients. The narrow
//! band keeps the points within `band_factor * voxel_size` of the surface,
//! and the refined pass re-queries only those, with gradients.

use nalgebra::Vector3;
use tracing::{debug, info};
use udf_mesh::OperationTimer;

use crate::error::{ReconError, ReconResult};
use crate::grid::Grid;
use crate::oracle::BatchedOracle;

/// Dense unsigned distances, one per grid point in flat-index order.
#[derive(Debug, Clone)]
pub struct DistanceVolume {
    grid: Grid,
    values: Vec<f64>,
}

impl DistanceVolume {
    /// Wrap precomputed distances. Fails if the length is not `grid.len()`
    /// or a value is negative or non-finite.
    pub fn from_values(grid: Grid, values: Vec<f64>) -> ReconResult<Self> {
        if values.len() != grid.len() {
            return Err(ReconError::ShapeMismatch {
                batch_index: 0,
                expected: grid.len(),
                actual: values.len(),
            });
        }
        check_distances(&values, |i| i)?;
        Ok(Self { grid, values })
    }

    /// The grid these distances sample.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// All distances.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Distance at a flat index.
    #[inline]
    pub fn get(&self, flat: usize) -> f64 {
        self.values[flat]
    }
}

/// Gradients of the narrow band points, sorted by flat index.
#[derive(Debug, Clone, Default)]
pub struct GradientVolume {
    indices: Vec<usize>,
    gradients: Vec<Vector3<f64>>,
}

impl GradientVolume {
    /// Build from sorted flat indices and matching gradients.
    pub fn new(indices: Vec<usize>, gradients: Vec<Vector3<f64>>) -> Self {
        debug_assert_eq!(indices.len(), gradients.len());
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        Self { indices, gradients }
    }

    /// Gradient at a flat index, if the point was refined.
    pub fn get(&self, flat: usize) -> Option<&Vector3<f64>> {
        self.indices
            .binary_search(&flat)
            .ok()
            .map(|pos| &self.gradients[pos])
    }

    /// Number of stored gradients.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when nothing was refined.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(flat index, gradient)` pairs in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Vector3<f64>)> {
        self.indices.iter().copied().zip(&self.gradients)
    }
}

/// Grid points close enough to the surface to be refined.
#[derive(Debug, Clone)]
pub struct NarrowBand {
    mask: Vec<bool>,
    indices: Vec<usize>,
    threshold: f64,
}

impl NarrowBand {
    /// True if the point at `flat` is in the band.
    #[inline]
    pub fn contains(&self, flat: usize) -> bool {
        self.mask[flat]
    }

    /// One flag per grid point.
    #[inline]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Band points in ascending flat-index order.
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of band points.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Always false for a band returned by [`select_narrow_band`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Distance below which points were selected.
    #[inline]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Query every grid point for its coarse distance.
///
/// Points are generated per batch from the grid, so the full coordinate
/// list is never materialized.
pub fn coarse_pass(grid: &Grid, oracle: &BatchedOracle<'_>) -> ReconResult<DistanceVolume> {
    let _timer = OperationTimer::with_items("coarse pass", grid.len());
    info!(
        dims = grid.resolution(),
        total = grid.len(),
        batches = oracle.batch_count(grid.len()),
        "Running coarse pass"
    );

    let values = oracle.query_coarse_with(grid.len(), |flat| grid.point(flat))?;
    check_distances(&values, |i| i)?;

    Ok(DistanceVolume {
        grid: *grid,
        values,
    })
}

/// Select the points with `distance < threshold`.
///
/// For a 1-Lipschitz field and `threshold >= voxel_size`, every grid edge
/// crossing the zero set has at least one endpoint in the band.
pub fn select_narrow_band(volume: &DistanceVolume, threshold: f64) -> ReconResult<NarrowBand> {
    let mask: Vec<bool> = volume.values.iter().map(|&d| d < threshold).collect();
    let indices: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(flat, &inside)| inside.then_some(flat))
        .collect();

    if indices.is_empty() {
        return Err(ReconError::EmptyNarrowBand { threshold });
    }

    let total = volume.values.len();
    debug!(
        band_points = indices.len(),
        total,
        fraction = indices.len() as f64 / total as f64,
        threshold,
        "Selected narrow band"
    );

    Ok(NarrowBand {
        mask,
        indices,
        threshold,
    })
}

/// Re-query the band points with gradients.
///
/// Band entries of `volume` are overwritten with the refined distances;
/// points outside the band keep their coarse values.
pub fn refined_pass(
    volume: &mut DistanceVolume,
    band: &NarrowBand,
    oracle: &BatchedOracle<'_>,
) -> ReconResult<GradientVolume> {
    let _timer = OperationTimer::with_items("refined pass", band.len());
    let grid = volume.grid;
    info!(
        band_points = band.len(),
        batches = oracle.batch_count(band.len()),
        "Running refined pass"
    );

    let (distances, gradients) =
        oracle.query_refined_with(band.len(), |i| grid.point(band.indices[i]))?;
    check_distances(&distances, |i| band.indices[i])?;

    for (&flat, &d) in band.indices.iter().zip(&distances) {
        volume.values[flat] = d;
    }

    Ok(GradientVolume::new(band.indices.clone(), gradients))
}

/// Reject negative or non-finite distances, reporting the grid index.
fn check_distances(values: &[f64], flat_of: impl Fn(usize) -> usize) -> ReconResult<()> {
    match values.iter().position(|d| !(d.is_finite() && *d >= 0.0)) {
        Some(i) => Err(ReconError::InvalidDistance {
            index: flat_of(i),
            value: values[i],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{DeviceError, DeviceGate, DistanceFieldModel, ReferenceCloud};
    use nalgebra::Point3;
    use udf_mesh::PointCloud;

    /// Distance to the plane z = `offset`, gradient away from it.
    struct PlaneModel {
        offset: f64,
    }

    impl DistanceFieldModel for PlaneModel {
        fn name(&self) -> &str {
            "plane"
        }

        fn query_coarse(
            &self,
            _cloud: &ReferenceCloud,
            points: &[Point3<f64>],
        ) -> Result<Vec<f64>, DeviceError> {
            Ok(points.iter().map(|p| (p.z - self.offset).abs()).collect())
        }

        fn query_refined(
            &self,
            cloud: &ReferenceCloud,
            points: &[Point3<f64>],
        ) -> Result<(Vec<f64>, Vec<Vector3<f64>>), DeviceError> {
            let gradients = points
                .iter()
                .map(|p| Vector3::z() * if p.z < self.offset { -1.0 } else { 1.0 })
                .collect();
            Ok((self.query_coarse(cloud, points)?, gradients))
        }
    }

    /// Returns -1 everywhere.
    struct NegativeModel;

    impl DistanceFieldModel for NegativeModel {
        fn name(&self) -> &str {
            "negative"
        }

        fn query_coarse(
            &self,
            _cloud: &ReferenceCloud,
            points: &[Point3<f64>],
        ) -> Result<Vec<f64>, DeviceError> {
            Ok(vec![-1.0; points.len()])
        }

        fn query_refined(
            &self,
            _cloud: &ReferenceCloud,
            points: &[Point3<f64>],
        ) -> Result<(Vec<f64>, Vec<Vector3<f64>>), DeviceError> {
            Ok((vec![-1.0; points.len()], vec![Vector3::z(); points.len()]))
        }
    }

    fn empty_reference() -> ReferenceCloud {
        ReferenceCloud::new(&PointCloud::new())
    }

    #[test]
    fn test_plane_band_and_refinement() {
        let grid = Grid::new(16).unwrap();
        let model = PlaneModel { offset: 0.013 };
        let cloud = empty_reference();
        let gate = DeviceGate::default();
        let oracle = BatchedOracle::new(&model, &cloud, &gate, 1000);

        let mut volume = coarse_pass(&grid, &oracle).unwrap();
        assert_eq!(volume.values().len(), 16 * 16 * 16);

        let threshold = 2.0 * grid.voxel_size();
        let band = select_narrow_band(&volume, threshold).unwrap();
        assert!(!band.is_empty());
        // Four layers of z within two voxels of the plane
        assert_eq!(band.len(), 16 * 16 * 4);

        let gradients = refined_pass(&mut volume, &band, &oracle).unwrap();
        assert_eq!(gradients.len(), band.len());
        for &flat in band.indices() {
            let g = gradients.get(flat).unwrap();
            let above = grid.point(flat).z >= 0.013;
            assert_eq!(g.z > 0.0, above);
        }
        assert!(gradients.get(0).is_none());
    }

    #[test]
    fn test_band_covers_every_crossing_edge() {
        let grid = Grid::new(24).unwrap();
        let model = PlaneModel { offset: -0.2 };
        let cloud = empty_reference();
        let gate = DeviceGate::default();
        let oracle = BatchedOracle::new(&model, &cloud, &gate, 4096);

        let volume = coarse_pass(&grid, &oracle).unwrap();
        let band = select_narrow_band(&volume, 2.0 * grid.voxel_size()).unwrap();

        let n = grid.resolution();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n - 1 {
                    let a = grid.linearize(i, j, k);
                    let b = grid.linearize(i, j, k + 1);
                    let crosses = (grid.point(a).z < -0.2) != (grid.point(b).z < -0.2);
                    if crosses {
                        assert!(band.contains(a) || band.contains(b));
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_band_is_geometry_error() {
        let grid = Grid::new(4).unwrap();
        let volume = DistanceVolume::from_values(grid, vec![5.0; 64]).unwrap();
        let err = select_narrow_band(&volume, 0.1).unwrap_err();
        assert!(matches!(err, ReconError::EmptyNarrowBand { .. }));
        assert_eq!(err.code().as_str(), "RECON-3004");
    }

    #[test]
    fn test_negative_distance_rejected() {
        let grid = Grid::new(4).unwrap();
        let cloud = empty_reference();
        let gate = DeviceGate::default();
        let oracle = BatchedOracle::new(&NegativeModel, &cloud, &gate, 16);

        let err = coarse_pass(&grid, &oracle).unwrap_err();
        assert!(matches!(
            err,
            ReconError::InvalidDistance { index: 0, value } if value == -1.0
        ));
    }

    #[test]
    fn test_from_values_checks_length() {
        let grid = Grid::new(3).unwrap();
        assert!(DistanceVolume::from_values(grid, vec![0.0; 26]).is_err());
        assert!(DistanceVolume::from_values(grid, vec![f64::NAN; 27]).is_err());
        assert!(DistanceVolume::from_values(grid, vec![0.0; 27]).is_ok());
    }
}
