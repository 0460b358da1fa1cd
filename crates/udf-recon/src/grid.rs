//! Regular sampling grid over the normalized cube.

use nalgebra::Point3;
use tracing::debug;

use crate::config::ReconConfig;
use crate::error::{ReconError, ReconResult};

/// Bytes held per grid point during a request: f64 distance, band flag, side.
const BYTES_PER_POINT: u64 = 10;

/// Bytes held per narrow band point: flat index plus gradient.
const BYTES_PER_BAND_POINT: u64 = 32;

/// N³ sample points over a cube of side `size` centered at the origin.
///
/// Points are addressed by a flat index `(i * N + j) * N + k`, with `i`
/// along x and `k` along z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    n: usize,
    size: f64,
    voxel_size: f64,
}

impl Grid {
    /// Create a grid of resolution `n` over the default cube side of 1.05.
    pub fn new(n: usize) -> ReconResult<Self> {
        Self::with_size(n, ReconConfig::default().grid_size)
    }

    /// Create a grid of resolution `n` over a cube of side `size`.
    pub fn with_size(n: usize, size: f64) -> ReconResult<Self> {
        if n < 2 {
            return Err(ReconError::UnsupportedResolution {
                resolution: n,
                supported: Vec::new(),
            });
        }
        let grid = Self {
            n,
            size,
            voxel_size: size / (n - 1) as f64,
        };
        debug!(
            resolution = n,
            total = grid.len(),
            voxel_size = grid.voxel_size,
            "Created sampling grid"
        );
        Ok(grid)
    }

    /// Points per axis.
    #[inline]
    pub fn resolution(&self) -> usize {
        self.n
    }

    /// Cube side.
    #[inline]
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Spacing between neighbouring points, equal on all axes.
    #[inline]
    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Total number of grid points.
    #[inline]
    pub fn len(&self) -> usize {
        self.n * self.n * self.n
    }

    /// Always false; a grid has at least 8 points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of cells, `(N - 1)³`.
    #[inline]
    pub fn cell_count(&self) -> usize {
        let c = self.n - 1;
        c * c * c
    }

    /// Convert axis indices to a flat index.
    #[inline]
    pub fn linearize(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.n + j) * self.n + k
    }

    /// Convert a flat index to axis indices.
    #[inline]
    pub fn delinearize(&self, flat: usize) -> [usize; 3] {
        let k = flat % self.n;
        let ij = flat / self.n;
        [ij / self.n, ij % self.n, k]
    }

    /// Coordinate of index `idx` on any axis.
    #[inline]
    pub fn coord(&self, idx: usize) -> f64 {
        idx as f64 * self.voxel_size - self.size / 2.0
    }

    /// Position of a grid point.
    #[inline]
    pub fn point(&self, flat: usize) -> Point3<f64> {
        let [i, j, k] = self.delinearize(flat);
        self.point_at(i, j, k)
    }

    /// Position of the grid point at axis indices.
    #[inline]
    pub fn point_at(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(self.coord(i), self.coord(j), self.coord(k))
    }

    /// Iterate over all points in flat-index order.
    pub fn points(&self) -> impl ExactSizeIterator<Item = Point3<f64>> + '_ {
        (0..self.len()).map(move |flat| self.point(flat))
    }

    /// All points in flat-index order, materialized.
    pub fn sample_points(&self) -> Vec<Point3<f64>> {
        self.points().collect()
    }

    /// Bounding box `[-size/2, size/2]³`.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let h = self.size / 2.0;
        (Point3::new(-h, -h, -h), Point3::new(h, h, h))
    }

    /// Flat indices of the up to six face neighbours of a point.
    pub fn neighbors6(&self, flat: usize) -> impl Iterator<Item = usize> + '_ {
        let [i, j, k] = self.delinearize(flat);
        let n = self.n;
        let stride = [n * n, n, 1];
        [i, j, k]
            .into_iter()
            .enumerate()
            .flat_map(move |(axis, idx)| {
                let down = (idx > 0).then(|| flat - stride[axis]);
                let up = (idx + 1 < n).then(|| flat + stride[axis]);
                down.into_iter().chain(up)
            })
    }

    /// Flat indices of the points in the 3×3×3 block around a point,
    /// excluding the point itself, in ascending order.
    pub fn neighbors26(&self, flat: usize) -> impl Iterator<Item = usize> + '_ {
        let [i, j, k] = self.delinearize(flat);
        let span = move |c: usize| c.saturating_sub(1)..=(c + 1).min(self.n - 1);
        span(i).flat_map(move |a| {
            span(j).flat_map(move |b| {
                span(k)
                    .map(move |c| self.linearize(a, b, c))
                    .filter(move |&other| other != flat)
            })
        })
    }

    /// Estimated peak memory for a request at resolution `n`.
    ///
    /// The band estimate assumes a shell four voxels thick over six cube
    /// faces, an upper bound for surfaces that fit the normalized cube.
    pub fn estimated_bytes(n: usize) -> u64 {
        let n = n as u64;
        let dense = n * n * n * BYTES_PER_POINT;
        let band = 24 * n * n * BYTES_PER_BAND_POINT;
        dense + band
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_counts() {
        let grid = Grid::new(8).unwrap();
        assert_eq!(grid.len(), 512);
        assert_eq!(grid.cell_count(), 343);
        assert_eq!(grid.points().len(), 512);
    }

    #[test]
    fn test_linearize_roundtrip() {
        let grid = Grid::new(5).unwrap();
        for flat in 0..grid.len() {
            let [i, j, k] = grid.delinearize(flat);
            assert_eq!(grid.linearize(i, j, k), flat);
        }
        assert_eq!(grid.linearize(1, 0, 0), 25);
        assert_eq!(grid.linearize(0, 1, 0), 5);
        assert_eq!(grid.linearize(0, 0, 1), 1);
    }

    #[test]
    fn test_bounds_and_spacing() {
        let grid = Grid::new(128).unwrap();
        let (min, max) = grid.bounds();
        assert_eq!(min, Point3::new(-0.525, -0.525, -0.525));
        assert_eq!(grid.point(0), min);
        assert!((grid.point(grid.len() - 1) - max).norm() < 1e-12);
        assert!((grid.voxel_size() - 1.05 / 127.0).abs() < 1e-15);
    }

    #[test]
    fn test_sample_points_follow_flat_order() {
        let grid = Grid::with_size(3, 2.0).unwrap();
        let points = grid.sample_points();
        assert_eq!(points.len(), 27);
        assert_eq!(points[grid.linearize(2, 0, 1)], Point3::new(1.0, -1.0, 0.0));
        for (flat, p) in points.iter().enumerate() {
            assert_eq!(*p, grid.point(flat));
        }
    }

    #[test]
    fn test_resolution_below_two_rejected() {
        assert!(Grid::new(1).is_err());
        assert!(Grid::new(2).is_ok());
    }

    #[test]
    fn test_neighbors() {
        let grid = Grid::new(4).unwrap();
        assert_eq!(grid.neighbors6(0).count(), 3);
        assert_eq!(grid.neighbors6(grid.linearize(1, 1, 1)).count(), 6);
        assert_eq!(grid.neighbors26(0).count(), 7);

        let center = grid.linearize(1, 2, 1);
        let around: Vec<usize> = grid.neighbors26(center).collect();
        assert_eq!(around.len(), 26);
        assert!(around.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_memory_estimate_grows_cubically() {
        assert!(Grid::estimated_bytes(192) > 3 * Grid::estimated_bytes(128));
        assert!(Grid::estimated_bytes(128) < 2 * 1024 * 1024 * 1024);
    }
}
