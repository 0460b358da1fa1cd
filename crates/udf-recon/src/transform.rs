//! Normalization of input clouds into the unit cube and back.

use nalgebra::{Point3, Vector3};
use udf_mesh::{CloudPoint, PointCloud};

use crate::error::{ReconError, ReconResult};

/// Uniform scale and translation taking a cloud's bounding box into the
/// unit cube centered at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    /// Center of the bounding box.
    pub center: Vector3<f64>,
    /// Largest extent of the bounding box.
    pub scale: f64,
}

impl ScaleTransform {
    /// Build from bounding box corners.
    pub fn from_bounds(min: Point3<f64>, max: Point3<f64>) -> ReconResult<Self> {
        let extent = max - min;
        let scale = extent.x.max(extent.y).max(extent.z);
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(ReconError::ZeroExtent);
        }
        Ok(Self {
            center: (max.coords + min.coords) / 2.0,
            scale,
        })
    }

    /// Build from a cloud's bounding box.
    pub fn from_cloud(cloud: &PointCloud) -> ReconResult<Self> {
        let (min, max) = cloud.bounds().ok_or(ReconError::TooFewPoints {
            count: 0,
            min: crate::pipeline::MIN_CLOUD_POINTS,
        })?;
        Self::from_bounds(min, max)
    }

    /// Map a point into normalized coordinates.
    #[inline]
    pub fn normalize(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from((p.coords - self.center) / self.scale)
    }

    /// Map a normalized point back to original coordinates.
    #[inline]
    pub fn rescale(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(p.coords * self.scale + self.center)
    }

    /// Normalize every point of a cloud. Normals are unchanged by a uniform
    /// scale and are carried over.
    pub fn normalize_cloud(&self, cloud: &PointCloud) -> PointCloud {
        PointCloud {
            points: cloud
                .points
                .iter()
                .map(|p| CloudPoint {
                    position: self.normalize(&p.position),
                    normal: p.normal,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_bounds_fit_unit_cube() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(10.0, 0.0, -2.0),
            Point3::new(14.0, 1.0, -1.0),
            Point3::new(12.0, 2.0, 0.0),
        ]);
        let transform = ScaleTransform::from_cloud(&cloud).unwrap();
        assert_eq!(transform.scale, 4.0);
        assert_eq!(transform.center, Vector3::new(12.0, 1.0, -1.0));

        let normalized = transform.normalize_cloud(&cloud);
        let (min, max) = normalized.bounds().unwrap();
        assert_eq!(min.x, -0.5);
        assert_eq!(max.x, 0.5);
        assert!(min.y >= -0.5 && max.z <= 0.5);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(matches!(
            ScaleTransform::from_bounds(p, p),
            Err(ReconError::ZeroExtent)
        ));
    }

    #[test]
    fn test_rescale_inverts_normalize() {
        let transform = ScaleTransform::from_bounds(
            Point3::new(-3.0, 2.0, 5.0),
            Point3::new(7.0, 4.0, 6.0),
        )
        .unwrap();
        let p = Point3::new(0.3, 3.3, 5.9);
        assert!((transform.rescale(&transform.normalize(&p)) - p).norm() < 1e-12);
    }
}
