//! Reference distance-field models.
//!
//! [`PointCloudField`] estimates the unsigned distance to the surface
//! sampled by the reference cloud from its oriented points.
//! [`AnalyticSphereField`] is the exact distance to the sphere best fitting
//! the cloud, for tests and demos.

use kiddo::SquaredEuclidean;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::oracle::{DeviceError, DistanceFieldModel, ReferenceCloud};

/// Below this length a summed normal is treated as cancelled out.
const NORMAL_EPSILON: f64 = 1e-9;

/// Unsigned distance from Gaussian-weighted point-to-plane estimates.
///
/// For a query `p` with reference neighbours `xᵢ` and normals `nᵢ`:
///
/// ```text
/// f(p) = Σ wᵢ nᵢ·(p - xᵢ) / Σ wᵢ,   wᵢ = exp(-|p - xᵢ|² / σ²)
/// ```
///
/// where `σ` is the distance to the farthest of the `k` neighbours. The
/// distance is `|f|` and the gradient `sign(f) · normalize(Σ wᵢ nᵢ)`. Where
/// the normals cancel (or are unknown) the nearest-point distance and
/// direction are used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointCloudField {
    neighbors: usize,
}

impl PointCloudField {
    /// Create a field averaging over `neighbors` reference points.
    pub fn new(neighbors: usize) -> Self {
        Self {
            neighbors: neighbors.max(1),
        }
    }

    /// Neighbours per query.
    pub fn neighbors(&self) -> usize {
        self.neighbors
    }

    fn evaluate(&self, cloud: &ReferenceCloud, p: &Point3<f64>) -> (f64, Vector3<f64>) {
        let query: [f64; 3] = p.coords.into();
        let k = self.neighbors.min(cloud.len());
        let nearest = cloud.kdtree().nearest_n::<SquaredEuclidean>(&query, k);

        let (Some(first), Some(last)) = (nearest.first(), nearest.last()) else {
            return (f64::INFINITY, Vector3::z());
        };
        let closest = cloud.points()[first.item as usize];
        let sigma_sq = last.distance.max(1e-12);

        let mut weight_sum = 0.0;
        let mut plane_sum = 0.0;
        let mut normal_sum = Vector3::zeros();
        for neighbor in &nearest {
            let idx = neighbor.item as usize;
            let w = (-neighbor.distance / sigma_sq).exp();
            let n = cloud.normals()[idx];
            weight_sum += w;
            plane_sum += w * n.dot(&(p - cloud.points()[idx]));
            normal_sum += w * n;
        }

        let normal_len = normal_sum.norm();
        if normal_len < NORMAL_EPSILON * weight_sum.max(1.0) {
            return (first.distance.sqrt(), direction_from(&closest, p));
        }

        let f = plane_sum / weight_sum;
        let sign = if f < 0.0 { -1.0 } else { 1.0 };
        (f.abs(), normal_sum * (sign / normal_len))
    }
}

impl Default for PointCloudField {
    fn default() -> Self {
        Self::new(8)
    }
}

impl DistanceFieldModel for PointCloudField {
    fn name(&self) -> &str {
        "pointcloud"
    }

    fn query_coarse(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<Vec<f64>, DeviceError> {
        ensure_reference(cloud)?;
        Ok(points
            .par_iter()
            .map(|p| self.evaluate(cloud, p).0)
            .collect())
    }

    fn query_refined(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<(Vec<f64>, Vec<Vector3<f64>>), DeviceError> {
        ensure_reference(cloud)?;
        Ok(points
            .par_iter()
            .map(|p| self.evaluate(cloud, p))
            .unzip())
    }
}

/// Exact unsigned distance to the sphere through the cloud's centroid and
/// mean radius.
///
/// The gradient points away from the sphere on both sides: outward outside
/// it, toward the center inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyticSphereField;

impl AnalyticSphereField {
    fn evaluate(cloud: &ReferenceCloud, p: &Point3<f64>) -> (f64, Vector3<f64>) {
        let center = cloud.centroid();
        let offset = p - center;
        let r = offset.norm();
        let signed = r - cloud.mean_radius();
        let radial = if r > 1e-12 { offset / r } else { Vector3::z() };
        let sign = if signed < 0.0 { -1.0 } else { 1.0 };
        (signed.abs(), radial * sign)
    }
}

impl DistanceFieldModel for AnalyticSphereField {
    fn name(&self) -> &str {
        "sphere"
    }

    fn query_coarse(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<Vec<f64>, DeviceError> {
        ensure_reference(cloud)?;
        Ok(points.iter().map(|p| Self::evaluate(cloud, p).0).collect())
    }

    fn query_refined(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<(Vec<f64>, Vec<Vector3<f64>>), DeviceError> {
        ensure_reference(cloud)?;
        Ok(points.iter().map(|p| Self::evaluate(cloud, p)).unzip())
    }
}

fn ensure_reference(cloud: &ReferenceCloud) -> Result<(), DeviceError> {
    if cloud.is_empty() {
        return Err(DeviceError::Failed("reference cloud is empty".to_string()));
    }
    Ok(())
}

fn direction_from(origin: &Point3<f64>, p: &Point3<f64>) -> Vector3<f64> {
    let v = p - origin;
    let len = v.norm();
    if len > 1e-12 { v / len } else { Vector3::z() }
}
