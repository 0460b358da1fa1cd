//! Batched access to an external distance-field model.
//!
//! The model is a pure function of a [`ReferenceCloud`] fixed for the
//! request. [`BatchedOracle`] chunks query sets at `max_batch`, scatters the
//! results back in input order, and retries a chunk once (split in halves)
//! when the device runs out of memory.

use std::sync::{Condvar, Mutex, PoisonError};

use kiddo::ImmutableKdTree;
use nalgebra::{Point3, Vector3};
use thiserror::Error;
use tracing::{debug, warn};
use udf_mesh::{PointCloud, log_progress};

use crate::error::{ReconError, ReconResult};

/// Errors reported by a distance-field model for one call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// The device could not hold the requested batch.
    #[error("device out of memory for {requested} points")]
    OutOfMemory { requested: usize },
    /// Any other device or model failure.
    #[error("{0}")]
    Failed(String),
}

/// Normalized input points with unit normals, immutable for a request.
pub struct ReferenceCloud {
    points: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
    kdtree: ImmutableKdTree<f64, 3>,
    centroid: Point3<f64>,
    mean_radius: f64,
}

impl ReferenceCloud {
    /// Build from a normalized cloud. Points without a normal get a zero
    /// normal, which models treat as unknown.
    pub fn new(cloud: &PointCloud) -> Self {
        let points: Vec<Point3<f64>> = cloud.positions().collect();
        let normals = cloud
            .points
            .iter()
            .map(|p| p.normal.unwrap_or_else(Vector3::zeros))
            .collect();
        let centroid = cloud.centroid().unwrap_or_else(Point3::origin);
        let mean_radius = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / points.len() as f64
        };

        Self {
            kdtree: cloud.kdtree(),
            points,
            normals,
            centroid,
            mean_radius,
        }
    }

    /// Number of reference points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the cloud has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Reference positions.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Unit normals, zero where unknown.
    #[inline]
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Kd-tree over the positions; items are point indices.
    #[inline]
    pub fn kdtree(&self) -> &ImmutableKdTree<f64, 3> {
        &self.kdtree
    }

    /// Centroid of the positions.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        self.centroid
    }

    /// Mean distance from the centroid.
    #[inline]
    pub fn mean_radius(&self) -> f64 {
        self.mean_radius
    }
}

impl std::fmt::Debug for ReferenceCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCloud")
            .field("points", &self.points.len())
            .field("centroid", &self.centroid)
            .field("mean_radius", &self.mean_radius)
            .finish_non_exhaustive()
    }
}

/// An unsigned distance-field model.
///
/// Implementations must return exactly one result per query point, in
/// query order.
pub trait DistanceFieldModel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Distances only.
    fn query_coarse(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<Vec<f64>, DeviceError>;

    /// Distances and gradients.
    fn query_refined(
        &self,
        cloud: &ReferenceCloud,
        points: &[Point3<f64>],
    ) -> Result<(Vec<f64>, Vec<Vector3<f64>>), DeviceError>;
}

/// Counting semaphore guarding device memory across concurrent requests.
#[derive(Debug)]
pub struct DeviceGate {
    available: Mutex<usize>,
    released: Condvar,
    permits: usize,
}

impl DeviceGate {
    /// Create a gate with the given number of permits (at least one).
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            available: Mutex::new(permits),
            released: Condvar::new(),
            permits,
        }
    }

    /// Total permits.
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is free. The permit is returned on drop.
    pub fn acquire(&self) -> DevicePermit<'_> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        DevicePermit { gate: self }
    }
}

impl Default for DeviceGate {
    fn default() -> Self {
        Self::new(1)
    }
}

/// A held device permit.
#[derive(Debug)]
pub struct DevicePermit<'a> {
    gate: &'a DeviceGate,
}

impl Drop for DevicePermit<'_> {
    fn drop(&mut self) {
        let mut available = self
            .gate
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.gate.released.notify_one();
    }
}

/// Query mode, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    Coarse,
    Refined,
}

impl QueryMode {
    fn label(self) -> &'static str {
        match self {
            QueryMode::Coarse => "coarse queries",
            QueryMode::Refined => "refined queries",
        }
    }
}

/// Results of one model call, appendable in query order.
trait BatchOutput: Sized {
    fn empty(capacity: usize) -> Self;
    /// The first length that differs from `expected`, or `expected`.
    fn actual_len(&self, expected: usize) -> usize;
    fn push_batch(&mut self, other: Self);
}

impl BatchOutput for Vec<f64> {
    fn empty(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn actual_len(&self, _expected: usize) -> usize {
        self.len()
    }

    fn push_batch(&mut self, other: Self) {
        self.extend(other);
    }
}

impl BatchOutput for (Vec<f64>, Vec<Vector3<f64>>) {
    fn empty(capacity: usize) -> Self {
        (Vec::with_capacity(capacity), Vec::with_capacity(capacity))
    }

    fn actual_len(&self, expected: usize) -> usize {
        if self.0.len() != expected {
            self.0.len()
        } else {
            self.1.len()
        }
    }

    fn push_batch(&mut self, other: Self) {
        self.0.extend(other.0);
        self.1.extend(other.1);
    }
}

/// Adapter that batches queries to a [`DistanceFieldModel`].
///
/// Holds no state across calls besides the reference cloud.
pub struct BatchedOracle<'a> {
    model: &'a dyn DistanceFieldModel,
    cloud: &'a ReferenceCloud,
    gate: &'a DeviceGate,
    max_batch: usize,
}

impl<'a> BatchedOracle<'a> {
    /// Create an adapter. `max_batch` is clamped to at least one.
    pub fn new(
        model: &'a dyn DistanceFieldModel,
        cloud: &'a ReferenceCloud,
        gate: &'a DeviceGate,
        max_batch: usize,
    ) -> Self {
        Self {
            model,
            cloud,
            gate,
            max_batch: max_batch.max(1),
        }
    }

    /// Largest chunk sent in one call.
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Number of batches needed for `count` queries.
    pub fn batch_count(&self, count: usize) -> usize {
        count.div_ceil(self.max_batch)
    }

    /// Coarse distances for a materialized query set.
    pub fn query_coarse(&self, points: &[Point3<f64>]) -> ReconResult<Vec<f64>> {
        self.query_coarse_with(points.len(), |i| points[i])
    }

    /// Coarse distances for `count` queries generated per batch.
    pub fn query_coarse_with(
        &self,
        count: usize,
        point_at: impl Fn(usize) -> Point3<f64>,
    ) -> ReconResult<Vec<f64>> {
        self.dispatch(QueryMode::Coarse, count, point_at, |points| {
            self.model.query_coarse(self.cloud, points)
        })
    }

    /// Refined distances and gradients for a materialized query set.
    pub fn query_refined(
        &self,
        points: &[Point3<f64>],
    ) -> ReconResult<(Vec<f64>, Vec<Vector3<f64>>)> {
        self.query_refined_with(points.len(), |i| points[i])
    }

    /// Refined distances and gradients for `count` queries generated per batch.
    pub fn query_refined_with(
        &self,
        count: usize,
        point_at: impl Fn(usize) -> Point3<f64>,
    ) -> ReconResult<(Vec<f64>, Vec<Vector3<f64>>)> {
        self.dispatch(QueryMode::Refined, count, point_at, |points| {
            self.model.query_refined(self.cloud, points)
        })
    }

    fn dispatch<R: BatchOutput>(
        &self,
        mode: QueryMode,
        count: usize,
        point_at: impl Fn(usize) -> Point3<f64>,
        query: impl Fn(&[Point3<f64>]) -> Result<R, DeviceError>,
    ) -> ReconResult<R> {
        let batches = self.batch_count(count);
        debug!(
            mode = ?mode,
            model = self.model.name(),
            total = count,
            batches = batches,
            max_batch = self.max_batch,
            "Dispatching oracle queries"
        );

        let mut output = R::empty(count);
        let mut points = Vec::with_capacity(self.max_batch.min(count));

        for batch_index in 0..batches {
            let start = batch_index * self.max_batch;
            let end = (start + self.max_batch).min(count);
            points.clear();
            points.extend((start..end).map(&point_at));

            output.push_batch(self.run_batch(batch_index, &points, &query)?);
            log_progress(mode.label(), batch_index + 1, batches);
        }

        Ok(output)
    }

    /// Run one chunk, splitting it once on device memory exhaustion.
    fn run_batch<R: BatchOutput>(
        &self,
        batch_index: usize,
        points: &[Point3<f64>],
        query: &impl Fn(&[Point3<f64>]) -> Result<R, DeviceError>,
    ) -> ReconResult<R> {
        match self.call(points, query) {
            Err(CallError::Device(DeviceError::OutOfMemory { requested })) if points.len() >= 2 => {
                warn!(
                    batch = batch_index,
                    points = points.len(),
                    requested = requested,
                    "Device out of memory, retrying batch in halves"
                );
                let (first, second) = points.split_at(points.len() / 2);
                let mut output = R::empty(points.len());
                for half in [first, second] {
                    let part = self
                        .call(half, query)
                        .map_err(|e| e.into_recon(batch_index))?;
                    output.push_batch(part);
                }
                Ok(output)
            }
            result => result.map_err(|e| e.into_recon(batch_index)),
        }
    }

    /// One model call under a device permit, with shape checking.
    fn call<R: BatchOutput>(
        &self,
        points: &[Point3<f64>],
        query: &impl Fn(&[Point3<f64>]) -> Result<R, DeviceError>,
    ) -> Result<R, CallError> {
        let result = {
            let _permit = self.gate.acquire();
            query(points).map_err(CallError::Device)?
        };
        let actual = result.actual_len(points.len());
        if actual != points.len() {
            return Err(CallError::Shape {
                expected: points.len(),
                actual,
            });
        }
        Ok(result)
    }
}

/// Failure of a single model call.
enum CallError {
    Device(DeviceError),
    Shape { expected: usize, actual: usize },
}

impl CallError {
    fn into_recon(self, batch_index: usize) -> ReconError {
        match self {
            CallError::Device(DeviceError::OutOfMemory { requested }) => ReconError::OutOfMemory {
                batch_index,
                requested,
            },
            CallError::Device(DeviceError::Failed(details)) => ReconError::DeviceFailure {
                batch_index,
                details,
            },
            CallError::Shape { expected, actual } => ReconError::ShapeMismatch {
                batch_index,
                expected,
                actual,
            },
        }
    }
}
