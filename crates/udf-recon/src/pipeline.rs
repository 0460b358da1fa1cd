//! Request driver: validation, the sampling pipeline, and persistence.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span};
use udf_mesh::{
    Mesh, OperationTimer, PointCloud, PointCloudFormat, SmoothParams, log_mesh_stats,
    smooth_mesh,
};
use uuid::Uuid;

use crate::context::ReconContext;
use crate::error::{ReconError, ReconResult};
use crate::extract::{Isosurface, extract_isosurface};
use crate::finalize::{FinalMesh, finalize};
use crate::grid::Grid;
use crate::oracle::ReferenceCloud;
use crate::passes::{coarse_pass, refined_pass, select_narrow_band};
use crate::request::{ReconRequest, ReconResponse, SmoothRequest};
use crate::transform::ScaleTransform;

/// Fewest points a cloud may have.
pub const MIN_CLOUD_POINTS: usize = 4;

/// Reject clouds that cannot span a surface and return their transform.
///
/// Checks, in order: at least [`MIN_CLOUD_POINTS`] points, finite
/// coordinates, non-zero extent.
pub fn check_cloud(cloud: &PointCloud) -> ReconResult<ScaleTransform> {
    if cloud.len() < MIN_CLOUD_POINTS {
        return Err(ReconError::TooFewPoints {
            count: cloud.len(),
            min: MIN_CLOUD_POINTS,
        });
    }
    if let Some(index) = cloud
        .positions()
        .position(|p| !p.coords.iter().all(|c| c.is_finite()))
    {
        return Err(ReconError::NonFiniteCoordinate { index });
    }
    ScaleTransform::from_cloud(cloud)
}

/// Fail if a grid at `resolution` would not fit in `budget` bytes.
///
/// Returns the estimate.
pub fn check_memory_budget(resolution: usize, budget: u64) -> ReconResult<u64> {
    let required = Grid::estimated_bytes(resolution);
    if required > budget {
        return Err(ReconError::MemoryBudgetExceeded {
            resolution,
            required,
            budget,
        });
    }
    Ok(required)
}

/// Format of a source reference, from its extension.
pub fn check_source_extension(reference: &str) -> ReconResult<PointCloudFormat> {
    let path = Path::new(reference);
    PointCloudFormat::from_path(path).ok_or_else(|| ReconError::UnsupportedExtension {
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}

/// Coarse pass, band selection, refined pass and extraction over a
/// normalized reference cloud.
pub fn reconstruct_normalized(
    ctx: &ReconContext,
    reference: &ReferenceCloud,
    grid: &Grid,
) -> ReconResult<Isosurface> {
    let oracle = ctx.oracle(reference);
    let mut volume = coarse_pass(grid, &oracle)?;
    let band = select_narrow_band(&volume, ctx.config().band_threshold(grid.voxel_size()))?;
    let gradients = refined_pass(&mut volume, &band, &oracle)?;
    extract_isosurface(&volume, &band, &gradients)
}

/// Runs reconstruction and smoothing requests against a shared context.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    ctx: Arc<ReconContext>,
}

impl Reconstructor {
    pub fn new(ctx: Arc<ReconContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ReconContext {
        &self.ctx
    }

    /// Reconstruct a mesh from an in-memory cloud, without storage.
    ///
    /// `resolution` only needs to be at least 2; the supported set is
    /// enforced by [`Reconstructor::handle`].
    pub fn reconstruct_cloud(&self, cloud: &PointCloud, resolution: usize) -> ReconResult<FinalMesh> {
        let _timer = OperationTimer::with_items("reconstruct", cloud.len());
        let config = self.ctx.config();

        let transform = check_cloud(cloud)?;
        let required = check_memory_budget(resolution, config.memory_budget_bytes)?;
        let grid = Grid::with_size(resolution, config.grid_size)?;

        let normalized = transform.normalize_cloud(cloud);
        let normalized = if normalized.has_normals() {
            normalized
        } else {
            normalized.with_estimated_normals(config.normal_neighbors)?
        };
        info!(
            points = cloud.len(),
            dims = resolution,
            model = self.ctx.model().name(),
            estimated_bytes = required,
            "Starting reconstruction"
        );

        let reference = ReferenceCloud::new(&normalized);
        let surface = reconstruct_normalized(&self.ctx, &reference, &grid)?;
        Ok(finalize(surface.mesh, &transform, config))
    }

    /// Run a reconstruction request end to end.
    ///
    /// Nothing is uploaded unless every step succeeds.
    pub fn handle(&self, request: &ReconRequest) -> ReconResult<ReconResponse> {
        let span = info_span!("recon_request", source = %request.source_cloud_reference);
        let _guard = span.enter();
        let config = self.ctx.config();

        let resolution = request.resolution.unwrap_or(config.default_resolution);
        if !config.supported_resolutions.contains(&resolution) {
            return Err(ReconError::UnsupportedResolution {
                resolution,
                supported: config.supported_resolutions.clone(),
            });
        }
        check_source_extension(&request.source_cloud_reference)?;

        let local = self.ctx.store().download(&request.source_cloud_reference)?;
        let cloud = PointCloud::load(&local)?;
        let mesh = self.reconstruct_cloud(&cloud, resolution)?;

        let mesh_reference = self.persist(|path| mesh.save(path))?;
        info!(
            mesh_reference = %mesh_reference,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Reconstruction complete"
        );

        Ok(ReconResponse {
            mesh_reference,
            warnings: mesh.warnings,
        })
    }

    /// Smooth a stored mesh and store the result.
    pub fn smooth(&self, request: &SmoothRequest) -> ReconResult<ReconResponse> {
        let span = info_span!("smooth_request", source = %request.source_mesh_reference);
        let _guard = span.enter();

        let local = self.ctx.store().download(&request.source_mesh_reference)?;
        let mut mesh = Mesh::load(&local)?;
        let params = SmoothParams::new(request.algorithm, request.iterations);
        let report = smooth_mesh(&mut mesh, &params)?;
        log_mesh_stats(&mesh, "smoothed");
        info!(
            algorithm = ?request.algorithm,
            iterations = report.iterations,
            max_displacement = report.max_displacement,
            "Smoothing complete"
        );

        let mesh_reference = self.persist(|path| mesh.save(path))?;
        Ok(ReconResponse {
            mesh_reference,
            warnings: Vec::new(),
        })
    }

    /// Write through `save` into a uniquely named PLY in a scratch
    /// directory and upload it.
    fn persist(
        &self,
        save: impl FnOnce(&Path) -> udf_mesh::MeshResult<()>,
    ) -> ReconResult<String> {
        let scratch = tempfile::tempdir().map_err(|source| ReconError::UploadFailed {
            path: std::env::temp_dir(),
            source,
        })?;
        let path = scratch.path().join(format!("{}.ply", Uuid::new_v4()));
        save(&path)?;
        self.ctx.store().upload(&path)
    }
}
