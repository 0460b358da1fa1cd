//! Surface reconstruction from point clouds via narrow-band unsigned
//! distance fields.
//!
//! A distance-field model answers "how far is this point from the surface"
//! for a fixed reference cloud. This crate samples it on a regular grid,
//! refines the samples near the surface with gradients, recovers an
//! inside/outside labelling from those gradients and runs marching cubes.
//!
//! # Pipeline
//!
//! 1. Normalize the cloud into the unit cube ([`ScaleTransform`])
//! 2. Query every grid point for its coarse distance ([`coarse_pass`])
//! 3. Keep the points within two voxels of the surface ([`select_narrow_band`])
//! 4. Re-query those with gradients ([`refined_pass`])
//! 5. Label sides and triangulate ([`extract_isosurface`])
//! 6. Rescale and repair ([`finalize`])
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use udf_mesh::PointCloud;
//! use udf_recon::{ReconConfig, ReconContext, Reconstructor};
//!
//! let ctx = Arc::new(ReconContext::from_config(ReconConfig::default()));
//! let reconstructor = Reconstructor::new(ctx);
//!
//! let cloud = PointCloud::load("scan.ply").unwrap();
//! let mesh = reconstructor.reconstruct_cloud(&cloud, 128).unwrap();
//! for warning in &mesh.warnings {
//!     println!("{}: {}", warning.code(), warning);
//! }
//! mesh.save("scan_mesh.ply").unwrap();
//! ```
//!
//! # Requests
//!
//! [`Reconstructor::handle`] runs a [`ReconRequest`] against the context's
//! [`MeshStore`]: download, reconstruct, write a uniquely named PLY and
//! upload it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use udf_recon::{ReconConfig, ReconContext, ReconRequest, Reconstructor};
//!
//! let config = ReconConfig::from_toml_file("udf.toml").unwrap();
//! let reconstructor = Reconstructor::new(Arc::new(ReconContext::from_config(config)));
//!
//! let request = ReconRequest::from_json(r#"{"file_path": "clouds/chair.xyz", "res": 192}"#).unwrap();
//! let response = reconstructor.handle(&request).unwrap();
//! println!("{}", response.mesh_reference);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod field;
pub mod finalize;
pub mod grid;
pub mod oracle;
pub mod passes;
pub mod pipeline;
pub mod request;
pub mod store;
pub mod transform;

pub use config::{ConfigError, ReconConfig};
pub use context::{PointUpsampler, ReconContext};
pub use error::{
    ErrorCategory, ReconError, ReconErrorCode, ReconRecoverySuggestion, ReconResult,
    RepairWarning,
};
pub use extract::{
    ExtractStats, Isosurface, SignField, extract_isosurface, infer_signs, processed_cells,
};
pub use field::{AnalyticSphereField, PointCloudField};
pub use finalize::{FinalMesh, finalize};
pub use grid::Grid;
pub use oracle::{
    BatchedOracle, DeviceError, DeviceGate, DevicePermit, DistanceFieldModel, ReferenceCloud,
};
pub use passes::{
    DistanceVolume, GradientVolume, NarrowBand, coarse_pass, refined_pass, select_narrow_band,
};
pub use pipeline::{
    MIN_CLOUD_POINTS, Reconstructor, check_cloud, check_memory_budget, check_source_extension,
    reconstruct_normalized,
};
pub use request::{ErrorResponse, ReconRequest, ReconResponse, SmoothRequest};
pub use store::{LocalStore, MeshStore, UPLOAD_PREFIX};
pub use transform::ScaleTransform;
