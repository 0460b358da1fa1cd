//! Triangle mesh and point cloud utilities for surface reconstruction.
//!
//! This crate holds the geometry that sits on either side of the
//! reconstruction pipeline in `udf-recon`: the reference point clouds fed to
//! the distance-field model, and the triangle meshes that come out of
//! marching cubes and get cleaned up before export.
//!
//! # Features
//!
//! - **File I/O**: PLY meshes, PLY and XYZ point clouds
//! - **Repair**: duplicate and degenerate removal, welding, hole filling, outward orientation
//! - **Analysis**: edge adjacency, watertightness, Euler characteristic, signed volume
//! - **Smoothing**: Laplacian and Taubin
//!
//! # Coordinate System
//!
//! Right-handed. Face winding is **counter-clockwise when viewed from
//! outside**, so normals point outward by the right-hand rule.
//!
//! # Quick Start
//!
//! ```no_run
//! use udf_mesh::{Mesh, SmoothParams, SmoothingAlgorithm, smooth_mesh};
//!
//! let mut mesh = Mesh::load("reconstruction.ply").unwrap();
//! let report = smooth_mesh(&mut mesh, &SmoothParams::new(SmoothingAlgorithm::Taubin, 20)).unwrap();
//! println!("max displacement {:.4}", report.max_displacement);
//! mesh.save("smoothed.ply").unwrap();
//! ```
//!
//! ```no_run
//! use udf_mesh::PointCloud;
//!
//! let cloud = PointCloud::load("scan.xyz").unwrap();
//! let with_normals = cloud.with_estimated_normals(16).unwrap();
//! with_normals.save("scan_normals.ply").unwrap();
//! ```

pub mod adjacency;
pub mod error;
pub mod holes;
pub mod io;
pub mod pointcloud;
pub mod repair;
pub mod smooth;
pub mod tracing_ext;
mod types;

pub use adjacency::MeshAdjacency;
pub use error::{ErrorCode, MeshError, MeshLocation, MeshResult, RecoverySuggestion};
pub use holes::{BoundaryLoop, HoleFillReport, detect_holes, fill_holes_with_max_edges};
pub use io::{PlyEncoding, load_ply, save_ply};
pub use pointcloud::{CloudPoint, PointCloud, PointCloudFormat};
pub use repair::{
    compute_vertex_normals, fix_non_manifold_edges, orient_outward, remove_degenerate_faces,
    remove_duplicate_faces, remove_unreferenced_vertices, weld_vertices,
};
pub use smooth::{SmoothParams, SmoothReport, SmoothingAlgorithm, smooth_mesh};
pub use tracing_ext::{OperationTimer, log_mesh_stats, log_progress};
pub use types::{Mesh, Triangle, Vertex};

// Convenience methods on Mesh
impl Mesh {
    /// Load a mesh from a PLY file.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_ply(path.as_ref())
    }

    /// Save the mesh as binary PLY.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        io::save_ply(self, path.as_ref(), PlyEncoding::Binary)
    }

    /// Build the edge adjacency for this mesh.
    pub fn adjacency(&self) -> MeshAdjacency {
        MeshAdjacency::build(&self.faces)
    }

    /// True when every edge is shared by exactly two faces.
    pub fn is_watertight(&self) -> bool {
        self.adjacency().is_watertight()
    }

    /// Euler characteristic `V - E + F` over referenced vertices.
    pub fn euler_characteristic(&self) -> i64 {
        self.adjacency().euler_characteristic(self.face_count())
    }
}
