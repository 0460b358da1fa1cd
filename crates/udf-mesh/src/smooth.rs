//! Laplacian and Taubin mesh smoothing.
//!
//! Both use uniform (umbrella) weights over the one-ring of each vertex.
//! Taubin alternates a shrinking step (`lambda > 0`) with an inflating step
//! (`mu < 0`) so the surface keeps its volume.
//!
//! Boundary vertices stay fixed.

use hashbrown::HashSet;
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::error::{MeshError, MeshResult};
use crate::repair::{
    fix_non_manifold_edges, remove_degenerate_faces, remove_duplicate_faces,
    remove_unreferenced_vertices, weld_vertices,
};
use crate::Mesh;

/// Smoothing algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingAlgorithm {
    /// Uniform Laplacian (shrinks over many iterations).
    #[default]
    Laplacian,
    /// Taubin lambda/mu smoothing (volume preserving).
    Taubin,
}

impl std::str::FromStr for SmoothingAlgorithm {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "laplacian" => Ok(Self::Laplacian),
            "taubin" => Ok(Self::Taubin),
            other => Err(MeshError::invalid_parameter(
                "algorithm",
                format!("unknown smoothing algorithm '{other}', expected laplacian or taubin"),
            )),
        }
    }
}

/// Parameters for [`smooth_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothParams {
    /// Algorithm to run.
    pub algorithm: SmoothingAlgorithm,
    /// Number of iterations.
    pub iterations: u32,
    /// Shrink factor for each step.
    pub lambda: f64,
    /// Inflate factor for the Taubin step.
    pub mu: f64,
    /// Welding distance used by the cleanup before smoothing.
    pub weld_epsilon: f64,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            algorithm: SmoothingAlgorithm::Laplacian,
            iterations: 10,
            lambda: 0.5,
            mu: -0.53,
            weld_epsilon: 1e-9,
        }
    }
}

impl SmoothParams {
    /// Parameters for the given algorithm and iteration count, other fields default.
    pub fn new(algorithm: SmoothingAlgorithm, iterations: u32) -> Self {
        Self {
            algorithm,
            iterations,
            ..Self::default()
        }
    }

    fn validate(&self) -> MeshResult<()> {
        if !(self.lambda > 0.0 && self.lambda <= 1.0) {
            return Err(MeshError::invalid_parameter(
                "lambda",
                format!("must be in (0, 1], got {}", self.lambda),
            ));
        }
        if self.algorithm == SmoothingAlgorithm::Taubin && self.mu >= -self.lambda {
            return Err(MeshError::invalid_parameter(
                "mu",
                format!("must be below -lambda ({}), got {}", -self.lambda, self.mu),
            ));
        }
        Ok(())
    }
}

/// Summary of a smoothing run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmoothReport {
    /// Iterations performed.
    pub iterations: u32,
    /// Largest single-vertex displacement over the run.
    pub max_displacement: f64,
    /// Faces removed by the cleanup pass.
    pub faces_removed: usize,
    /// Vertices removed by the cleanup pass.
    pub vertices_removed: usize,
}

/// Clean the mesh, then smooth it in place.
///
/// Cleanup welds duplicate vertices, drops duplicate and degenerate faces,
/// resolves non-manifold edges, and compacts unreferenced vertices.
pub fn smooth_mesh(mesh: &mut Mesh, params: &SmoothParams) -> MeshResult<SmoothReport> {
    params.validate()?;
    if mesh.is_empty() {
        return Err(MeshError::empty_mesh("cannot smooth a mesh without faces"));
    }

    let (faces_before, vertices_before) = (mesh.face_count(), mesh.vertex_count());
    weld_vertices(mesh, params.weld_epsilon);
    remove_duplicate_faces(mesh);
    remove_degenerate_faces(mesh, 0.0);
    fix_non_manifold_edges(mesh);
    remove_unreferenced_vertices(mesh);

    let mut report = SmoothReport {
        iterations: params.iterations,
        faces_removed: faces_before - mesh.face_count(),
        vertices_removed: vertices_before - mesh.vertex_count(),
        ..SmoothReport::default()
    };

    let neighbors = vertex_neighbors(mesh);
    let pinned = boundary_vertices(mesh);

    for _ in 0..params.iterations {
        let step = match params.algorithm {
            SmoothingAlgorithm::Laplacian => laplacian_step(mesh, &neighbors, &pinned, params.lambda),
            SmoothingAlgorithm::Taubin => {
                let shrink = laplacian_step(mesh, &neighbors, &pinned, params.lambda);
                let inflate = laplacian_step(mesh, &neighbors, &pinned, params.mu);
                shrink.max(inflate)
            }
        };
        report.max_displacement = report.max_displacement.max(step);
    }

    info!(
        algorithm = ?params.algorithm,
        iterations = params.iterations,
        max_displacement = report.max_displacement,
        "Smoothed mesh"
    );

    Ok(report)
}

/// Apply one umbrella step with the given factor.
///
/// Returns the largest vertex displacement.
fn laplacian_step(
    mesh: &mut Mesh,
    neighbors: &[Vec<u32>],
    pinned: &HashSet<u32>,
    factor: f64,
) -> f64 {
    let displacements: Vec<Vector3<f64>> = mesh
        .vertices
        .par_iter()
        .enumerate()
        .map(|(i, vertex)| {
            let ring = &neighbors[i];
            if ring.is_empty() || pinned.contains(&(i as u32)) {
                return Vector3::zeros();
            }
            let sum: Vector3<f64> = ring
                .iter()
                .map(|&n| mesh.vertices[n as usize].position.coords)
                .sum();
            (sum / ring.len() as f64 - vertex.position.coords) * factor
        })
        .collect();

    let mut max_displacement = 0.0_f64;
    for (vertex, d) in mesh.vertices.iter_mut().zip(displacements) {
        max_displacement = max_displacement.max(d.norm());
        vertex.position.coords += d;
    }
    max_displacement
}

fn vertex_neighbors(mesh: &Mesh) -> Vec<Vec<u32>> {
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertex_count()];
    for face in &mesh.faces {
        for i in 0..3 {
            let v = face[i] as usize;
            for other in [face[(i + 1) % 3], face[(i + 2) % 3]] {
                if !neighbors[v].contains(&other) {
                    neighbors[v].push(other);
                }
            }
        }
    }
    debug!("Built one-ring neighbourhoods for {} vertices", neighbors.len());
    neighbors
}

fn boundary_vertices(mesh: &Mesh) -> HashSet<u32> {
    MeshAdjacency::build(&mesh.faces)
        .boundary_edges()
        .flat_map(|(a, b)| [a, b])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;

    /// Octahedron with one vertex pushed outward.
    fn spiky_octahedron() -> Mesh {
        let mut mesh = Mesh::new();
        for (x, y, z) in [
            (1.0, 0.0, 0.0),
            (-1.0, 0.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, -1.0, 0.0),
            (0.0, 0.0, 3.0),
            (0.0, 0.0, -1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
        mesh.faces.extend([
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ]);
        mesh
    }

    #[test]
    fn test_laplacian_pulls_spike_in() {
        let mut mesh = spiky_octahedron();
        let report = smooth_mesh(&mut mesh, &SmoothParams::new(SmoothingAlgorithm::Laplacian, 3))
            .expect("smooth");

        assert_eq!(report.iterations, 3);
        assert!(mesh.vertices[4].position.z < 3.0);
        assert!(report.max_displacement > 0.0);
    }

    #[test]
    fn test_taubin_shrinks_less_than_laplacian() {
        let mut laplacian = spiky_octahedron();
        let mut taubin = spiky_octahedron();
        smooth_mesh(&mut laplacian, &SmoothParams::new(SmoothingAlgorithm::Laplacian, 10))
            .expect("laplacian");
        smooth_mesh(&mut taubin, &SmoothParams::new(SmoothingAlgorithm::Taubin, 10))
            .expect("taubin");

        assert!(taubin.signed_volume().abs() > laplacian.signed_volume().abs());
    }

    #[test]
    fn test_boundary_vertices_are_pinned() {
        let mut mesh = spiky_octahedron();
        mesh.faces.truncate(4); // open pyramid
        let before: Vec<_> = (0..4).map(|i| mesh.vertices[i].position).collect();

        smooth_mesh(&mut mesh, &SmoothParams::new(SmoothingAlgorithm::Laplacian, 5))
            .expect("smooth");

        for (i, p) in before.iter().enumerate() {
            assert_eq!(mesh.vertices[i].position, *p);
        }
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut mesh = spiky_octahedron();
        let params = SmoothParams {
            lambda: 0.0,
            ..SmoothParams::default()
        };
        assert!(smooth_mesh(&mut mesh, &params).is_err());
        assert!(smooth_mesh(&mut Mesh::new(), &SmoothParams::default()).is_err());
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("Taubin".parse::<SmoothingAlgorithm>().ok(), Some(SmoothingAlgorithm::Taubin));
        assert!("bilateral".parse::<SmoothingAlgorithm>().is_err());
    }
}
