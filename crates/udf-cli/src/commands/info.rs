//! udf info command - display mesh or point cloud statistics.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use udf_mesh::{ErrorCode, Mesh, PointCloud, PointCloudFormat};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FileInfo {
    Mesh {
        path: String,
        vertices: usize,
        faces: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounds: Option<BoundsInfo>,
        watertight: bool,
        boundary_edges: usize,
        non_manifold_edges: usize,
        euler_characteristic: i64,
        volume: f64,
        surface_area: f64,
    },
    PointCloud {
        path: String,
        points: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        bounds: Option<BoundsInfo>,
        has_normals: bool,
    },
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

impl BoundsInfo {
    fn new((min, max): (nalgebra::Point3<f64>, nalgebra::Point3<f64>)) -> Self {
        let dims = max - min;
        Self {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    }
}

fn mesh_info(input: &Path, mesh: &Mesh) -> FileInfo {
    let adjacency = mesh.adjacency();
    FileInfo::Mesh {
        path: input.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        bounds: mesh.bounds().map(BoundsInfo::new),
        watertight: adjacency.is_watertight(),
        boundary_edges: adjacency.boundary_edge_count(),
        non_manifold_edges: adjacency.non_manifold_edge_count(),
        euler_characteristic: adjacency.euler_characteristic(mesh.face_count()),
        volume: mesh.signed_volume(),
        surface_area: mesh.surface_area(),
    }
}

fn cloud_info(input: &Path, cloud: &PointCloud) -> FileInfo {
    FileInfo::PointCloud {
        path: input.display().to_string(),
        points: cloud.len(),
        bounds: cloud.bounds().map(BoundsInfo::new),
        has_normals: cloud.has_normals(),
    }
}

/// Inspect `input`. A PLY without faces is reported as a point cloud.
fn load_info(input: &Path) -> Result<FileInfo> {
    if PointCloudFormat::from_path(input) == Some(PointCloudFormat::Xyz) {
        let cloud = PointCloud::load(input)
            .with_context(|| format!("Failed to load point cloud from {:?}", input))?;
        return Ok(cloud_info(input, &cloud));
    }

    match Mesh::load(input) {
        Ok(mesh) if mesh.face_count() > 0 => Ok(mesh_info(input, &mesh)),
        Ok(_) => cloud_fallback(input),
        Err(e) if e.code() == ErrorCode::EmptyMesh => cloud_fallback(input),
        Err(e) => Err(e).with_context(|| format!("Failed to load mesh from {:?}", input)),
    }
}

fn cloud_fallback(input: &Path) -> Result<FileInfo> {
    let cloud = PointCloud::load(input)
        .with_context(|| format!("Failed to load point cloud from {:?}", input))?;
    Ok(cloud_info(input, &cloud))
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let info = load_info(input)?;

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                print_text(&info);
            }
        }
    }

    Ok(())
}

fn print_text(info: &FileInfo) {
    match info {
        FileInfo::Mesh {
            path,
            vertices,
            faces,
            bounds,
            watertight,
            boundary_edges,
            non_manifold_edges,
            euler_characteristic,
            volume,
            surface_area,
        } => {
            println!("{}", "Mesh Information".bold().underline());
            println!("  {}: {}", "File".cyan(), path);
            println!("  {}: {}", "Vertices".cyan(), vertices);
            println!("  {}: {}", "Faces".cyan(), faces);
            print_bounds(bounds.as_ref());
            let closed = if *watertight {
                "yes".green()
            } else {
                "no".yellow()
            };
            println!("  {}: {}", "Watertight".cyan(), closed);
            if *boundary_edges > 0 {
                println!("  {}: {}", "Boundary edges".cyan(), boundary_edges);
            }
            if *non_manifold_edges > 0 {
                println!("  {}: {}", "Non-manifold edges".cyan(), non_manifold_edges);
            }
            println!("  {}: {}", "Euler characteristic".cyan(), euler_characteristic);
            println!("  {}: {:.6}", "Volume".cyan(), volume);
            println!("  {}: {:.6}", "Surface area".cyan(), surface_area);
        }
        FileInfo::PointCloud {
            path,
            points,
            bounds,
            has_normals,
        } => {
            println!("{}", "Point Cloud Information".bold().underline());
            println!("  {}: {}", "File".cyan(), path);
            println!("  {}: {}", "Points".cyan(), points);
            print_bounds(bounds.as_ref());
            println!(
                "  {}: {}",
                "Has normals".cyan(),
                if *has_normals { "yes" } else { "no" }
            );
        }
    }
}

fn print_bounds(bounds: Option<&BoundsInfo>) {
    let Some(b) = bounds else {
        return;
    };
    println!(
        "  {}: {:.4} x {:.4} x {:.4}",
        "Dimensions".cyan(),
        b.dimensions[0],
        b.dimensions[1],
        b.dimensions[2]
    );
    println!(
        "  {}: ({:.4}, {:.4}, {:.4})",
        "Min bounds".cyan(),
        b.min[0],
        b.min[1],
        b.min[2]
    );
    println!(
        "  {}: ({:.4}, {:.4}, {:.4})",
        "Max bounds".cyan(),
        b.max[0],
        b.max[1],
        b.max[2]
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_faceless_ply_reported_as_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        PointCloud::from_positions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ])
        .save(&path)
        .unwrap();

        match load_info(&path).unwrap() {
            FileInfo::PointCloud {
                points, bounds, ..
            } => {
                assert_eq!(points, 3);
                assert_eq!(bounds.unwrap().dimensions, [1.0, 2.0, 0.0]);
            }
            FileInfo::Mesh { .. } => panic!("expected a point cloud"),
        }
    }

    #[test]
    fn test_mesh_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tet.ply");
        let mesh = Mesh::from_parts(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        );
        mesh.save(&path).unwrap();

        match load_info(&path).unwrap() {
            FileInfo::Mesh {
                faces,
                watertight,
                euler_characteristic,
                volume,
                ..
            } => {
                assert_eq!(faces, 4);
                assert!(watertight);
                assert_eq!(euler_characteristic, 2);
                assert!((volume - 1.0 / 6.0).abs() < 1e-6);
            }
            FileInfo::PointCloud { .. } => panic!("expected a mesh"),
        }
    }
}
