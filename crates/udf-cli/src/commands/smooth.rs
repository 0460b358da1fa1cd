//! udf smooth command - clean and smooth a mesh.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use udf_mesh::{Mesh, SmoothParams, SmoothingAlgorithm, smooth_mesh};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct SmoothResult {
    input: String,
    output: String,
    success: bool,
    algorithm: SmoothingAlgorithm,
    iterations: u32,
    max_displacement: f64,
    input_vertices: usize,
    input_faces: usize,
    output_vertices: usize,
    output_faces: usize,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    algorithm: SmoothingAlgorithm,
    iterations: u32,
    cli: &Cli,
) -> Result<()> {
    let mut mesh =
        Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let input_vertices = mesh.vertex_count();
    let input_faces = mesh.face_count();

    let report = smooth_mesh(&mut mesh, &SmoothParams::new(algorithm, iterations))
        .with_context(|| "Smoothing failed")?;

    mesh.save(output_path)
        .with_context(|| format!("Failed to save smoothed mesh to {:?}", output_path))?;

    let result = SmoothResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        success: true,
        algorithm,
        iterations: report.iterations,
        max_displacement: report.max_displacement,
        input_vertices,
        input_faces,
        output_vertices: mesh.vertex_count(),
        output_faces: mesh.face_count(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Smoothed mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {:?}, {} iterations",
                    "Algorithm".cyan(),
                    result.algorithm,
                    result.iterations
                );
                println!(
                    "  {}: {} → {} vertices",
                    "Vertices".cyan(),
                    result.input_vertices,
                    result.output_vertices
                );
                println!(
                    "  {}: {} → {} faces",
                    "Faces".cyan(),
                    result.input_faces,
                    result.output_faces
                );
                println!(
                    "  {}: {:.6}",
                    "Max displacement".cyan(),
                    result.max_displacement
                );
            }
        }
    }

    Ok(())
}
