//! udf reconstruct command - point cloud to mesh on local files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use udf_mesh::PointCloud;
use udf_recon::{AnalyticSphereField, ReconConfig, ReconContext, Reconstructor};

use crate::{Cli, ModelKind, OutputFormat, output};

#[derive(Serialize)]
struct ReconstructResult {
    input: String,
    output: String,
    success: bool,
    model: String,
    resolution: usize,
    input_points: usize,
    had_normals: bool,
    output_vertices: usize,
    output_faces: usize,
    warnings: Vec<WarningInfo>,
    elapsed_ms: f64,
}

#[derive(Serialize)]
struct WarningInfo {
    code: &'static str,
    message: String,
}

/// Default output path: `<stem>_mesh.ply` next to the input.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cloud".to_string());
    input.with_file_name(format!("{stem}_mesh.ply"))
}

pub fn run(
    input: &Path,
    output_path: Option<&Path>,
    resolution: Option<usize>,
    model: ModelKind,
    config: ReconConfig,
    cli: &Cli,
) -> Result<()> {
    let output_path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output(input));
    let resolution = resolution.unwrap_or(config.default_resolution);

    let cloud = PointCloud::load(input)
        .with_context(|| format!("Failed to load point cloud from {:?}", input))?;

    let mut ctx = ReconContext::from_config(config);
    if let ModelKind::Sphere = model {
        ctx = ctx.with_model(Arc::new(AnalyticSphereField));
    }
    let model_name = ctx.model().name().to_string();
    let reconstructor = Reconstructor::new(Arc::new(ctx));

    output::info(
        &format!(
            "Reconstructing {} points at resolution {} ({} model)...",
            cloud.len(),
            resolution,
            model_name
        ),
        cli.format,
        cli.quiet,
    );

    let start = Instant::now();
    let mesh = reconstructor.reconstruct_cloud(&cloud, resolution)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    mesh.save(&output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    let result = ReconstructResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        success: true,
        model: model_name,
        resolution,
        input_points: cloud.len(),
        had_normals: cloud.has_normals(),
        output_vertices: mesh.vertex_count(),
        output_faces: mesh.face_count(),
        warnings: mesh
            .warnings
            .iter()
            .map(|w| WarningInfo {
                code: w.code(),
                message: w.to_string(),
            })
            .collect(),
        elapsed_ms,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Mesh saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} points{}",
                    "Input".cyan(),
                    result.input_points,
                    if result.had_normals { " with normals" } else { "" }
                );
                println!("  {}: {}", "Vertices".cyan(), result.output_vertices);
                println!("  {}: {}", "Faces".cyan(), result.output_faces);
                println!("  {}: {:.0} ms", "Time".cyan(), result.elapsed_ms);
                for warning in &result.warnings {
                    output::warning(
                        &format!("[{}] {}", warning.code, warning.message),
                        cli.format,
                        cli.quiet,
                    );
                }
            }
        }
    }

    Ok(())
}
