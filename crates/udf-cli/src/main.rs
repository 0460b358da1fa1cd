//! udf: reconstruct triangle meshes from point clouds.
//!
//! Wraps `udf-recon` for local files and for JSON requests against a
//! storage root.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=udf_recon=info` - Pipeline stages and sizes
//! - `RUST_LOG=udf_recon=debug` - Batching and grid details
//! - `RUST_LOG=udf_mesh::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Reconstruct a scan at resolution 192
//! RUST_LOG=udf_recon=info udf reconstruct scan.xyz -o scan.ply --resolution 192
//!
//! # Run a stored request and print the JSON response
//! udf --config udf.toml serve-request request.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use udf_mesh::SmoothingAlgorithm;
use udf_recon::{ReconConfig, ReconError};

mod commands;
mod output;

use commands::{info, reconstruct, serve_request, smooth};

/// udf - Point cloud to mesh reconstruction with unsigned distance fields.
#[derive(Parser)]
#[command(name = "udf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML configuration file (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct a mesh from a PLY or XYZ point cloud
    Reconstruct {
        /// Input point cloud
        input: PathBuf,

        /// Output PLY path (defaults to <input>_mesh.ply)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Grid resolution per axis
        #[arg(long, short)]
        resolution: Option<usize>,

        /// Distance-field model to sample
        #[arg(long, default_value = "pointcloud")]
        model: ModelKind,
    },

    /// Clean and smooth a PLY mesh
    Smooth {
        /// Input mesh file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Smoothing algorithm
        #[arg(long, default_value = "laplacian")]
        algorithm: AlgorithmArg,

        /// Number of iterations
        #[arg(long, default_value = "10")]
        iterations: u32,
    },

    /// Display mesh or point cloud statistics
    Info {
        /// Input mesh or point cloud file
        input: PathBuf,
    },

    /// Run a JSON reconstruction or smoothing request against the storage root
    ServeRequest {
        /// Request body file, or `-` for stdin
        request: PathBuf,

        /// Treat the body as a smoothing request
        #[arg(long)]
        smooth: bool,

        /// Override the configured storage root
        #[arg(long)]
        storage_root: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelKind {
    /// Gaussian-weighted point-to-plane field over the cloud
    Pointcloud,
    /// Sphere fitted to the cloud (for demos and tests)
    Sphere,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AlgorithmArg {
    /// Uniform Laplacian
    Laplacian,
    /// Taubin lambda/mu (volume preserving)
    Taubin,
}

impl From<AlgorithmArg> for SmoothingAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Laplacian => SmoothingAlgorithm::Laplacian,
            AlgorithmArg::Taubin => SmoothingAlgorithm::Taubin,
        }
    }
}

impl Cli {
    /// Configuration from `--config`, or defaults.
    fn load_config(&self) -> Result<ReconConfig> {
        let Some(path) = &self.config else {
            return Ok(ReconConfig::default());
        };
        let config = ReconConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "udf_recon=info,udf_mesh=info",
            2 => "udf_recon=debug,udf_mesh=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = cli.load_config().and_then(|config| match &cli.command {
        Commands::Reconstruct {
            input,
            output,
            resolution,
            model,
        } => reconstruct::run(input, output.as_deref(), *resolution, *model, config, &cli),
        Commands::Smooth {
            input,
            output,
            algorithm,
            iterations,
        } => smooth::run(input, output, (*algorithm).into(), *iterations, &cli),
        Commands::Info { input } => info::run(input, &cli),
        Commands::ServeRequest {
            request,
            smooth,
            storage_root,
        } => serve_request::run(request, *smooth, storage_root.clone(), config, &cli),
    });

    if let Err(e) = &result {
        if !cli.quiet {
            report_error(e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Print an error with its code and suggestion when it carries one.
fn report_error(e: &anyhow::Error) {
    if let Some(recon_err) = e.downcast_ref::<ReconError>() {
        eprintln!("{}: {}", "Error".red().bold(), recon_err);
        eprintln!("  {}: {}", "Code".cyan(), recon_err.code());
        eprintln!("  {}: {}", "Category".cyan(), recon_err.category());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            recon_err.recovery_suggestion()
        );
        if let ReconError::Mesh(mesh_err) = recon_err
            && let Some(location) = mesh_err.location()
        {
            eprintln!("  {}: {}", "Location".yellow(), location);
        }
    } else if let Some(mesh_err) = e.downcast_ref::<udf_mesh::MeshError>() {
        eprintln!("{}: {}", "Error".red().bold(), mesh_err);
        eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            mesh_err.recovery_suggestion()
        );
        if let Some(location) = mesh_err.location() {
            eprintln!("  {}: {}", "Location".yellow(), location);
        }
    } else {
        eprintln!("{}: {}", "Error".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {}: {}", "Caused by".yellow(), cause);
        }
    }
}
