// Allow unused_assignments lint for error struct fields that are used in thiserror Display macros
// but appear as "never read" to the compiler.
#![allow(unused_assignments)]

//! Error types for reconstruction with rich diagnostics.
//!
//! Codes follow the pattern `RECON-XXXX` where:
//! - 1xxx = Input errors (request, configuration, source cloud)
//! - 2xxx = Oracle errors (distance-field model)
//! - 3xxx = Geometry errors (degenerate clouds, empty surfaces)
//! - 4xxx = Mesh repair warnings (non-fatal, see [`RepairWarning`])
//! - 5xxx = Storage errors

use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use udf_mesh::MeshError;

use crate::config::ConfigError;

/// Result type alias for reconstruction operations.
pub type ReconResult<T> = Result<T, ReconError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconErrorCode {
    /// RECON-1001: Source reference missing or not found
    MissingSource = 1001,
    /// RECON-1002: Source extension is not ply or xyz
    UnsupportedExtension = 1002,
    /// RECON-1003: Resolution not in the supported set
    UnsupportedResolution = 1003,
    /// RECON-1004: Grid would exceed the memory budget
    MemoryBudgetExceeded = 1004,
    /// RECON-1005: Configuration could not be loaded or is invalid
    InvalidConfig = 1005,
    /// RECON-1006: Cloud or mesh could not be read or written
    MeshIo = 1006,
    /// RECON-1007: Request body is malformed
    InvalidRequest = 1007,

    /// RECON-2001: Model reported a device failure
    DeviceFailure = 2001,
    /// RECON-2002: Model returned a result of the wrong length
    ShapeMismatch = 2002,
    /// RECON-2003: Device memory exhausted after the split retry
    OutOfMemory = 2003,
    /// RECON-2004: Model returned a negative or non-finite distance
    InvalidDistance = 2004,

    /// RECON-3001: Cloud has too few points
    TooFewPoints = 3001,
    /// RECON-3002: Cloud has a non-finite coordinate
    NonFiniteCoordinate = 3002,
    /// RECON-3003: Cloud bounding box has zero extent
    ZeroExtent = 3003,
    /// RECON-3004: No grid point lies in the narrow band
    EmptyNarrowBand = 3004,
    /// RECON-3005: Extraction produced no triangles
    EmptyIsosurface = 3005,

    /// RECON-5001: Download failed
    DownloadFailed = 5001,
    /// RECON-5002: Upload failed
    UploadFailed = 5002,
}

impl ReconErrorCode {
    /// Returns the error code as a string in the format `RECON-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconErrorCode::MissingSource => "RECON-1001",
            ReconErrorCode::UnsupportedExtension => "RECON-1002",
            ReconErrorCode::UnsupportedResolution => "RECON-1003",
            ReconErrorCode::MemoryBudgetExceeded => "RECON-1004",
            ReconErrorCode::InvalidConfig => "RECON-1005",
            ReconErrorCode::MeshIo => "RECON-1006",
            ReconErrorCode::InvalidRequest => "RECON-1007",
            ReconErrorCode::DeviceFailure => "RECON-2001",
            ReconErrorCode::ShapeMismatch => "RECON-2002",
            ReconErrorCode::OutOfMemory => "RECON-2003",
            ReconErrorCode::InvalidDistance => "RECON-2004",
            ReconErrorCode::TooFewPoints => "RECON-3001",
            ReconErrorCode::NonFiniteCoordinate => "RECON-3002",
            ReconErrorCode::ZeroExtent => "RECON-3003",
            ReconErrorCode::EmptyNarrowBand => "RECON-3004",
            ReconErrorCode::EmptyIsosurface => "RECON-3005",
            ReconErrorCode::DownloadFailed => "RECON-5001",
            ReconErrorCode::UploadFailed => "RECON-5002",
        }
    }
}

impl std::fmt::Display for ReconErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error category, reported to clients alongside the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Bad request, configuration, or source file.
    InputError,
    /// The distance-field model failed or misbehaved.
    OracleError,
    /// The input geometry cannot produce a surface.
    GeometryError,
    /// Non-fatal repair applied to the output mesh.
    MeshRepairWarning,
    /// Artifact storage failed.
    StorageError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::InputError => "InputError",
            ErrorCategory::OracleError => "OracleError",
            ErrorCategory::GeometryError => "GeometryError",
            ErrorCategory::MeshRepairWarning => "MeshRepairWarning",
            ErrorCategory::StorageError => "StorageError",
        };
        f.write_str(name)
    }
}

/// Recovery suggestions for reconstruction errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconRecoverySuggestion {
    /// Pick one of the supported resolutions.
    UseSupportedResolution { supported: Vec<usize> },
    /// Lower the resolution or raise the memory budget.
    ReduceResolution { suggested: usize },
    /// Convert the source to PLY or XYZ.
    UsePlyOrXyz,
    /// Check the source reference.
    CheckSourceReference,
    /// Fix the configuration file.
    FixConfiguration,
    /// Lower `max_batch` so chunks fit in device memory.
    ReduceBatchSize { suggested: usize },
    /// Check the distance-field model.
    CheckModel,
    /// Provide a denser, non-degenerate point cloud.
    ProvideDenserCloud { min_points: usize },
    /// Check the storage root and its permissions.
    CheckStorage,
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for ReconRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconRecoverySuggestion::UseSupportedResolution { supported } => {
                write!(f, "Use one of the supported resolutions: {:?}", supported)
            }
            ReconRecoverySuggestion::ReduceResolution { suggested } => {
                write!(
                    f,
                    "Reduce the resolution to {} or raise memory_budget_bytes",
                    suggested
                )
            }
            ReconRecoverySuggestion::UsePlyOrXyz => {
                write!(f, "Convert the point cloud to .ply or .xyz")
            }
            ReconRecoverySuggestion::CheckSourceReference => {
                write!(f, "Check that the source reference exists in the store")
            }
            ReconRecoverySuggestion::FixConfiguration => {
                write!(f, "Fix the configuration file and try again")
            }
            ReconRecoverySuggestion::ReduceBatchSize { suggested } => {
                write!(f, "Lower max_batch to {} or free device memory", suggested)
            }
            ReconRecoverySuggestion::CheckModel => {
                write!(f, "Check the distance-field model and its device")
            }
            ReconRecoverySuggestion::ProvideDenserCloud { min_points } => {
                write!(
                    f,
                    "Provide a cloud with at least {} distinct, finite points spanning a volume",
                    min_points
                )
            }
            ReconRecoverySuggestion::CheckStorage => {
                write!(f, "Check that the storage root exists and is writable")
            }
            ReconRecoverySuggestion::None => {
                write!(f, "No specific suggestion available")
            }
        }
    }
}

/// Errors that abort a reconstruction request.
#[derive(Debug, Error, Diagnostic)]
pub enum ReconError {
    /// Source reference missing or not found.
    #[error("source cloud not found: {reference}")]
    #[diagnostic(
        code(recon::input::missing_source),
        help("Check that the source reference points to an existing file in the store.")
    )]
    MissingSource { reference: String },

    /// Source extension not supported.
    #[error("unsupported source extension '{extension}' (expected ply or xyz)")]
    #[diagnostic(
        code(recon::input::extension),
        help("Only .ply and .xyz point clouds are accepted.")
    )]
    UnsupportedExtension { extension: String },

    /// Resolution not in the supported set.
    #[error("unsupported resolution {resolution} (supported: {supported:?})")]
    #[diagnostic(
        code(recon::input::resolution),
        help("Pass one of the configured supported_resolutions.")
    )]
    UnsupportedResolution {
        resolution: usize,
        supported: Vec<usize>,
    },

    /// Grid would exceed the memory budget.
    #[error(
        "resolution {resolution} needs ~{required} bytes, over the budget of {budget} bytes"
    )]
    #[diagnostic(
        code(recon::input::memory_budget),
        help("Lower the resolution or raise memory_budget_bytes in the configuration.")
    )]
    MemoryBudgetExceeded {
        resolution: usize,
        required: u64,
        budget: u64,
    },

    /// Configuration invalid.
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(recon::input::config))]
    Config(#[from] ConfigError),

    /// Request body malformed.
    #[error("invalid request: {details}")]
    #[diagnostic(
        code(recon::input::request),
        help("A request needs source_cloud_reference and an optional resolution.")
    )]
    InvalidRequest { details: String },

    /// Underlying mesh or cloud I/O error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(recon::mesh::error))]
    Mesh(#[from] MeshError),

    /// Model reported a device failure.
    #[error("distance-field model failed on batch {batch_index}: {details}")]
    #[diagnostic(
        code(recon::oracle::device),
        help("The model backend reported an error. Check its device and logs.")
    )]
    DeviceFailure { batch_index: usize, details: String },

    /// Model returned the wrong number of results.
    #[error("batch {batch_index} returned {actual} results for {expected} queries")]
    #[diagnostic(
        code(recon::oracle::shape),
        help("The model must return exactly one result per query point.")
    )]
    ShapeMismatch {
        batch_index: usize,
        expected: usize,
        actual: usize,
    },

    /// Device memory exhausted even after splitting the batch.
    #[error("device out of memory on batch {batch_index} ({requested} points) after retry")]
    #[diagnostic(
        code(recon::oracle::oom),
        help("Lower max_batch or free device memory.")
    )]
    OutOfMemory { batch_index: usize, requested: usize },

    /// Model returned a negative or non-finite distance.
    #[error("invalid distance {value} at grid point {index}")]
    #[diagnostic(
        code(recon::oracle::distance),
        help("Unsigned distances must be finite and non-negative.")
    )]
    InvalidDistance { index: usize, value: f64 },

    /// Cloud has too few points.
    #[error("point cloud has {count} points, at least {min} required")]
    #[diagnostic(code(recon::geometry::too_few_points))]
    TooFewPoints { count: usize, min: usize },

    /// Cloud has a non-finite coordinate.
    #[error("point {index} has a non-finite coordinate")]
    #[diagnostic(code(recon::geometry::non_finite))]
    NonFiniteCoordinate { index: usize },

    /// Cloud has zero extent.
    #[error("point cloud has zero extent")]
    #[diagnostic(
        code(recon::geometry::zero_extent),
        help("All points coincide; there is no surface to reconstruct.")
    )]
    ZeroExtent,

    /// No surface detected.
    #[error("no surface detected: no grid point within {threshold:.5} of the cloud")]
    #[diagnostic(code(recon::geometry::empty_band))]
    EmptyNarrowBand { threshold: f64 },

    /// Extraction produced nothing.
    #[error("isosurface extraction produced an empty mesh ({cells} cells processed)")]
    #[diagnostic(code(recon::geometry::empty_isosurface))]
    EmptyIsosurface { cells: usize },

    /// Download failed.
    #[error("failed to download '{reference}': {source}")]
    #[diagnostic(code(recon::storage::download))]
    DownloadFailed {
        reference: String,
        #[source]
        source: std::io::Error,
    },

    /// Upload failed.
    #[error("failed to upload {path:?}: {source}")]
    #[diagnostic(code(recon::storage::upload))]
    UploadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReconError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ReconErrorCode {
        match self {
            ReconError::MissingSource { .. } => ReconErrorCode::MissingSource,
            ReconError::UnsupportedExtension { .. } => ReconErrorCode::UnsupportedExtension,
            ReconError::UnsupportedResolution { .. } => ReconErrorCode::UnsupportedResolution,
            ReconError::MemoryBudgetExceeded { .. } => ReconErrorCode::MemoryBudgetExceeded,
            ReconError::Config(_) => ReconErrorCode::InvalidConfig,
            ReconError::InvalidRequest { .. } => ReconErrorCode::InvalidRequest,
            ReconError::Mesh(_) => ReconErrorCode::MeshIo,
            ReconError::DeviceFailure { .. } => ReconErrorCode::DeviceFailure,
            ReconError::ShapeMismatch { .. } => ReconErrorCode::ShapeMismatch,
            ReconError::OutOfMemory { .. } => ReconErrorCode::OutOfMemory,
            ReconError::InvalidDistance { .. } => ReconErrorCode::InvalidDistance,
            ReconError::TooFewPoints { .. } => ReconErrorCode::TooFewPoints,
            ReconError::NonFiniteCoordinate { .. } => ReconErrorCode::NonFiniteCoordinate,
            ReconError::ZeroExtent => ReconErrorCode::ZeroExtent,
            ReconError::EmptyNarrowBand { .. } => ReconErrorCode::EmptyNarrowBand,
            ReconError::EmptyIsosurface { .. } => ReconErrorCode::EmptyIsosurface,
            ReconError::DownloadFailed { .. } => ReconErrorCode::DownloadFailed,
            ReconError::UploadFailed { .. } => ReconErrorCode::UploadFailed,
        }
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        match self.code() as u32 {
            1000..=1999 => ErrorCategory::InputError,
            2000..=2999 => ErrorCategory::OracleError,
            3000..=3999 => ErrorCategory::GeometryError,
            4000..=4999 => ErrorCategory::MeshRepairWarning,
            _ => ErrorCategory::StorageError,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> ReconRecoverySuggestion {
        match self {
            ReconError::MissingSource { .. } => ReconRecoverySuggestion::CheckSourceReference,
            ReconError::UnsupportedExtension { .. } => ReconRecoverySuggestion::UsePlyOrXyz,
            ReconError::UnsupportedResolution { supported, .. } => {
                ReconRecoverySuggestion::UseSupportedResolution {
                    supported: supported.clone(),
                }
            }
            ReconError::MemoryBudgetExceeded {
                resolution,
                required,
                budget,
            } => {
                // Memory grows with N^3
                let scale = (*budget as f64 / *required as f64).cbrt();
                ReconRecoverySuggestion::ReduceResolution {
                    suggested: ((*resolution as f64 * scale) as usize).max(2),
                }
            }
            ReconError::Config(_) | ReconError::InvalidRequest { .. } => {
                ReconRecoverySuggestion::FixConfiguration
            }
            ReconError::Mesh(e) => match e.code() {
                udf_mesh::ErrorCode::UnsupportedFormat => ReconRecoverySuggestion::UsePlyOrXyz,
                udf_mesh::ErrorCode::IoWrite => ReconRecoverySuggestion::CheckStorage,
                _ => ReconRecoverySuggestion::CheckSourceReference,
            },
            ReconError::OutOfMemory { requested, .. } => ReconRecoverySuggestion::ReduceBatchSize {
                suggested: (requested / 4).max(1),
            },
            ReconError::DeviceFailure { .. }
            | ReconError::ShapeMismatch { .. }
            | ReconError::InvalidDistance { .. } => ReconRecoverySuggestion::CheckModel,
            ReconError::TooFewPoints { min, .. } => {
                ReconRecoverySuggestion::ProvideDenserCloud { min_points: *min }
            }
            ReconError::NonFiniteCoordinate { .. }
            | ReconError::ZeroExtent
            | ReconError::EmptyNarrowBand { .. }
            | ReconError::EmptyIsosurface { .. } => {
                ReconRecoverySuggestion::ProvideDenserCloud { min_points: 4 }
            }
            ReconError::DownloadFailed { .. } => ReconRecoverySuggestion::CheckSourceReference,
            ReconError::UploadFailed { .. } => ReconRecoverySuggestion::CheckStorage,
        }
    }
}

/// A non-fatal repair applied by the mesh finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairWarning {
    /// RECON-4001: Boundary holes closed.
    HolesFilled { holes: usize, triangles: usize },
    /// RECON-4002: Holes left open because they were too large.
    HolesSkipped { holes: usize },
    /// RECON-4003: Degenerate faces removed.
    DegenerateFacesRemoved { faces: usize },
    /// RECON-4004: Duplicate faces removed.
    DuplicateFacesRemoved { faces: usize },
    /// RECON-4005: All faces flipped to face outward.
    OrientationFlipped { faces: usize },
}

impl RepairWarning {
    /// Returns the warning code as a string in the format `RECON-4XXX`.
    pub fn code(&self) -> &'static str {
        match self {
            RepairWarning::HolesFilled { .. } => "RECON-4001",
            RepairWarning::HolesSkipped { .. } => "RECON-4002",
            RepairWarning::DegenerateFacesRemoved { .. } => "RECON-4003",
            RepairWarning::DuplicateFacesRemoved { .. } => "RECON-4004",
            RepairWarning::OrientationFlipped { .. } => "RECON-4005",
        }
    }

    /// Always [`ErrorCategory::MeshRepairWarning`].
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::MeshRepairWarning
    }
}

impl std::fmt::Display for RepairWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairWarning::HolesFilled { holes, triangles } => {
                write!(f, "filled {} holes with {} triangles", holes, triangles)
            }
            RepairWarning::HolesSkipped { holes } => {
                write!(f, "left {} holes open (too large to fill)", holes)
            }
            RepairWarning::DegenerateFacesRemoved { faces } => {
                write!(f, "removed {} degenerate faces", faces)
            }
            RepairWarning::DuplicateFacesRemoved { faces } => {
                write!(f, "removed {} duplicate faces", faces)
            }
            RepairWarning::OrientationFlipped { faces } => {
                write!(f, "flipped {} faces to face outward", faces)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_categories() {
        let err = ReconError::UnsupportedResolution {
            resolution: 64,
            supported: vec![128, 192],
        };
        assert_eq!(err.code().as_str(), "RECON-1003");
        assert_eq!(err.category(), ErrorCategory::InputError);

        let err = ReconError::ShapeMismatch {
            batch_index: 3,
            expected: 10,
            actual: 9,
        };
        assert_eq!(err.code().to_string(), "RECON-2002");
        assert_eq!(err.category(), ErrorCategory::OracleError);
        assert!(err.to_string().contains("batch 3"));

        assert_eq!(ReconError::ZeroExtent.category(), ErrorCategory::GeometryError);

        let err = ReconError::UploadFailed {
            path: PathBuf::from("out.ply"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.category(), ErrorCategory::StorageError);
    }

    #[test]
    fn test_memory_budget_suggestion_fits() {
        let err = ReconError::MemoryBudgetExceeded {
            resolution: 192,
            required: 8 * 1024,
            budget: 1024,
        };
        assert_eq!(
            err.recovery_suggestion(),
            ReconRecoverySuggestion::ReduceResolution { suggested: 96 }
        );
    }

    #[test]
    fn test_mesh_error_wrapping() {
        let err: ReconError = MeshError::empty_mesh("nothing").into();
        assert_eq!(err.code(), ReconErrorCode::MeshIo);
        assert_eq!(err.category(), ErrorCategory::InputError);
    }

    #[test]
    fn test_repair_warning_codes() {
        let warning = RepairWarning::HolesFilled {
            holes: 2,
            triangles: 5,
        };
        assert_eq!(warning.code(), "RECON-4001");
        assert_eq!(warning.category(), ErrorCategory::MeshRepairWarning);
        assert_eq!(warning.to_string(), "filled 2 holes with 5 triangles");
    }
}
