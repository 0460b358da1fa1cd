//! Error types for mesh and point cloud operations.
//!
//! Every error carries:
//! - A machine-readable code in the format `MESH-XXXX`
//! - Location context where one exists (file, vertex, face)
//! - A recovery suggestion
//! - miette diagnostics for terminal display
//!
//! # Error Codes
//!
//! - `MESH-1xxx`: I/O errors (reading, writing, parsing)
//! - `MESH-2xxx`: Validation errors (indices, coordinates, empty data)
//! - `MESH-3xxx`: Repair and smoothing errors
//! - `MESH-4xxx`: Format errors

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Shorthand used throughout the crate.
pub type MeshResult<T> = Result<T, MeshError>;

/// Stable `MESH-XXXX` identifiers, grouped by thousand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    IoRead = 1001,
    IoWrite = 1002,
    /// Malformed PLY header or body, or a bad XYZ line.
    ParseError = 1003,

    /// A face names a vertex past the end of the vertex list.
    InvalidVertexIndex = 2001,
    /// NaN or infinite coordinate.
    InvalidCoordinate = 2002,
    EmptyMesh = 2003,
    EmptyPointCloud = 2004,

    /// Smoothing or cleanup was given an unusable setting.
    InvalidParameter = 3001,

    UnsupportedFormat = 4001,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ParseError => "MESH-1003",
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::InvalidCoordinate => "MESH-2002",
            ErrorCode::EmptyMesh => "MESH-2003",
            ErrorCode::EmptyPointCloud => "MESH-2004",
            ErrorCode::InvalidParameter => "MESH-3001",
            ErrorCode::UnsupportedFormat => "MESH-4001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller can do about a failure, rendered as a help line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    ReexportFile { format: Option<String> },
    UseDifferentFormat { suggested: Vec<String> },
    CheckSourceData { checks: Vec<String> },
    AdjustParameters { parameters: Vec<(String, String)> },
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportFile { format: Some(format) } => {
                write!(f, "Export the data again as {format}")
            }
            RecoverySuggestion::ReexportFile { format: None } => {
                f.write_str("Export the data again from the scanner or modeling tool")
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Convert the file to one of: {}", suggested.join(", "))
            }
            RecoverySuggestion::CheckSourceData { checks } => {
                write!(f, "Verify {}", checks.join(" and "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                f.write_str("Change ")?;
                for (i, (name, hint)) in parameters.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{name} ({hint})")?;
                }
                Ok(())
            }
            RecoverySuggestion::None => f.write_str("Nothing to suggest"),
        }
    }
}

/// Where in the input a failure was detected.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Vertex of a mesh, or point of a cloud.
    Vertex { index: usize },
    Face { index: usize },
    File { path: PathBuf, line: Option<usize> },
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {index}"),
            MeshLocation::Face { index } => write!(f, "face {index}"),
            MeshLocation::File { path, line: Some(line) } => {
                write!(f, "{}:{line}", path.display())
            }
            MeshLocation::File { path, line: None } => write!(f, "{}", path.display()),
        }
    }
}

/// Failure while loading, saving, or cleaning a mesh or point cloud.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    #[error("cannot read {path}")]
    #[diagnostic(code(mesh::io::read), help("Is the path correct and readable?"))]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}")]
    #[diagnostic(code(mesh::io::write), help("Is the parent directory present and writable?"))]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {details}")]
    #[diagnostic(
        code(mesh::parse::error),
        help("The file may be corrupted or use an unsupported variant of the format.")
    )]
    ParseError {
        path: PathBuf,
        line: Option<usize>,
        details: String,
    },

    /// Extension other than `.ply` or `.xyz`.
    #[error("unsupported format: {extension:?}")]
    #[diagnostic(
        code(mesh::format::unsupported),
        help("Supported point cloud formats: PLY, XYZ. Supported mesh formats: PLY")
    )]
    UnsupportedFormat { extension: Option<String> },

    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty),
        help("The mesh must have at least one vertex and one face.")
    )]
    EmptyMesh { details: String },

    #[error("point cloud is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty_cloud),
        help("The file must contain a `vertex` element (PLY) or x y z lines (XYZ).")
    )]
    EmptyPointCloud { details: String },

    #[error("face {face_index} uses vertex {vertex_index} of only {vertex_count}")]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Check the export settings of the tool that produced the mesh.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    #[error("non-finite {coordinate} = {value} at vertex {vertex_index}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help("Check for numerical issues in the source data.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    #[error("invalid parameter {name}: {details}")]
    #[diagnostic(code(mesh::param::invalid))]
    InvalidParameter { name: &'static str, details: String },
}

impl MeshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ParseError { .. } => ErrorCode::ParseError,
            MeshError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            MeshError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            MeshError::EmptyPointCloud { .. } => ErrorCode::EmptyPointCloud,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
        }
    }

    /// Help text shown below the diagnostic.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::IoRead { .. } => RecoverySuggestion::CheckSourceData {
                checks: vec!["the path".into(), "read permission".into()],
            },
            MeshError::IoWrite { .. } => RecoverySuggestion::CheckSourceData {
                checks: vec!["the output directory".into(), "write permission".into()],
            },
            MeshError::ParseError { .. } => RecoverySuggestion::ReexportFile {
                format: Some("binary PLY".into()),
            },
            MeshError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["PLY".into(), "XYZ".into()],
            },
            MeshError::EmptyMesh { .. } | MeshError::EmptyPointCloud { .. } => {
                RecoverySuggestion::CheckSourceData {
                    checks: vec!["that the file holds geometry".into(), "the export settings".into()],
                }
            }
            MeshError::InvalidVertexIndex { .. } => RecoverySuggestion::ReexportFile { format: None },
            MeshError::InvalidCoordinate { .. } => RecoverySuggestion::CheckSourceData {
                checks: vec!["the coordinate values".into(), "the export precision".into()],
            },
            MeshError::InvalidParameter { name, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![((*name).into(), "use a positive value".into())],
            },
        }
    }

    pub fn location(&self) -> Option<MeshLocation> {
        let location = match self {
            MeshError::InvalidVertexIndex { face_index, .. } => MeshLocation::Face { index: *face_index },
            MeshError::InvalidCoordinate { vertex_index, .. } => {
                MeshLocation::Vertex { index: *vertex_index }
            }
            MeshError::ParseError { path, line, .. } => MeshLocation::File {
                path: path.clone(),
                line: *line,
            },
            MeshError::IoRead { path, .. } | MeshError::IoWrite { path, .. } => MeshLocation::File {
                path: path.clone(),
                line: None,
            },
            _ => return None,
        };
        Some(location)
    }

    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeshError::ParseError {
            path: path.into(),
            line: None,
            details: details.into(),
        }
    }

    /// Parse failure on a 1-based line.
    pub fn parse_error_at(path: impl Into<PathBuf>, line: usize, details: impl Into<String>) -> Self {
        MeshError::ParseError {
            path: path.into(),
            line: Some(line),
            details: details.into(),
        }
    }

    pub fn unsupported_format(path: &std::path::Path) -> Self {
        MeshError::UnsupportedFormat {
            extension: path.extension().map(|e| e.to_string_lossy().into_owned()),
        }
    }

    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        MeshError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    pub fn empty_mesh(details: impl Into<String>) -> Self {
        MeshError::EmptyMesh {
            details: details.into(),
        }
    }

    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        MeshError::InvalidParameter {
            name,
            details: details.into(),
        }
    }
}
