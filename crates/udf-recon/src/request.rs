//! Request and response bodies.

use serde::{Deserialize, Serialize};
use udf_mesh::SmoothingAlgorithm;

use crate::error::{ErrorCategory, ReconError, ReconResult, RepairWarning};

/// Reconstruct a mesh from a stored point cloud.
///
/// ```
/// use udf_recon::ReconRequest;
///
/// let request = ReconRequest::from_json(r#"{"file_path": "scan.ply", "res": 192}"#).unwrap();
/// assert_eq!(request.source_cloud_reference, "scan.ply");
/// assert_eq!(request.resolution, Some(192));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconRequest {
    /// Store reference of a `.ply` or `.xyz` cloud.
    #[serde(alias = "file_path")]
    pub source_cloud_reference: String,
    /// Grid resolution; the configured default when absent.
    #[serde(default, alias = "res", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<usize>,
}

impl ReconRequest {
    /// Request at the default resolution.
    pub fn new(source_cloud_reference: impl Into<String>) -> Self {
        Self {
            source_cloud_reference: source_cloud_reference.into(),
            resolution: None,
        }
    }

    /// Set the resolution.
    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Parse a JSON body.
    pub fn from_json(json: &str) -> ReconResult<Self> {
        serde_json::from_str(json).map_err(|e| ReconError::InvalidRequest {
            details: e.to_string(),
        })
    }
}

/// Smooth a stored mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothRequest {
    /// Store reference of a `.ply` mesh.
    #[serde(alias = "file_path")]
    pub source_mesh_reference: String,
    #[serde(default, alias = "smoothing_algorithm")]
    pub algorithm: SmoothingAlgorithm,
    #[serde(default = "default_iterations", alias = "smoothing_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    10
}

impl SmoothRequest {
    /// Parse a JSON body.
    pub fn from_json(json: &str) -> ReconResult<Self> {
        serde_json::from_str(json).map_err(|e| ReconError::InvalidRequest {
            details: e.to_string(),
        })
    }
}

/// Successful result: where the mesh was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconResponse {
    pub mesh_reference: String,
    /// Repairs applied by the finalizer, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty", skip_deserializing)]
    pub warnings: Vec<RepairWarning>,
}

/// Failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Stable code, `RECON-XXXX` or `MESH-XXXX`.
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub suggestion: String,
}

impl From<&ReconError> for ErrorResponse {
    fn from(err: &ReconError) -> Self {
        let code = match err {
            ReconError::Mesh(inner) => inner.code().as_str().to_string(),
            other => other.code().as_str().to_string(),
        };
        Self {
            code,
            category: err.category(),
            message: err.to_string(),
            suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names_and_aliases() {
        let canonical: ReconRequest =
            serde_json::from_str(r#"{"source_cloud_reference": "a.xyz", "resolution": 128}"#)
                .unwrap();
        let aliased: ReconRequest =
            serde_json::from_str(r#"{"file_path": "a.xyz", "res": 128}"#).unwrap();
        assert_eq!(canonical, aliased);

        let bare = ReconRequest::from_json(r#"{"file_path": "a.xyz"}"#).unwrap();
        assert_eq!(bare.resolution, None);
    }

    #[test]
    fn test_missing_source_is_invalid_request() {
        let err = ReconRequest::from_json(r#"{"res": 128}"#).unwrap_err();
        assert!(matches!(err, ReconError::InvalidRequest { .. }));
        assert_eq!(err.code().as_str(), "RECON-1007");
    }

    #[test]
    fn test_smooth_request_defaults() {
        let request = SmoothRequest::from_json(r#"{"file_path": "m.ply"}"#).unwrap();
        assert_eq!(request.algorithm, SmoothingAlgorithm::Laplacian);
        assert_eq!(request.iterations, 10);

        let request = SmoothRequest::from_json(
            r#"{"source_mesh_reference": "m.ply", "smoothing_algorithm": "taubin", "smoothing_iterations": 3}"#,
        )
        .unwrap();
        assert_eq!(request.algorithm, SmoothingAlgorithm::Taubin);
        assert_eq!(request.iterations, 3);
    }

    #[test]
    fn test_error_response_body() {
        let err = ReconError::UnsupportedResolution {
            resolution: 64,
            supported: vec![128, 192],
        };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["code"], "RECON-1003");
        assert_eq!(body["category"], "InputError");
        assert!(body["message"].as_str().unwrap().contains("64"));
        assert!(!body["suggestion"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_response_omits_empty_warnings() {
        let response = ReconResponse {
            mesh_reference: "prediction_history/ply/x.ply".to_string(),
            warnings: Vec::new(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"mesh_reference":"prediction_history/ply/x.ply"}"#);
    }
}
