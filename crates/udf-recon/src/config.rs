//! Reconstruction configuration.
//!
//! `ReconConfig` is loaded once at startup and shared by every request. It
//! can be saved and loaded as TOML or JSON.
//!
//! # Example TOML
//!
//! ```toml
//! max_batch = 32768
//! device_permits = 2
//! supported_resolutions = [128, 192]
//! storage_root = "/var/lib/udf"
//! ```
//!
//! Fields left out keep their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading, saving, or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading or writing the file.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A field holds an unusable value.
    #[error("{field}: {details}")]
    Invalid { field: &'static str, details: String },
}

/// Settings for the reconstruction pipeline and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Side of the sampling cube in normalized coordinates.
    pub grid_size: f64,
    /// Narrow band half-width in voxels.
    pub band_factor: f64,
    /// Largest query set sent to the model in one call.
    pub max_batch: usize,
    /// Concurrent batches allowed on the device.
    pub device_permits: usize,
    /// Resolutions accepted by requests.
    pub supported_resolutions: Vec<usize>,
    /// Resolution used when a request omits one.
    pub default_resolution: usize,
    /// Upper bound on per-request grid memory.
    pub memory_budget_bytes: u64,
    /// Neighbours used for PCA normal estimation.
    pub normal_neighbors: usize,
    /// Neighbours used by the point-cloud distance field.
    pub field_neighbors: usize,
    /// Largest hole (in boundary edges) the finalizer fills.
    pub max_hole_edges: usize,
    /// Faces with area at or below this are dropped by the finalizer.
    pub degenerate_area_epsilon: f64,
    /// Root directory of the local store.
    pub storage_root: PathBuf,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            grid_size: 1.05,
            band_factor: 2.0,
            max_batch: 65536,
            device_permits: 1,
            supported_resolutions: vec![128, 192],
            default_resolution: 128,
            memory_budget_bytes: 2 * 1024 * 1024 * 1024,
            normal_neighbors: 16,
            field_neighbors: 8,
            max_hole_edges: 100,
            degenerate_area_epsilon: 0.0,
            storage_root: PathBuf::from("."),
        }
    }
}

impl ReconConfig {
    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, details: String| Err(ConfigError::Invalid { field, details });

        if !(self.grid_size.is_finite() && self.grid_size > 1.0) {
            return invalid(
                "grid_size",
                format!("must exceed 1.0 to contain the normalized cloud, got {}", self.grid_size),
            );
        }
        if !(self.band_factor >= 1.0) {
            return invalid(
                "band_factor",
                format!("must be at least 1.0, got {}", self.band_factor),
            );
        }
        if self.max_batch == 0 {
            return invalid("max_batch", "must be positive".to_string());
        }
        if self.device_permits == 0 {
            return invalid("device_permits", "must be positive".to_string());
        }
        if self.supported_resolutions.iter().any(|&n| n < 2) {
            return invalid(
                "supported_resolutions",
                format!("every resolution must be at least 2, got {:?}", self.supported_resolutions),
            );
        }
        if !self.supported_resolutions.contains(&self.default_resolution) {
            return invalid(
                "default_resolution",
                format!(
                    "{} is not in supported_resolutions {:?}",
                    self.default_resolution, self.supported_resolutions
                ),
            );
        }
        if self.normal_neighbors < 3 {
            return invalid(
                "normal_neighbors",
                format!("must be at least 3, got {}", self.normal_neighbors),
            );
        }
        if self.field_neighbors == 0 {
            return invalid("field_neighbors", "must be positive".to_string());
        }
        if !(self.degenerate_area_epsilon >= 0.0) {
            return invalid(
                "degenerate_area_epsilon",
                format!("must be non-negative, got {}", self.degenerate_area_epsilon),
            );
        }
        Ok(())
    }

    /// Narrow band threshold for a grid with the given voxel size.
    #[inline]
    pub fn band_threshold(&self, voxel_size: f64) -> f64 {
        self.band_factor * voxel_size
    }
}
