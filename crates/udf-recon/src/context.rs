//! Long-lived collaborators shared by every request.

use std::sync::Arc;

use udf_mesh::PointCloud;

use crate::config::ReconConfig;
use crate::error::ReconResult;
use crate::field::PointCloudField;
use crate::oracle::{BatchedOracle, DeviceGate, DistanceFieldModel, ReferenceCloud};
use crate::store::{LocalStore, MeshStore};

/// A model that densifies sparse clouds.
///
/// A context may carry one, but reconstruction feeds the raw points
/// straight to the distance field and never consults it.
pub trait PointUpsampler: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Return a cloud of roughly `target_points` points.
    fn upsample(&self, cloud: &PointCloud, target_points: usize) -> ReconResult<PointCloud>;
}

/// Model handles, device gate, store and configuration, built once at
/// startup and shared behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use udf_recon::{ReconConfig, ReconContext, Reconstructor};
///
/// let ctx = Arc::new(ReconContext::from_config(ReconConfig::default()));
/// let reconstructor = Reconstructor::new(ctx);
/// ```
pub struct ReconContext {
    model: Arc<dyn DistanceFieldModel>,
    upsampler: Option<Arc<dyn PointUpsampler>>,
    gate: DeviceGate,
    store: Arc<dyn MeshStore>,
    config: ReconConfig,
}

impl ReconContext {
    /// Assemble a context. The device gate gets `config.device_permits`
    /// permits.
    pub fn new(
        model: Arc<dyn DistanceFieldModel>,
        store: Arc<dyn MeshStore>,
        config: ReconConfig,
    ) -> Self {
        Self {
            model,
            upsampler: None,
            gate: DeviceGate::new(config.device_permits),
            store,
            config,
        }
    }

    /// The point-cloud field over a [`LocalStore`] at `config.storage_root`.
    pub fn from_config(config: ReconConfig) -> Self {
        let model = Arc::new(PointCloudField::new(config.field_neighbors));
        let store = Arc::new(LocalStore::new(config.storage_root.clone()));
        Self::new(model, store, config)
    }

    /// Attach an upsampler handle.
    pub fn with_upsampler(mut self, upsampler: Arc<dyn PointUpsampler>) -> Self {
        self.upsampler = Some(upsampler);
        self
    }

    /// Replace the distance-field model.
    pub fn with_model(mut self, model: Arc<dyn DistanceFieldModel>) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> &dyn DistanceFieldModel {
        self.model.as_ref()
    }

    pub fn upsampler(&self) -> Option<&dyn PointUpsampler> {
        self.upsampler.as_deref()
    }

    pub fn gate(&self) -> &DeviceGate {
        &self.gate
    }

    pub fn store(&self) -> &dyn MeshStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Batched oracle over this context's model and gate.
    pub fn oracle<'a>(&'a self, cloud: &'a ReferenceCloud) -> BatchedOracle<'a> {
        BatchedOracle::new(self.model(), cloud, &self.gate, self.config.max_batch)
    }
}

impl std::fmt::Debug for ReconContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconContext")
            .field("model", &self.model.name())
            .field("upsampler", &self.upsampler.as_ref().map(|u| u.name().to_string()))
            .field("gate", &self.gate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::AnalyticSphereField;

    #[test]
    fn test_from_config_uses_pointcloud_field() {
        let config = ReconConfig {
            device_permits: 3,
            max_batch: 100,
            ..ReconConfig::default()
        };
        let ctx = ReconContext::from_config(config);
        assert_eq!(ctx.model().name(), "pointcloud");
        assert_eq!(ctx.gate().permits(), 3);
        assert!(ctx.upsampler().is_none());

        let cloud = ReferenceCloud::new(&PointCloud::new());
        assert_eq!(ctx.oracle(&cloud).max_batch(), 100);
    }

    #[test]
    fn test_model_can_be_swapped() {
        let ctx = ReconContext::from_config(ReconConfig::default())
            .with_model(Arc::new(AnalyticSphereField));
        assert_eq!(ctx.model().name(), "sphere");
        assert!(format!("{:?}", ctx).contains("sphere"));
    }
}
