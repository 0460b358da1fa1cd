//! Logging helpers shared by the mesh and reconstruction crates.
//!
//! Nothing is printed until the binary installs a subscriber. Useful
//! filters:
//!
//! ```text
//! RUST_LOG=udf_mesh::timing=info          # stage durations only
//! RUST_LOG=udf_recon=debug                 # band sizes, batch counts
//! RUST_LOG=udf_mesh::progress=trace        # one line per oracle batch
//! ```
//!
//! Warnings are reserved for repairs that changed the mesh, OOM retries,
//! and holes left open.

use std::time::Instant;
use tracing::{Span, debug, info, trace};

/// Times a pipeline stage inside its own span.
///
/// The stage is entered on construction and a `udf_mesh::timing` event
/// with the elapsed milliseconds is emitted when the guard drops.
pub struct OperationTimer {
    name: &'static str,
    items: usize,
    start: Instant,
    _entered: tracing::span::EnteredSpan,
}

impl OperationTimer {
    pub fn with_items(name: &'static str, items: usize) -> Self {
        let span: Span = tracing::info_span!("stage", stage = name, items);
        debug!(target: "udf_mesh::timing", stage = name, items, "Stage started");
        Self {
            name,
            items,
            start: Instant::now(),
            _entered: span.entered(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1e3
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "udf_mesh::timing",
            stage = self.name,
            items = self.items,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "Stage finished"
        );
    }
}

/// Debug-level snapshot of a mesh between stages.
pub fn log_mesh_stats(mesh: &crate::Mesh, stage: &str) {
    let extent = mesh
        .bounds()
        .map(|(lo, hi)| hi - lo)
        .unwrap_or_else(nalgebra::Vector3::zeros);

    debug!(
        target: "udf_mesh::mesh_state",
        stage,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        extent = format!("{:.3} x {:.3} x {:.3}", extent.x, extent.y, extent.z),
        "Mesh state"
    );
}

/// Trace-level `done` of `total` for batched work.
pub fn log_progress(operation: &str, done: usize, total: usize) {
    let percent = match total {
        0 => 100,
        _ => done * 100 / total,
    };
    trace!(target: "udf_mesh::progress", operation, done, total, percent, "Progress");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mesh;

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = OperationTimer::with_items("sleep", 3);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_logging_without_subscriber() {
        log_mesh_stats(&Mesh::new(), "empty");
        log_progress("batches", 3, 0);
    }
}
