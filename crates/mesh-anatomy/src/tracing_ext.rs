//! Tracing extensions for anatomy operations.
//!
//! Structured logging and timing built on the `tracing` ecosystem:
//!
//! - **Performance spans**: operation timing via [`OperationTimer`]
//! - **Structured fields**: vertex/face counts, radii, thresholds, volumes
//! - **Progress events**: chunk updates from the curvature pass
//!
//! # Usage
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // Set RUST_LOG=mesh_anatomy=debug for detailed output
//! ```
//!
//! # Log Levels
//!
//! - **WARN**: Recoverable degradations (side without a region, fallback threshold)
//! - **INFO**: Operation summaries, timing
//! - **DEBUG**: Intermediate states, progress
//! - **TRACE**: Per-chunk and per-section detail

use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

use crate::analysis::AnalysisResult;
use crate::measure::MeasurementSet;
use crate::types::Side;
use crate::volume::VolumeCalculation;

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// fn expensive_operation() {
///     let _timer = OperationTimer::new("expensive_operation");
///     // ... do work ...
/// } // Timer logs duration when dropped
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("anatomy_operation", operation = name);
        debug!(target: "mesh_anatomy::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer with mesh size fields attached.
    pub fn with_context(name: &'static str, face_count: usize, vertex_count: usize) -> Self {
        let span = tracing::info_span!(
            "anatomy_operation",
            operation = name,
            faces = face_count,
            vertices = vertex_count
        );
        debug!(
            target: "mesh_anatomy::timing",
            operation = name,
            faces = face_count,
            vertices = vertex_count,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the span for this timer.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        info!(
            target: "mesh_anatomy::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &crate::Mesh, context: &str) {
    let dims = mesh
        .bounds()
        .map(|b| b.extent())
        .unwrap_or_else(nalgebra::Vector3::zeros);

    debug!(
        target: "mesh_anatomy::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        missing_normals = mesh.missing_normal_count(),
        dimensions = format!("{:.3} x {:.3} x {:.3}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log the outcome of an analysis pass. Sides without a landmark log a warning.
pub fn log_analysis_result(result: &AnalysisResult) {
    info!(
        target: "mesh_anatomy::analysis",
        radius = format!("{:.4}", result.radius),
        threshold = format!("{:.5}", result.threshold.value),
        threshold_source = %result.threshold.source,
        region_vertices = result.region_vertex_count,
        candidates = result.candidate_count,
        regions = result.regions.iter().count(),
        "Feature analysis completed"
    );
    for side in Side::BOTH {
        if result.landmarks.get(side).is_none() {
            warn!(
                target: "mesh_anatomy::analysis",
                side = %side,
                "No region formed; landmark must be supplied manually"
            );
        }
    }
}

/// Log a measurement set.
pub fn log_measurements(set: &MeasurementSet, context: &str) {
    debug!(
        target: "mesh_anatomy::measure",
        context = context,
        unit = %set.unit,
        landmark_distance = ?set.landmark_distance,
        symmetry_ratio = format!("{:.1}", set.symmetry_ratio),
        size_category = ?set.size_category,
        "Measurements updated"
    );
}

/// Log a volume calculation.
pub fn log_volume(volume: &VolumeCalculation, context: &str) {
    debug!(
        target: "mesh_anatomy::volume",
        context = context,
        method = ?volume.method,
        left = ?volume.sides.left,
        right = ?volume.sides.right,
        total = format!("{:.3}", volume.total),
        asymmetry = format!("{:.1}", volume.asymmetry),
        "Volumes updated"
    );
}

/// Log progress for a long-running operation.
pub fn log_progress(operation: &str, current: usize, total: usize, stage: Option<&str>) {
    let percent = if total > 0 {
        (current as f64 / total as f64 * 100.0) as u32
    } else {
        0
    };

    debug!(
        target: "mesh_anatomy::progress",
        operation = operation,
        current = current,
        total = total,
        percent = percent,
        stage = stage.unwrap_or("processing"),
        "Progress update"
    );
}

/// Log a file I/O operation.
pub fn log_io_operation(
    operation: &str,
    path: &std::path::Path,
    format: Option<&str>,
    success: bool,
) {
    if success {
        info!(
            target: "mesh_anatomy::io",
            operation = operation,
            path = path.display().to_string(),
            format = format.unwrap_or("auto"),
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "mesh_anatomy::io",
            operation = operation,
            path = path.display().to_string(),
            format = format.unwrap_or("auto"),
            "I/O operation failed"
        );
    }
}

/// Log a performance-critical section.
///
/// Returns a guard that logs when dropped.
#[must_use]
pub fn log_perf_section(name: &'static str) -> impl Drop {
    struct PerfGuard {
        name: &'static str,
        start: Instant,
    }
    impl Drop for PerfGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            trace!(
                target: "mesh_anatomy::perf",
                section = self.name,
                elapsed_us = elapsed.as_micros(),
                "Performance section completed"
            );
        }
    }
    PerfGuard {
        name,
        start: Instant::now(),
    }
}

/// Macro for creating instrumented mesh operation spans.
///
/// Creates a tracing span with the mesh's vertex and face counts attached.
#[macro_export]
macro_rules! mesh_span {
    ($name:expr, $mesh:expr) => {
        tracing::info_span!(
            $name,
            vertices = $mesh.vertex_count(),
            faces = $mesh.face_count()
        )
    };
    ($name:expr, $mesh:expr, $($field:tt)*) => {
        tracing::info_span!(
            $name,
            vertices = $mesh.vertex_count(),
            faces = $mesh.face_count(),
            $($field)*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mesh;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::new("test_operation");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn test_log_mesh_stats_empty() {
        // Must not panic on an empty mesh (no bounds).
        log_mesh_stats(&Mesh::new(), "test");
        log_progress("test", 0, 0, None);
    }
}
