//! Per-vertex curvature estimate as a resumable, chunked job.
//!
//! The estimate for vertex `i` is the mean normal deviation `1 - nᵢ·nⱼ` over
//! the neighbours `j` inside an adaptive radius, multiplied by how much `nᵢ`
//! faces forward. Large values mark sharp local convexity (apex candidates).
//!
//! The neighbourhood radius is derived from the median vertex spacing, so the
//! same parameters behave alike on coarse and dense meshes.
//!
//! # Cooperative scheduling
//!
//! [`CurvatureJob::step`] processes one chunk and returns, so a host event loop
//! can interleave pointer and render work:
//!
//! ```ignore
//! let mut job = CurvatureJob::new(&mesh, &frame, CurvatureParams::default())?;
//! while let JobStatus::Pending(progress) = job.step() {
//!     host.pump_events();
//!     host.show_progress(progress.percent());
//! }
//! let field = job.finish().expect("job completed");
//! ```

use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{AnatomyError, AnatomyResult, require_positive};
use crate::progress::{JobStatus, ProgressCallback, ProgressTracker};
use crate::spatial::SpatialIndex;
use crate::tracing_ext::{OperationTimer, log_progress};
use crate::types::{BodyFrame, Mesh};

/// Tunables for the curvature pass. All values are heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurvatureParams {
    /// Neighbourhood radius as a multiple of the median vertex spacing.
    pub radius_factor: f64,
    /// Lower clamp for the radius, as a fraction of the bounding-box diagonal.
    pub min_radius_fraction: f64,
    /// Upper clamp for the radius, as a fraction of the bounding-box diagonal.
    pub max_radius_fraction: f64,
    /// Vertices sampled when estimating the median spacing.
    pub spacing_samples: usize,
    /// Ignore concave neighbour pairs (normals converging).
    pub convex_only: bool,
    /// Blend between ignoring orientation (0) and scaling fully by `n·forward` (1).
    pub forward_weight: f64,
    /// Vertices processed per [`CurvatureJob::step`].
    pub chunk_size: usize,
}

impl Default for CurvatureParams {
    fn default() -> Self {
        Self {
            radius_factor: 3.0,
            min_radius_fraction: 0.005,
            max_radius_fraction: 0.05,
            spacing_samples: 2000,
            convex_only: true,
            forward_weight: 0.5,
            chunk_size: 512,
        }
    }
}

impl CurvatureParams {
    /// Larger neighbourhoods; smoother but blurrier on noisy scans.
    pub fn smooth() -> Self {
        Self {
            radius_factor: 5.0,
            max_radius_fraction: 0.08,
            ..Default::default()
        }
    }

    /// Small neighbourhoods for clean, dense meshes.
    pub fn sharp() -> Self {
        Self {
            radius_factor: 2.0,
            min_radius_fraction: 0.002,
            ..Default::default()
        }
    }

    pub fn with_radius_factor(mut self, factor: f64) -> Self {
        self.radius_factor = factor;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_convex_only(mut self, convex_only: bool) -> Self {
        self.convex_only = convex_only;
        self
    }

    pub fn validate(&self) -> AnatomyResult<()> {
        require_positive("radius_factor", self.radius_factor)?;
        require_positive("min_radius_fraction", self.min_radius_fraction)?;
        require_positive("max_radius_fraction", self.max_radius_fraction)?;
        if self.max_radius_fraction < self.min_radius_fraction {
            return Err(AnatomyError::invalid_parameter(
                "max_radius_fraction",
                self.max_radius_fraction,
                "must not be smaller than min_radius_fraction",
            ));
        }
        if !(0.0..=1.0).contains(&self.forward_weight) {
            return Err(AnatomyError::invalid_parameter(
                "forward_weight",
                self.forward_weight,
                "must lie in [0, 1]",
            ));
        }
        if self.chunk_size == 0 {
            return Err(AnatomyError::invalid_parameter(
                "chunk_size",
                0.0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Finished curvature pass.
#[derive(Debug)]
pub struct CurvatureField {
    /// One value per vertex, all finite and non-negative.
    pub values: Vec<f64>,
    /// Neighbourhood radius used, in mesh units.
    pub radius: f64,
    /// Largest value in `values` (0 for a flat mesh).
    pub max: f64,
    /// Index built for the pass, reusable by later stages.
    pub index: SpatialIndex,
}

/// Resumable curvature computation over one mesh.
pub struct CurvatureJob<'a> {
    mesh: &'a Mesh,
    normals: Vec<Vector3<f64>>,
    index: SpatialIndex,
    forward: Vector3<f64>,
    radius: f64,
    params: CurvatureParams,
    values: Vec<f64>,
    tracker: ProgressTracker,
}

impl std::fmt::Debug for CurvatureJob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurvatureJob")
            .field("vertices", &self.mesh.vertex_count())
            .field("processed", &self.values.len())
            .field("radius", &self.radius)
            .finish()
    }
}

impl<'a> CurvatureJob<'a> {
    /// Validate the mesh, build the spatial index and pick the radius.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::EmptyMesh`] for a mesh without vertices,
    /// [`AnatomyError::MissingAttribute`] when any vertex lacks a normal, and
    /// [`AnatomyError::InvalidParameter`] for out-of-range params.
    pub fn new(mesh: &'a Mesh, frame: &BodyFrame, params: CurvatureParams) -> AnatomyResult<Self> {
        params.validate()?;
        if mesh.vertices.is_empty() {
            return Err(AnatomyError::empty_mesh("curvature pass needs at least one vertex"));
        }
        let normals: Vec<Vector3<f64>> = mesh.vertices.iter().filter_map(|v| v.normal).collect();
        if normals.len() != mesh.vertices.len() {
            return Err(AnatomyError::missing_attribute(
                "normal",
                mesh.vertices.len() - normals.len(),
            ));
        }

        let index = SpatialIndex::build(mesh);
        let radius = adaptive_radius(mesh, &index, &params);
        debug!(
            target: "mesh_anatomy::curvature",
            vertices = mesh.vertex_count(),
            radius = format!("{:.5}", radius),
            chunk_size = params.chunk_size,
            "Curvature pass prepared"
        );

        Ok(Self {
            mesh,
            normals,
            index,
            forward: frame.forward.unit(),
            radius,
            tracker: ProgressTracker::new(mesh.vertices.len() as u64),
            values: Vec::with_capacity(mesh.vertices.len()),
            params,
        })
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    #[inline]
    pub fn processed(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.mesh.vertices.len()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.values.len() >= self.total()
    }

    /// Process the next chunk.
    pub fn step(&mut self) -> JobStatus {
        let start = self.values.len();
        let end = (start + self.params.chunk_size).min(self.total());
        if start >= end {
            return JobStatus::Complete;
        }

        let chunk: Vec<f64> = (start..end)
            .into_par_iter()
            .map(|i| self.vertex_curvature(i))
            .collect();
        self.values.extend(chunk);
        self.tracker.set(self.values.len() as u64);

        trace!(
            target: "mesh_anatomy::curvature",
            processed = self.values.len(),
            total = self.total(),
            "Curvature chunk done"
        );

        if self.is_complete() {
            JobStatus::Complete
        } else {
            JobStatus::Pending(self.tracker.snapshot("Estimating curvature"))
        }
    }

    /// Drive the job to completion, reporting between chunks.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::Cancelled`] if `callback` returns `false`.
    pub fn run(mut self, callback: Option<&ProgressCallback>) -> AnatomyResult<CurvatureField> {
        let _timer = OperationTimer::with_context(
            "curvature_pass",
            self.mesh.face_count(),
            self.mesh.vertex_count(),
        );
        while let JobStatus::Pending(_) = self.step() {
            log_progress("curvature_pass", self.processed(), self.total(), None);
            if !self.tracker.maybe_callback(callback, "Estimating curvature") {
                return Err(AnatomyError::cancelled(
                    "curvature pass",
                    self.processed(),
                    self.total(),
                ));
            }
        }
        Ok(self.into_field())
    }

    /// Take the result. `None` until [`step`](Self::step) has returned `Complete`.
    pub fn finish(self) -> Option<CurvatureField> {
        self.is_complete().then(|| self.into_field())
    }

    fn into_field(self) -> CurvatureField {
        let max = self.values.iter().copied().fold(0.0, f64::max);
        info!(
            target: "mesh_anatomy::curvature",
            vertices = self.values.len(),
            radius = format!("{:.5}", self.radius),
            max = format!("{:.5}", max),
            "Curvature pass completed"
        );
        CurvatureField {
            values: self.values,
            radius: self.radius,
            max,
            index: self.index,
        }
    }

    fn vertex_curvature(&self, i: usize) -> f64 {
        let p = &self.mesh.vertices[i].position;
        let n = &self.normals[i];

        let mut deviation = 0.0;
        let mut count = 0usize;
        for neighbor in self.index.within_radius(p, self.radius) {
            if neighbor.index == i {
                continue;
            }
            let q = &self.mesh.vertices[neighbor.index].position;
            let m = &self.normals[neighbor.index];
            count += 1;
            // Convex: normals diverge as we walk away from the vertex.
            if self.params.convex_only && (q - p).dot(&(m - n)) < 0.0 {
                continue;
            }
            deviation += (1.0 - n.dot(m)).clamp(0.0, 2.0);
        }
        if count == 0 {
            return 0.0;
        }

        let facing = n.dot(&self.forward).max(0.0);
        let orientation = (1.0 - self.params.forward_weight) + self.params.forward_weight * facing;
        deviation / count as f64 * orientation
    }
}

/// Median spacing × `radius_factor`, clamped to fractions of the bbox diagonal.
pub fn adaptive_radius(mesh: &Mesh, index: &SpatialIndex, params: &CurvatureParams) -> f64 {
    let diagonal = mesh.bounds().map(|b| b.diagonal()).unwrap_or(0.0);
    let lo = diagonal * params.min_radius_fraction;
    let hi = diagonal * params.max_radius_fraction;

    let radius = index
        .median_spacing(mesh, params.spacing_samples)
        .map(|spacing| (spacing * params.radius_factor).clamp(lo, hi.max(lo)))
        .unwrap_or(lo);

    radius.max(f64::EPSILON)
}

/// Run a full pass without progress reporting.
pub fn compute_curvature(
    mesh: &Mesh,
    frame: &BodyFrame,
    params: CurvatureParams,
) -> AnatomyResult<CurvatureField> {
    CurvatureJob::new(mesh, frame, params)?.run(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normals::compute_vertex_normals;
    use crate::types::Vertex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Heightfield grid in the XY plane facing +Z, with a gaussian bump at the center.
    fn make_bump_grid(n: usize, bump_height: f64) -> Mesh {
        let mut mesh = Mesh::new();
        let half = (n - 1) as f64 / 2.0;
        for j in 0..n {
            for i in 0..n {
                let x = (i as f64 - half) / half;
                let y = (j as f64 - half) / half;
                let z = bump_height * (-(x * x + y * y) / 0.05).exp();
                mesh.vertices.push(Vertex::from_coords(x, y, z));
            }
        }
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let a = (j * n + i) as u32;
                let b = a + 1;
                let c = a + n as u32;
                let d = c + 1;
                mesh.faces.push([a, b, d]);
                mesh.faces.push([a, d, c]);
            }
        }
        compute_vertex_normals(&mut mesh);
        mesh
    }

    #[test]
    fn test_flat_grid_has_zero_curvature() {
        let mesh = make_bump_grid(15, 0.0);
        let field = compute_curvature(&mesh, &BodyFrame::default(), CurvatureParams::default())
            .unwrap();
        assert_eq!(field.values.len(), mesh.vertex_count());
        assert!(field.max < 1e-12, "flat grid max curvature {}", field.max);
    }

    #[test]
    fn test_bump_peak_is_highest() {
        let n = 31;
        let mesh = make_bump_grid(n, 0.3);
        let field = compute_curvature(&mesh, &BodyFrame::default(), CurvatureParams::default())
            .unwrap();

        let center = (n / 2) * n + n / 2;
        let corner = 0;
        assert!(
            field.values[center] > field.values[corner],
            "center {} should exceed corner {}",
            field.values[center],
            field.values[corner]
        );
        assert!(field.values.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_missing_normals_rejected() {
        let mut mesh = make_bump_grid(5, 0.1);
        mesh.vertices[3].normal = None;
        let err = CurvatureJob::new(&mesh, &BodyFrame::default(), CurvatureParams::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AnatomyError::MissingAttribute {
                attribute: "normal",
                missing: 1
            }
        ));
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let err = CurvatureJob::new(&Mesh::new(), &BodyFrame::default(), CurvatureParams::default())
            .unwrap_err();
        assert!(matches!(err, AnatomyError::EmptyMesh { .. }));
    }

    #[test]
    fn test_step_yields_per_chunk() {
        let mesh = make_bump_grid(11, 0.2); // 121 vertices
        let params = CurvatureParams::default().with_chunk_size(50);
        let mut job = CurvatureJob::new(&mesh, &BodyFrame::default(), params).unwrap();

        let mut pending = 0;
        while let JobStatus::Pending(progress) = job.step() {
            pending += 1;
            assert!(progress.current < progress.total);
        }
        assert_eq!(pending, 2);
        assert!(job.is_complete());
        assert!(job.step().is_complete());

        let field = job.finish().unwrap();
        assert_eq!(field.values.len(), 121);
    }

    #[test]
    fn test_chunked_matches_single_chunk() {
        let mesh = make_bump_grid(13, 0.25);
        let a = compute_curvature(
            &mesh,
            &BodyFrame::default(),
            CurvatureParams::default().with_chunk_size(7),
        )
        .unwrap();
        let b = compute_curvature(
            &mesh,
            &BodyFrame::default(),
            CurvatureParams::default().with_chunk_size(10_000),
        )
        .unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn test_finish_before_complete_is_none() {
        let mesh = make_bump_grid(11, 0.2);
        let job = CurvatureJob::new(
            &mesh,
            &BodyFrame::default(),
            CurvatureParams::default().with_chunk_size(10),
        )
        .unwrap();
        assert!(job.finish().is_none());
    }

    #[test]
    fn test_callback_cancels() {
        let mesh = make_bump_grid(11, 0.2);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let callback: ProgressCallback = Box::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            false
        });
        let job = CurvatureJob::new(
            &mesh,
            &BodyFrame::default(),
            CurvatureParams::default().with_chunk_size(10),
        )
        .unwrap();
        let err = job.run(Some(&callback)).unwrap_err();
        assert!(matches!(err, AnatomyError::Cancelled { completed: 10, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_radius_scales_with_resolution() {
        let coarse = make_bump_grid(11, 0.0);
        let dense = make_bump_grid(41, 0.0);
        let params = CurvatureParams {
            max_radius_fraction: 0.5,
            ..Default::default()
        };
        let r_coarse = adaptive_radius(&coarse, &SpatialIndex::build(&coarse), &params);
        let r_dense = adaptive_radius(&dense, &SpatialIndex::build(&dense), &params);
        assert!(
            r_dense < r_coarse,
            "dense radius {} should be below coarse radius {}",
            r_dense,
            r_coarse
        );
    }

    #[test]
    fn test_invalid_params() {
        assert!(CurvatureParams::default().with_chunk_size(0).validate().is_err());
        assert!(CurvatureParams::default().with_radius_factor(-1.0).validate().is_err());
        assert!(CurvatureParams::smooth().validate().is_ok());
        assert!(CurvatureParams::sharp().validate().is_ok());
    }
}
