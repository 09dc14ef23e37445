//! Automatic region and landmark detection from mesh geometry.
//!
//! Runs after the curvature pass ([`crate::curvature`]):
//!
//! 1. **Region box**: a vertex belongs to the region of interest when it lies in
//!    the upper, forward part of the bounding box and off the midline. Its side
//!    comes from the lateral coordinate relative to the central vertical plane.
//! 2. **Threshold**: the first percentile threshold whose candidate count lands
//!    inside an acceptable band wins; otherwise a fraction of the maximum.
//! 3. **Clustering**: candidates are split by side, and each side drops vertices
//!    farther than a multiple of the median centroid distance.
//! 4. **Landmark**: the best scoring vertex of each region (curvature plus
//!    centrality, or forward prominence).
//!
//! A side without enough candidates yields no region and no landmark. That is
//! a partial result, not an error.
//!
//! Every constant lives in [`AnalysisParams`]. They are heuristics, not
//! validated anatomical thresholds.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::annotation::Landmark;
use crate::curvature::{CurvatureField, CurvatureJob, CurvatureParams};
use crate::error::{AnatomyError, AnatomyResult, require_positive};
use crate::progress::ProgressCallback;
use crate::tracing_ext::{OperationTimer, log_analysis_result};
use crate::types::{Aabb, BodyFrame, Mesh, Side, SideMap};

/// How the landmark is chosen inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkStrategy {
    /// Weighted curvature plus closeness to the region centroid.
    #[default]
    CurvatureCentrality,
    /// The most forward vertex; curvature breaks ties.
    Prominence,
}

/// Tunables for region and landmark detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Accepted span along the up axis, as fractions of the bbox extent.
    pub up_range: [f64; 2],
    /// Minimum forward position, as a fraction of the bbox extent.
    pub forward_min: f64,
    /// Maximum lateral offset from the midline, as a fraction of the half width.
    pub lateral_max: f64,
    /// Lateral band around the midline excluded from both sides.
    pub midline_gap: f64,
    /// Candidate percentiles, tried in order (0.9 = top 10%).
    pub percentiles: Vec<f64>,
    /// Acceptable candidate share of the region vertex count.
    pub candidate_band: [f64; 2],
    /// Threshold as a fraction of the maximum curvature when no percentile fits.
    pub fallback_max_fraction: f64,
    /// Candidates beyond this multiple of the median centroid distance are dropped.
    pub outlier_factor: f64,
    /// A side needs at least this many vertices to form a region.
    pub min_region_vertices: usize,
    pub landmark_strategy: LandmarkStrategy,
    pub curvature_weight: f64,
    pub centrality_weight: f64,
    pub curvature: CurvatureParams,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            up_range: [0.45, 0.85],
            forward_min: 0.5,
            lateral_max: 0.9,
            midline_gap: 0.02,
            percentiles: vec![0.9, 0.8, 0.7],
            candidate_band: [0.02, 0.35],
            fallback_max_fraction: 0.5,
            outlier_factor: 2.0,
            min_region_vertices: 5,
            landmark_strategy: LandmarkStrategy::CurvatureCentrality,
            curvature_weight: 0.6,
            centrality_weight: 0.4,
            curvature: CurvatureParams::default(),
        }
    }
}

impl AnalysisParams {
    pub fn with_curvature(mut self, curvature: CurvatureParams) -> Self {
        self.curvature = curvature;
        self
    }

    pub fn with_up_range(mut self, lo: f64, hi: f64) -> Self {
        self.up_range = [lo, hi];
        self
    }

    pub fn with_forward_min(mut self, forward_min: f64) -> Self {
        self.forward_min = forward_min;
        self
    }

    pub fn with_landmark_strategy(mut self, strategy: LandmarkStrategy) -> Self {
        self.landmark_strategy = strategy;
        self
    }

    pub fn with_min_region_vertices(mut self, count: usize) -> Self {
        self.min_region_vertices = count;
        self
    }

    pub fn validate(&self) -> AnatomyResult<()> {
        self.curvature.validate()?;
        check_fraction("up_range.lo", self.up_range[0])?;
        check_fraction("up_range.hi", self.up_range[1])?;
        if self.up_range[0] > self.up_range[1] {
            return Err(AnatomyError::invalid_parameter(
                "up_range.lo",
                self.up_range[0],
                "must not exceed up_range.hi",
            ));
        }
        check_fraction("forward_min", self.forward_min)?;
        check_fraction("lateral_max", self.lateral_max)?;
        check_fraction("midline_gap", self.midline_gap)?;
        for &p in &self.percentiles {
            check_fraction("percentiles", p)?;
        }
        check_fraction("candidate_band.lo", self.candidate_band[0])?;
        check_fraction("candidate_band.hi", self.candidate_band[1])?;
        check_fraction("fallback_max_fraction", self.fallback_max_fraction)?;
        require_positive("outlier_factor", self.outlier_factor)?;
        if self.curvature_weight < 0.0 || self.centrality_weight < 0.0 {
            return Err(AnatomyError::invalid_parameter(
                "curvature_weight",
                self.curvature_weight.min(self.centrality_weight),
                "weights must be non-negative",
            ));
        }
        Ok(())
    }
}

fn check_fraction(name: &'static str, value: f64) -> AnatomyResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AnatomyError::invalid_parameter(name, value, "must lie in [0, 1]"))
    }
}

/// Derived per-vertex record. Recomputed on every run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VertexFeature {
    pub index: u32,
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
    pub curvature: f64,
    pub in_region: bool,
    pub is_candidate: bool,
    pub side: Option<Side>,
}

/// Clustered high-curvature vertices on one side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub side: Side,
    pub features: Vec<VertexFeature>,
    pub bounds: Aabb,
    pub centroid: Point3<f64>,
    /// Largest centroid distance of any member.
    pub radius: f64,
}

impl Region {
    fn from_features(side: Side, features: Vec<VertexFeature>) -> Option<Self> {
        let bounds = Aabb::from_points(features.iter().map(|f| &f.position))?;
        let centroid = centroid_of(&features);
        let radius = features
            .iter()
            .map(|f| (f.position - centroid).norm())
            .fold(0.0, f64::max);
        Some(Self {
            side,
            features,
            bounds,
            centroid,
            radius,
        })
    }

    pub fn vertex_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.features.iter().map(|f| f.index)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Where the curvature threshold came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ThresholdSource {
    /// Percentile of the region's curvature distribution (0.9 = top 10%).
    Percentile(f64),
    /// Fraction of the maximum region curvature.
    MaxFraction(f64),
}

impl fmt::Display for ThresholdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdSource::Percentile(p) => write!(f, "top {:.0}%", (1.0 - p) * 100.0),
            ThresholdSource::MaxFraction(frac) => write!(f, "{:.0}% of max", frac * 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvatureThreshold {
    pub value: f64,
    pub source: ThresholdSource,
}

/// Output of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub features: Vec<VertexFeature>,
    pub regions: SideMap<Region>,
    pub landmarks: SideMap<Landmark>,
    pub threshold: CurvatureThreshold,
    /// Curvature neighbourhood radius, in mesh units.
    pub radius: f64,
    pub region_vertex_count: usize,
    pub candidate_count: usize,
    /// Mesh bounds at analysis time.
    pub bounds: Aabb,
    /// Lateral coordinate of the central vertical plane.
    pub midline: f64,
    pub frame: BodyFrame,
}

impl AnalysisResult {
    /// Both sides produced a landmark.
    pub fn is_complete(&self) -> bool {
        self.landmarks.pair().is_some()
    }

    pub fn region(&self, side: Side) -> Option<&Region> {
        self.regions.get(side)
    }

    pub fn landmark(&self, side: Side) -> Option<&Landmark> {
        self.landmarks.get(side)
    }
}

/// Run the full analysis without progress reporting.
///
/// # Errors
///
/// [`AnatomyError::EmptyMesh`] for a mesh without vertices and
/// [`AnatomyError::MissingAttribute`] when vertex normals are absent.
pub fn analyze(mesh: &Mesh, frame: &BodyFrame, params: &AnalysisParams) -> AnatomyResult<AnalysisResult> {
    analyze_with_progress(mesh, frame, params, None)
}

/// Run the full analysis, reporting curvature progress to `callback`.
pub fn analyze_with_progress(
    mesh: &Mesh,
    frame: &BodyFrame,
    params: &AnalysisParams,
    callback: Option<&ProgressCallback>,
) -> AnatomyResult<AnalysisResult> {
    params.validate()?;
    let field = CurvatureJob::new(mesh, frame, params.curvature.clone())?.run(callback)?;
    classify(mesh, frame, params, &field)
}

/// Steps 2 to 4 over a finished curvature pass.
///
/// Lets a host drive [`CurvatureJob::step`] itself and classify afterwards.
pub fn classify(
    mesh: &Mesh,
    frame: &BodyFrame,
    params: &AnalysisParams,
    field: &CurvatureField,
) -> AnatomyResult<AnalysisResult> {
    let _timer = OperationTimer::with_context("region_detection", mesh.face_count(), mesh.vertex_count());
    params.validate()?;
    if !frame.is_valid() {
        return Err(AnatomyError::invalid_parameter(
            "frame",
            0.0,
            "up and forward must be different axes",
        ));
    }
    if field.values.len() != mesh.vertex_count() {
        return Err(AnatomyError::attribute_mismatch(
            "curvature",
            mesh.vertex_count(),
            field.values.len(),
        ));
    }
    let bounds = mesh
        .bounds()
        .ok_or_else(|| AnatomyError::empty_mesh("analysis needs at least one vertex"))?;

    let region_box = RegionBox::new(&bounds, frame, params);
    let mut features: Vec<VertexFeature> = mesh
        .vertices
        .iter()
        .zip(&field.values)
        .enumerate()
        .map(|(i, (v, &curvature))| {
            let side = region_box.side_of(&v.position);
            VertexFeature {
                index: i as u32,
                position: v.position,
                normal: v.normal.unwrap_or_else(Vector3::zeros),
                curvature,
                in_region: side.is_some(),
                is_candidate: false,
                side,
            }
        })
        .collect();

    let region_values: Vec<f64> = features
        .iter()
        .filter(|f| f.in_region)
        .map(|f| f.curvature)
        .collect();
    let region_vertex_count = region_values.len();
    let threshold = select_threshold(&region_values, params);

    let mut candidate_count = 0;
    for feature in features.iter_mut().filter(|f| f.in_region) {
        feature.is_candidate = feature.curvature > 0.0 && feature.curvature >= threshold.value;
        candidate_count += usize::from(feature.is_candidate);
    }

    let mut regions = SideMap::new();
    let mut landmarks = SideMap::new();
    for side in Side::BOTH {
        let candidates: Vec<VertexFeature> = features
            .iter()
            .filter(|f| f.is_candidate && f.side == Some(side))
            .copied()
            .collect();
        let Some(region) = cluster_side(side, candidates, params) else {
            continue;
        };
        if let Some(landmark) = select_landmark(&region, frame, params) {
            landmarks.set(side, landmark);
        }
        regions.set(side, region);
    }

    let result = AnalysisResult {
        features,
        regions,
        landmarks,
        threshold,
        radius: field.radius,
        region_vertex_count,
        candidate_count,
        bounds,
        midline: region_box.midline,
        frame: *frame,
    };
    log_analysis_result(&result);
    Ok(result)
}

/// The upper-middle-forward box, in frame coordinates.
struct RegionBox {
    frame: BodyFrame,
    up: [f64; 2],
    forward_min: f64,
    midline: f64,
    lateral_gap: f64,
    lateral_max: f64,
}

impl RegionBox {
    fn new(bounds: &Aabb, frame: &BodyFrame, params: &AnalysisParams) -> Self {
        let up_lo = frame.up_of(&bounds.min);
        let up_extent = bounds.extent_along(frame.up);
        let forward_lo = frame.forward_of(&bounds.min);
        let forward_extent = bounds.extent_along(frame.forward);
        let half_width = bounds.extent_along(frame.lateral()) / 2.0;

        Self {
            frame: *frame,
            up: [
                up_lo + up_extent * params.up_range[0],
                up_lo + up_extent * params.up_range[1],
            ],
            forward_min: forward_lo + forward_extent * params.forward_min,
            midline: frame.lateral_of(&bounds.center()),
            lateral_gap: half_width * params.midline_gap,
            lateral_max: half_width * params.lateral_max,
        }
    }

    /// Side for a vertex inside the box, `None` outside.
    fn side_of(&self, p: &Point3<f64>) -> Option<Side> {
        let up = self.frame.up_of(p);
        if up < self.up[0] || up > self.up[1] {
            return None;
        }
        if self.frame.forward_of(p) < self.forward_min {
            return None;
        }
        let lateral = self.frame.lateral_of(p);
        let offset = (lateral - self.midline).abs();
        if offset < self.lateral_gap || offset > self.lateral_max {
            return None;
        }
        Some(self.frame.side_of(lateral, self.midline))
    }
}

/// Pick the first percentile whose candidate share fits the band, else a
/// fraction of the maximum.
pub fn select_threshold(values: &[f64], params: &AnalysisParams) -> CurvatureThreshold {
    let max = values.iter().copied().fold(0.0, f64::max);
    let fallback = CurvatureThreshold {
        value: max * params.fallback_max_fraction,
        source: ThresholdSource::MaxFraction(params.fallback_max_fraction),
    };
    if values.is_empty() || max <= 0.0 {
        return fallback;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let [band_lo, band_hi] = params.candidate_band;

    for &p in &params.percentiles {
        let value = sorted[((n - 1) as f64 * p).floor() as usize];
        if value <= 0.0 {
            continue;
        }
        let count = n - sorted.partition_point(|&v| v < value);
        let share = count as f64 / n as f64;
        debug!(
            target: "mesh_anatomy::analysis",
            percentile = p,
            threshold = format!("{:.5}", value),
            share = format!("{:.3}", share),
            "Threshold candidate"
        );
        if (band_lo..=band_hi).contains(&share) {
            return CurvatureThreshold {
                value,
                source: ThresholdSource::Percentile(p),
            };
        }
    }

    warn!(
        target: "mesh_anatomy::analysis",
        fraction = params.fallback_max_fraction,
        "No percentile threshold fit the candidate band; using fraction of max"
    );
    fallback
}

/// Outlier rejection around the centroid, then the minimum-size check.
fn cluster_side(side: Side, candidates: Vec<VertexFeature>, params: &AnalysisParams) -> Option<Region> {
    if candidates.len() < params.min_region_vertices.max(1) {
        debug!(
            target: "mesh_anatomy::analysis",
            side = %side,
            candidates = candidates.len(),
            "Too few candidates for a region"
        );
        return None;
    }

    let centroid = centroid_of(&candidates);
    let mut distances: Vec<f64> = candidates
        .iter()
        .map(|f| (f.position - centroid).norm())
        .collect();
    let cutoff = {
        let mid = distances.len() / 2;
        let (_, median, _) = distances.select_nth_unstable_by(mid, f64::total_cmp);
        *median * params.outlier_factor
    };

    let kept: Vec<VertexFeature> = if cutoff > 0.0 {
        candidates
            .into_iter()
            .filter(|f| (f.position - centroid).norm() <= cutoff)
            .collect()
    } else {
        candidates
    };

    if kept.len() < params.min_region_vertices.max(1) {
        debug!(
            target: "mesh_anatomy::analysis",
            side = %side,
            kept = kept.len(),
            "Region too small after outlier rejection"
        );
        return None;
    }
    Region::from_features(side, kept)
}

fn select_landmark(region: &Region, frame: &BodyFrame, params: &AnalysisParams) -> Option<Landmark> {
    let best = match params.landmark_strategy {
        LandmarkStrategy::CurvatureCentrality => {
            let max_curvature = region
                .features
                .iter()
                .map(|f| f.curvature)
                .fold(0.0, f64::max);
            let score = |f: &VertexFeature| {
                let curvature = if max_curvature > 0.0 {
                    f.curvature / max_curvature
                } else {
                    0.0
                };
                let centrality = if region.radius > 0.0 {
                    1.0 - (f.position - region.centroid).norm() / region.radius
                } else {
                    1.0
                };
                params.curvature_weight * curvature + params.centrality_weight * centrality
            };
            region
                .features
                .iter()
                .max_by(|a, b| score(a).total_cmp(&score(b)))
        }
        LandmarkStrategy::Prominence => region.features.iter().max_by(|a, b| {
            frame
                .forward_of(&a.position)
                .total_cmp(&frame.forward_of(&b.position))
                .then(a.curvature.total_cmp(&b.curvature))
        }),
    }?;
    Some(Landmark::automatic(region.side, best.position))
}

fn centroid_of(features: &[VertexFeature]) -> Point3<f64> {
    if features.is_empty() {
        return Point3::origin();
    }
    let sum = features
        .iter()
        .fold(Vector3::zeros(), |acc, f| acc + f.position.coords);
    Point3::from(sum / features.len() as f64)
}
