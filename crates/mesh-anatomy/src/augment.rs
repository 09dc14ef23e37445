//! Local augmentation deformation.
//!
//! Each [`DeformationTarget`] displaces the vertices within its influence
//! radius. The displacement is a forward push along the target's outward axis,
//! an in-plane radial expansion, and an optional translation, all scaled by a
//! smooth falloff `(1 − d/R)²` that reaches zero at the radius. Vertices at or
//! beyond the radius never move.
//!
//! The input mesh is never modified. [`augment`] computes the complete
//! displaced buffer on a copy, refreshes the affected normals and hands the
//! finished mesh back, so callers only ever observe a fully deformed state.
//!
//! # Example
//!
//! ```
//! use mesh_anatomy::augment::{AugmentConfig, AugmentationParams, DeformationTarget, augment};
//! use mesh_anatomy::types::{BodyFrame, Side};
//! use mesh_anatomy::volume::hemisphere;
//! use nalgebra::Point3;
//!
//! let mesh = hemisphere(Point3::origin(), 1.0, 32, 16);
//! let target = DeformationTarget::new(Side::Left, Point3::new(0.0, 0.0, 1.0), &BodyFrame::default(), 1.0);
//!
//! let params = AugmentationParams::default().with_projection_multiplier(1.3);
//! let result = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
//! assert!(result.max_displacement > 0.0);
//! ```

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::analysis::AnalysisResult;
use crate::annotation::{AnnotationSet, Contour, Landmark};
use crate::error::{AnatomyError, AnatomyResult, require_positive};
use crate::normals::recompute_normals_near;
use crate::tracing_ext::{OperationTimer, log_perf_section};
use crate::types::{BodyFrame, Mesh, Side};

// ============================================================================
// Parameters
// ============================================================================

/// Implant outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplantShape {
    #[default]
    Round,
    /// More fill below the landmark than above it.
    Teardrop,
    /// Anatomical shape with a flattened upper pole.
    Gummy,
}

/// Implant profile. Scales the forward component only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplantProfile {
    Low,
    #[default]
    Moderate,
    High,
    UltraHigh,
}

impl ImplantProfile {
    pub const ALL: [ImplantProfile; 4] = [
        ImplantProfile::Low,
        ImplantProfile::Moderate,
        ImplantProfile::High,
        ImplantProfile::UltraHigh,
    ];

    /// Forward multiplier; strictly increasing from `Low` to `UltraHigh`.
    pub fn multiplier(self) -> f64 {
        match self {
            ImplantProfile::Low => 0.85,
            ImplantProfile::Moderate => 1.0,
            ImplantProfile::High => 1.15,
            ImplantProfile::UltraHigh => 1.3,
        }
    }
}

impl fmt::Display for ImplantProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplantProfile::Low => f.write_str("low"),
            ImplantProfile::Moderate => f.write_str("moderate"),
            ImplantProfile::High => f.write_str("high"),
            ImplantProfile::UltraHigh => f.write_str("ultra-high"),
        }
    }
}

/// User-facing augmentation controls. `Default` is the neutral setting,
/// which leaves the mesh unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationParams {
    pub size_multiplier: f64,
    pub projection_multiplier: f64,
    /// Extra fill above the landmark, -1..=1.
    pub upper_pole_fullness: f64,
    /// Extra fill below the landmark, -1..=1.
    pub lower_pole_fullness: f64,
    /// Shift along the up axis, -1..=1 (fraction of the scaled radius).
    pub height_offset: f64,
    /// Shift toward the midline, -1..=1.
    pub medial_offset: f64,
    pub shape: ImplantShape,
    pub profile: ImplantProfile,
}

impl Default for AugmentationParams {
    fn default() -> Self {
        Self {
            size_multiplier: 1.0,
            projection_multiplier: 1.0,
            upper_pole_fullness: 0.0,
            lower_pole_fullness: 0.0,
            height_offset: 0.0,
            medial_offset: 0.0,
            shape: ImplantShape::Round,
            profile: ImplantProfile::Moderate,
        }
    }
}

impl AugmentationParams {
    pub fn with_size_multiplier(mut self, size: f64) -> Self {
        self.size_multiplier = size;
        self
    }

    pub fn with_projection_multiplier(mut self, projection: f64) -> Self {
        self.projection_multiplier = projection;
        self
    }

    pub fn with_pole_fullness(mut self, upper: f64, lower: f64) -> Self {
        self.upper_pole_fullness = upper;
        self.lower_pole_fullness = lower;
        self
    }

    pub fn with_offsets(mut self, height: f64, medial: f64) -> Self {
        self.height_offset = height;
        self.medial_offset = medial;
        self
    }

    pub fn with_shape(mut self, shape: ImplantShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_profile(mut self, profile: ImplantProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Whether these parameters leave every vertex in place.
    pub fn is_neutral(&self) -> bool {
        *self == Self {
            shape: self.shape,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// [`AnatomyError::InvalidParameter`] for non-positive or non-finite
    /// multipliers and for fullness/offset values outside -1..=1.
    pub fn validate(&self) -> AnatomyResult<()> {
        require_positive("size_multiplier", self.size_multiplier)?;
        require_positive("projection_multiplier", self.projection_multiplier)?;
        for (name, value) in [
            ("upper_pole_fullness", self.upper_pole_fullness),
            ("lower_pole_fullness", self.lower_pole_fullness),
            ("height_offset", self.height_offset),
            ("medial_offset", self.medial_offset),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(AnatomyError::invalid_parameter(name, value, "must be within -1..=1"));
            }
        }
        Ok(())
    }
}

/// Tuning constants for the displacement field. Heuristic, not physical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Forward push per unit of multiplier change, as a fraction of the radius.
    pub projection_gain: f64,
    /// In-plane expansion per unit of size change.
    pub radial_gain: f64,
    /// Influence radius as a multiple of the region or contour radius.
    pub influence_factor: f64,
    /// How much a teardrop shifts fill from the upper to the lower pole.
    pub teardrop_bias: f64,
    /// Upper-pole reduction for the gummy shape.
    pub gummy_upper_flatten: f64,
    /// Offset translation at full deflection, as a fraction of the radius.
    pub offset_scale: f64,
    /// Radius, as a fraction of the influence radius, over which normals are
    /// averaged to find the outward axis.
    pub normal_sample_fraction: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            projection_gain: 0.5,
            radial_gain: 1.0,
            influence_factor: 1.5,
            teardrop_bias: 0.35,
            gummy_upper_flatten: 0.2,
            offset_scale: 0.25,
            normal_sample_fraction: 0.25,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> AnatomyResult<()> {
        require_positive("projection_gain", self.projection_gain)?;
        require_positive("influence_factor", self.influence_factor)?;
        require_positive("normal_sample_fraction", self.normal_sample_fraction)?;
        for (name, value) in [
            ("radial_gain", self.radial_gain),
            ("offset_scale", self.offset_scale),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnatomyError::invalid_parameter(name, value, "must be finite and non-negative"));
            }
        }
        // Keeps the shape weight positive over the whole -1..=1 band.
        for (name, value) in [
            ("teardrop_bias", self.teardrop_bias),
            ("gummy_upper_flatten", self.gummy_upper_flatten),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(AnatomyError::invalid_parameter(name, value, "must be within 0..1"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Targets
// ============================================================================

/// Where and how far one side's deformation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeformationTarget {
    pub side: Side,
    /// Landmark position; displacement peaks here.
    pub center: Point3<f64>,
    /// Unit outward axis.
    pub forward: Vector3<f64>,
    /// Unit up axis, orthogonal to `forward`.
    pub up: Vector3<f64>,
    /// Unit vector from the side toward the body midline.
    pub toward_midline: Vector3<f64>,
    /// Influence radius.
    pub radius: f64,
}

impl DeformationTarget {
    /// Target whose outward axis is the body frame's forward axis.
    pub fn new(side: Side, center: Point3<f64>, frame: &BodyFrame, radius: f64) -> Self {
        Self::oriented(side, center, frame.forward.unit(), frame, radius)
    }

    fn oriented(side: Side, center: Point3<f64>, forward: Vector3<f64>, frame: &BodyFrame, radius: f64) -> Self {
        let up_axis = frame.up.unit();
        let up = (up_axis - forward * up_axis.dot(&forward))
            .try_normalize(f64::EPSILON)
            .unwrap_or(up_axis);
        Self {
            side,
            center,
            forward,
            up,
            toward_midline: -frame.outward(side),
            radius,
        }
    }

    /// Target at a detected landmark, reaching `influence_factor` region radii.
    pub fn from_region(
        mesh: &Mesh,
        landmark: &Landmark,
        region_radius: f64,
        frame: &BodyFrame,
        config: &AugmentConfig,
    ) -> AnatomyResult<Self> {
        let radius = require_positive("region_radius", region_radius)? * config.influence_factor;
        let forward = outward_axis(mesh, &landmark.position, radius * config.normal_sample_fraction, frame);
        Ok(Self::oriented(landmark.side, landmark.position, forward, frame, radius))
    }

    /// Target from a contour, centered on its landmark when one is placed and
    /// on the contour centroid otherwise.
    pub fn from_annotations(
        mesh: &Mesh,
        contour: &Contour,
        landmark: Option<&Landmark>,
        frame: &BodyFrame,
        config: &AugmentConfig,
    ) -> AnatomyResult<Self> {
        let center = landmark.map_or_else(|| contour.centroid(), |l| l.position);
        let radius = require_positive("contour_radius", contour.radius())? * config.influence_factor;
        let forward = outward_axis(mesh, &center, radius * config.normal_sample_fraction, frame);
        Ok(Self::oriented(contour.side(), center, forward, frame, radius))
    }

    /// Influence weight at `point`.
    pub fn weight_at(&self, point: &Point3<f64>) -> f64 {
        falloff_weight((point - self.center).norm(), self.radius)
    }
}

/// Targets for every side with both a region and a landmark.
pub fn targets_from_analysis(
    mesh: &Mesh,
    result: &AnalysisResult,
    config: &AugmentConfig,
) -> AnatomyResult<Vec<DeformationTarget>> {
    Side::BOTH
        .into_iter()
        .filter_map(|side| Some((result.region(side)?, result.landmark(side)?)))
        .map(|(region, landmark)| DeformationTarget::from_region(mesh, landmark, region.radius, &result.frame, config))
        .collect()
}

/// Targets for every side with a contour.
pub fn targets_from_annotations(
    mesh: &Mesh,
    annotations: &AnnotationSet,
    frame: &BodyFrame,
    config: &AugmentConfig,
) -> AnatomyResult<Vec<DeformationTarget>> {
    annotations
        .contours
        .iter()
        .map(|(side, contour)| {
            DeformationTarget::from_annotations(mesh, contour, annotations.landmark(side), frame, config)
        })
        .collect()
}

/// Mean vertex normal within `radius` of `center`, oriented along the body's
/// forward axis. Falls back to the forward axis when no normal is available.
fn outward_axis(mesh: &Mesh, center: &Point3<f64>, radius: f64, frame: &BodyFrame) -> Vector3<f64> {
    let forward = frame.forward.unit();
    let r2 = radius * radius;
    let sum: Vector3<f64> = mesh
        .vertices
        .iter()
        .filter(|v| (v.position - center).norm_squared() <= r2)
        .filter_map(|v| v.normal)
        .sum();
    match sum.try_normalize(f64::EPSILON) {
        Some(n) if n.dot(&forward) >= 0.0 => n,
        Some(n) => -n,
        None => forward,
    }
}

// ============================================================================
// Displacement field
// ============================================================================

/// `(1 − d/R)²` inside the radius, 0 at and beyond it.
#[inline]
pub fn falloff_weight(distance: f64, radius: f64) -> f64 {
    if !(radius > 0.0) || !(distance < radius) {
        return 0.0;
    }
    let t = 1.0 - distance / radius;
    t * t
}

/// Displacement one target applies to `point`.
pub fn displacement_at(
    point: &Point3<f64>,
    target: &DeformationTarget,
    params: &AugmentationParams,
    config: &AugmentConfig,
) -> Vector3<f64> {
    let offset = point - target.center;
    let w = falloff_weight(offset.norm(), target.radius);
    if w == 0.0 {
        return Vector3::zeros();
    }
    let r = target.radius;

    // Signed vertical position, -1 at the lower edge, +1 at the upper edge.
    let v = (offset.dot(&target.up) / r).clamp(-1.0, 1.0);
    let pole = if v > 0.0 {
        v * params.upper_pole_fullness
    } else {
        -v * params.lower_pole_fullness
    };
    let shape = match params.shape {
        ImplantShape::Round => 1.0,
        ImplantShape::Teardrop => 1.0 - config.teardrop_bias * v,
        ImplantShape::Gummy => 1.0 - config.gummy_upper_flatten * v.max(0.0),
    };

    let growth = params.size_multiplier * params.projection_multiplier * params.profile.multiplier() - 1.0;
    let forward = target.forward * (r * config.projection_gain * shape * (growth + pole));

    let in_plane = offset - target.forward * offset.dot(&target.forward);
    let radial = in_plane * ((params.size_multiplier - 1.0) * config.radial_gain);

    let translation = (target.up * params.height_offset + target.toward_midline * params.medial_offset)
        * (r * config.offset_scale);

    (forward + radial + translation) * w
}

/// Summed displacement of all targets at `point`.
pub fn total_displacement(
    point: &Point3<f64>,
    targets: &[DeformationTarget],
    params: &AugmentationParams,
    config: &AugmentConfig,
) -> Vector3<f64> {
    targets
        .iter()
        .map(|t| displacement_at(point, t, params, config))
        .sum()
}

// ============================================================================
// Augmentation
// ============================================================================

/// Deformed mesh plus displacement statistics.
#[derive(Debug, Clone)]
pub struct AugmentResult {
    pub mesh: Mesh,
    pub vertices_modified: usize,
    pub max_displacement: f64,
    /// Mean over modified vertices.
    pub average_displacement: f64,
    /// Largest edge length ratio, deformed over original.
    pub max_stretch: f64,
    /// Largest edge length ratio, original over deformed.
    pub max_compression: f64,
    /// Targets with their centers moved by the deformation.
    pub targets: Vec<DeformationTarget>,
    /// Indices of every vertex that moved.
    pub modified: Vec<u32>,
}

/// Deform a copy of `mesh`.
///
/// # Errors
///
/// - [`AnatomyError::EmptyMesh`] for a mesh without vertices
/// - [`AnatomyError::InvalidParameter`] for invalid parameters, configuration
///   or a target radius that is not positive and finite
pub fn augment(
    mesh: &Mesh,
    targets: &[DeformationTarget],
    params: &AugmentationParams,
    config: &AugmentConfig,
) -> AnatomyResult<AugmentResult> {
    if mesh.vertices.is_empty() {
        return Err(AnatomyError::empty_mesh("cannot deform a mesh without vertices"));
    }
    params.validate()?;
    config.validate()?;
    for target in targets {
        require_positive("influence_radius", target.radius)?;
    }

    let _timer = OperationTimer::with_context("augment", mesh.face_count(), mesh.vertex_count());

    let displacements: Vec<Vector3<f64>> = mesh
        .vertices
        .par_iter()
        .map(|v| total_displacement(&v.position, targets, params, config))
        .collect();

    let mut deformed = mesh.clone();
    let mut modified = Vec::new();
    let mut max_displacement = 0.0f64;
    let mut total = 0.0;
    for (i, (vertex, d)) in deformed.vertices.iter_mut().zip(&displacements).enumerate() {
        let len = d.norm();
        if len > 0.0 {
            vertex.position += d;
            modified.push(i as u32);
            max_displacement = max_displacement.max(len);
            total += len;
        }
    }
    let refreshed = {
        let _perf = log_perf_section("augment_normals");
        recompute_normals_near(&mut deformed, &modified)
    };
    let (max_stretch, max_compression) = distortion_metrics(mesh, &deformed);

    let moved_targets = targets
        .iter()
        .map(|t| DeformationTarget {
            center: t.center + total_displacement(&t.center, targets, params, config),
            ..*t
        })
        .collect();

    let average_displacement = if modified.is_empty() {
        0.0
    } else {
        total / modified.len() as f64
    };

    debug!(
        target: "mesh_anatomy::augment",
        refreshed_normals = refreshed,
        max_stretch = format!("{:.3}", max_stretch),
        max_compression = format!("{:.3}", max_compression),
        "Normals refreshed"
    );
    info!(
        target: "mesh_anatomy::augment",
        targets = targets.len(),
        vertices_modified = modified.len(),
        max_displacement = format!("{:.4}", max_displacement),
        "Augmentation applied"
    );

    Ok(AugmentResult {
        mesh: deformed,
        vertices_modified: modified.len(),
        max_displacement,
        average_displacement,
        max_stretch,
        max_compression,
        targets: moved_targets,
        modified,
    })
}

/// Move annotations along with the surface they were drawn on.
pub fn displace_annotations(
    annotations: &AnnotationSet,
    targets: &[DeformationTarget],
    params: &AugmentationParams,
    config: &AugmentConfig,
) -> AnatomyResult<AnnotationSet> {
    let shift = |p: &Point3<f64>| p + total_displacement(p, targets, params, config);
    let mut moved = AnnotationSet::new();
    for (_, contour) in annotations.contours.iter() {
        moved.set_contour(contour.map_points(shift)?);
    }
    for (_, landmark) in annotations.landmarks.iter() {
        moved.set_landmark(Landmark {
            position: shift(&landmark.position),
            ..*landmark
        });
    }
    Ok(moved)
}

fn distortion_metrics(original: &Mesh, deformed: &Mesh) -> (f64, f64) {
    let mut max_stretch = 1.0f64;
    let mut max_compression = 1.0f64;

    for face in &original.faces {
        for i in 0..3 {
            let (a, b) = (face[i] as usize, face[(i + 1) % 3] as usize);
            let orig_len = (original.vertices[b].position - original.vertices[a].position).norm();
            let def_len = (deformed.vertices[b].position - deformed.vertices[a].position).norm();

            if orig_len > 1e-10 {
                let ratio = def_len / orig_len;
                if ratio > 1.0 {
                    max_stretch = max_stretch.max(ratio);
                } else if ratio > 1e-10 {
                    max_compression = max_compression.max(1.0 / ratio);
                }
            }
        }
    }

    (max_stretch, max_compression)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{extract_region_mesh, hemisphere, integrate_volume};
    use approx::assert_relative_eq;

    fn setup() -> (Mesh, DeformationTarget) {
        let mesh = hemisphere(Point3::origin(), 1.0, 48, 24);
        let target = DeformationTarget::new(Side::Left, Point3::new(0.0, 0.0, 1.0), &BodyFrame::default(), 1.2);
        (mesh, target)
    }

    #[test]
    fn test_neutral_is_identity() {
        let (mesh, target) = setup();
        for shape in [ImplantShape::Round, ImplantShape::Teardrop, ImplantShape::Gummy] {
            let params = AugmentationParams::default().with_shape(shape);
            assert!(params.is_neutral());
            let result = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
            assert_eq!(result.vertices_modified, 0);
            for (a, b) in mesh.vertices.iter().zip(&result.mesh.vertices) {
                assert_eq!(a.position, b.position);
            }
        }
    }

    #[test]
    fn test_falloff_boundary() {
        assert_eq!(falloff_weight(1.0, 1.0), 0.0);
        assert_eq!(falloff_weight(2.0, 1.0), 0.0);
        assert_eq!(falloff_weight(0.0, 1.0), 1.0);
        assert_relative_eq!(falloff_weight(0.5, 1.0), 0.25);
        assert_eq!(falloff_weight(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_zero_at_radius_and_peak_at_center() {
        let (_, target) = setup();
        let params = AugmentationParams::default().with_projection_multiplier(1.5);
        let config = AugmentConfig::default();

        let edge = target.center + Vector3::new(target.radius, 0.0, 0.0);
        assert_eq!(displacement_at(&edge, &target, &params, &config), Vector3::zeros());

        let peak = displacement_at(&target.center, &target, &params, &config).norm();
        assert_relative_eq!(peak, target.radius * config.projection_gain * 0.5, epsilon = 1e-12);
        for i in 1..20 {
            let d = target.radius * i as f64 / 20.0;
            for dir in [Vector3::x(), Vector3::y(), -Vector3::y()] {
                let p = target.center + dir * d;
                assert!(displacement_at(&p, &target, &params, &config).norm() <= peak);
            }
        }
    }

    #[test]
    fn test_outside_radius_untouched() {
        let mesh = hemisphere(Point3::origin(), 1.0, 48, 24);
        let target = DeformationTarget::new(Side::Left, Point3::new(0.0, 0.0, 1.0), &BodyFrame::default(), 0.5);
        let params = AugmentationParams::default().with_size_multiplier(1.4);
        let result = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
        assert!(result.vertices_modified > 0);
        for (a, b) in mesh.vertices.iter().zip(&result.mesh.vertices) {
            if (a.position - target.center).norm() >= target.radius {
                assert_eq!(a.position, b.position);
            }
        }
    }

    #[test]
    fn test_input_mesh_untouched() {
        let (mesh, target) = setup();
        let before = mesh.clone();
        let params = AugmentationParams::default().with_size_multiplier(1.3);
        let _ = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
        assert_eq!(mesh, before);
    }

    #[test]
    fn test_profile_monotonic() {
        let (_, target) = setup();
        let config = AugmentConfig::default();
        let mut previous = f64::NEG_INFINITY;
        for profile in ImplantProfile::ALL {
            let params = AugmentationParams::default()
                .with_projection_multiplier(1.2)
                .with_profile(profile);
            let forward = displacement_at(&target.center, &target, &params, &config).dot(&target.forward);
            assert!(forward > previous);
            previous = forward;
        }
    }

    #[test]
    fn test_teardrop_favours_lower_pole() {
        let (_, target) = setup();
        let config = AugmentConfig::default();
        let params = AugmentationParams::default()
            .with_projection_multiplier(1.4)
            .with_shape(ImplantShape::Teardrop);
        let above = target.center + target.up * 0.3;
        let below = target.center - target.up * 0.3;
        let up_push = displacement_at(&above, &target, &params, &config).dot(&target.forward);
        let down_push = displacement_at(&below, &target, &params, &config).dot(&target.forward);
        assert!(down_push > up_push);
    }

    #[test]
    fn test_size_increases_volume() {
        let mesh = hemisphere(Point3::origin(), 1.0, 48, 24);
        let target = DeformationTarget::new(Side::Left, Point3::new(0.0, 0.0, 1.0), &BodyFrame::default(), 1.5);
        let all: Vec<u32> = (0..mesh.vertex_count() as u32).collect();
        let base = extract_region_mesh(&mesh, &all).unwrap();

        let mut previous = 0.0;
        for size in [0.8, 1.0, 1.2, 1.5] {
            let params = AugmentationParams::default().with_size_multiplier(size);
            let result = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
            let region = extract_region_mesh(&result.mesh, &base.source_vertices).unwrap();
            let v = integrate_volume(&region.mesh, &base.base_origin);
            assert!(v >= previous, "size {} gave {} after {}", size, v, previous);
            previous = v;
        }
    }

    #[test]
    fn test_normals_refreshed() {
        let (mesh, target) = setup();
        let params = AugmentationParams::default().with_projection_multiplier(1.5);
        let result = augment(&mesh, &[target], &params, &AugmentConfig::default()).unwrap();
        assert!(result.max_stretch >= 1.0);
        for &i in &result.modified {
            let n = result.mesh.vertices[i as usize].normal.unwrap();
            assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-9);
        }
        assert!(result.targets[0].center.z > target.center.z);
    }

    #[test]
    fn test_invalid_inputs() {
        let (mesh, target) = setup();
        let config = AugmentConfig::default();
        assert!(matches!(
            augment(&Mesh::new(), &[target], &AugmentationParams::default(), &config),
            Err(AnatomyError::EmptyMesh { .. })
        ));
        let bad = AugmentationParams::default().with_size_multiplier(0.0);
        assert!(augment(&mesh, &[target], &bad, &config).is_err());
        let bad = AugmentationParams::default().with_pole_fullness(1.5, 0.0);
        assert!(augment(&mesh, &[target], &bad, &config).is_err());
        let flat = DeformationTarget { radius: 0.0, ..target };
        assert!(augment(&mesh, &[flat], &AugmentationParams::default(), &config).is_err());
    }

    #[test]
    fn test_outward_axis_from_normals() {
        let mesh = hemisphere(Point3::origin(), 1.0, 48, 24);
        let landmark = Landmark::automatic(Side::Left, Point3::new(0.0, 0.0, 1.0));
        let target =
            DeformationTarget::from_region(&mesh, &landmark, 0.8, &BodyFrame::default(), &AugmentConfig::default())
                .unwrap();
        assert_relative_eq!(target.forward, Vector3::z(), epsilon = 1e-6);
        assert_relative_eq!(target.radius, 1.2, epsilon = 1e-12);
        assert_relative_eq!(target.up.dot(&target.forward), 0.0, epsilon = 1e-12);
        // Left is +X in the default frame, so the midline lies toward -X.
        assert_eq!(target.toward_midline, -Vector3::x());
    }

    #[test]
    fn test_params_toml_defaults() {
        let params: AugmentationParams = toml::from_str("size_multiplier = 1.2\nshape = \"teardrop\"").unwrap();
        assert_eq!(params.size_multiplier, 1.2);
        assert_eq!(params.shape, ImplantShape::Teardrop);
        assert_eq!(params.profile, ImplantProfile::Moderate);
    }
}
