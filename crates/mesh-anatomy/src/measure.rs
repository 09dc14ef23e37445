//! Linear measurements from contours, landmarks and detected regions.
//!
//! Every function here is pure: identical inputs give bit-identical outputs.
//! Undefined quantities (a missing side, a zero denominator) come back as
//! `None` or `0.0`, never NaN.
//!
//! # Units
//!
//! Geometry is measured in mesh units and rescaled by a single [`UnitScale`].
//! Lengths scale by the factor, volumes by its cube.
//!
//! # Example
//!
//! ```
//! use mesh_anatomy::measure::{circumference, diameter, symmetry_ratio};
//! use nalgebra::Point3;
//!
//! let square = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! assert_eq!(circumference(&square), 4.0);
//! assert!((diameter(&square) - 2f64.sqrt()).abs() < 1e-12);
//! assert_eq!(symmetry_ratio(5.0, 10.0), 50.0);
//! ```

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::{AnalysisResult, Region};
use crate::annotation::{AnnotationSet, Contour};
use crate::error::{AnatomyError, AnatomyResult};
use crate::sizing::{SizeBasis, SizeCategory, SizeChart};
use crate::tracing_ext::log_measurements;
use crate::types::{Axis, BodyFrame, Side, SideMap};
use crate::volume::ellipsoid_volume;

// ============================================================================
// Units
// ============================================================================

/// Unit of linear output values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    /// Raw mesh coordinates.
    #[default]
    MeshUnits,
    Centimeters,
}

impl LengthUnit {
    pub fn volume_suffix(&self) -> &'static str {
        match self {
            LengthUnit::MeshUnits => "units³",
            LengthUnit::Centimeters => "cm³",
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthUnit::MeshUnits => f.write_str("units"),
            LengthUnit::Centimeters => f.write_str("cm"),
        }
    }
}

/// Linear scale from mesh units to an output unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitScale {
    factor: f64,
    unit: LengthUnit,
}

impl Default for UnitScale {
    fn default() -> Self {
        Self::native()
    }
}

impl UnitScale {
    /// Identity scale; values stay in mesh units.
    pub fn native() -> Self {
        Self {
            factor: 1.0,
            unit: LengthUnit::MeshUnits,
        }
    }

    /// Centimeters per mesh unit.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::InvalidScale`] unless `factor` is positive and finite.
    pub fn centimeters(factor: f64) -> AnatomyResult<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(AnatomyError::InvalidScale { value: factor });
        }
        Ok(Self {
            factor,
            unit: LengthUnit::Centimeters,
        })
    }

    /// Derive the scale from a distance measured on the mesh and the same
    /// distance entered by the user in centimeters.
    pub fn calibrate(mesh_distance: f64, real_cm: f64) -> AnatomyResult<Self> {
        if !mesh_distance.is_finite() || mesh_distance <= 0.0 {
            return Err(AnatomyError::InvalidScale {
                value: mesh_distance,
            });
        }
        Self::centimeters(real_cm / mesh_distance)
    }

    #[inline]
    pub fn factor(&self) -> f64 {
        self.factor
    }

    #[inline]
    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    #[inline]
    pub fn length(&self, mesh_units: f64) -> f64 {
        mesh_units * self.factor
    }

    #[inline]
    pub fn volume(&self, mesh_units_cubed: f64) -> f64 {
        mesh_units_cubed * self.factor.powi(3)
    }
}

// ============================================================================
// Primitive measurements
// ============================================================================

/// Result of a point-to-point measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceMeasurement {
    pub from: Point3<f64>,
    pub to: Point3<f64>,
    pub distance: f64,
    /// Per-axis offset `to - from`.
    pub delta: Vector3<f64>,
}

pub fn measure_distance(from: Point3<f64>, to: Point3<f64>) -> DistanceMeasurement {
    let delta = to - from;
    DistanceMeasurement {
        from,
        to,
        distance: delta.norm(),
        delta,
    }
}

#[inline]
pub fn distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    (b - a).norm()
}

/// Largest pairwise distance in the point set (0 for fewer than two points).
pub fn diameter(points: &[Point3<f64>]) -> f64 {
    let mut best = 0.0;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            let d = distance(a, b);
            if d > best {
                best = d;
            }
        }
    }
    best
}

/// Perimeter of the closed polygon (last point connects to the first).
pub fn circumference(points: &[Point3<f64>]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| distance(a, b))
        .sum()
}

/// Distance from a landmark to its contour's centroid.
pub fn projection(landmark: &Point3<f64>, contour: &Contour) -> f64 {
    distance(landmark, &contour.centroid())
}

/// Span of the points along `axis`.
pub fn extent_along(points: &[Point3<f64>], axis: Axis) -> f64 {
    let (lo, hi) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        let v = axis.component(p);
        (lo.min(v), hi.max(v))
    });
    if hi >= lo { hi - lo } else { 0.0 }
}

/// `min / max × 100`; 0 when either value is 0 or not finite.
pub fn symmetry_ratio(a: f64, b: f64) -> f64 {
    if !a.is_finite() || !b.is_finite() || a <= 0.0 || b <= 0.0 {
        return 0.0;
    }
    a.min(b) / a.max(b) * 100.0
}

/// `|a − b| / max × 100`; 0 when the larger value is 0 or inputs are not finite.
pub fn asymmetry_ratio(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if !a.is_finite() || !b.is_finite() || max <= 0.0 {
        return 0.0;
    }
    (a - b).abs() / max * 100.0
}

/// Ramanujan's approximation of an ellipse perimeter from its semi-axes.
pub fn ellipse_perimeter(a: f64, b: f64) -> f64 {
    let (a, b) = (a.abs(), b.abs());
    if a + b == 0.0 {
        return 0.0;
    }
    std::f64::consts::PI * (3.0 * (a + b) - ((3.0 * a + b) * (a + 3.0 * b)).sqrt())
}

// ============================================================================
// Measurement set
// ============================================================================

/// Per-side linear measurements, in the set's unit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SideMeasurements {
    /// Diameter across the region.
    pub width: f64,
    /// Extent along the body's up axis.
    pub height: f64,
    pub circumference: f64,
    /// Landmark protrusion; `None` without a landmark.
    pub projection: Option<f64>,
}

/// The full record handed to display code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    pub unit: LengthUnit,
    pub landmark_distance: Option<f64>,
    pub sides: SideMap<SideMeasurements>,
    /// Gap between the two regions' medial edges.
    pub inter_fold_width: Option<f64>,
    /// Span between the two regions' lateral edges.
    pub chest_wall_width: Option<f64>,
    /// Width symmetry, 0..=100.
    pub symmetry_ratio: f64,
    pub size_category: Option<SizeCategory>,
}

impl MeasurementSet {
    fn empty(unit: LengthUnit) -> Self {
        Self {
            unit,
            landmark_distance: None,
            sides: SideMap::new(),
            inter_fold_width: None,
            chest_wall_width: None,
            symmetry_ratio: 0.0,
            size_category: None,
        }
    }

    pub fn side(&self, side: Side) -> Option<&SideMeasurements> {
        self.sides.get(side)
    }

    /// Mean of the available projections.
    pub fn mean_projection(&self) -> Option<f64> {
        mean(self.sides.iter().filter_map(|(_, m)| m.projection))
    }
}

impl fmt::Display for MeasurementSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit;
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2} {}", v, unit));
        writeln!(f, "Landmark distance: {}", opt(self.landmark_distance))?;
        for (side, m) in self.sides.iter() {
            writeln!(
                f,
                "{:>5}: width {:.2} {unit}, height {:.2} {unit}, circumference {:.2} {unit}, projection {}",
                side,
                m.width,
                m.height,
                m.circumference,
                opt(m.projection),
            )?;
        }
        writeln!(f, "Inter-fold width: {}", opt(self.inter_fold_width))?;
        writeln!(f, "Chest-wall width: {}", opt(self.chest_wall_width))?;
        write!(f, "Symmetry: {:.1}%", self.symmetry_ratio)?;
        if let Some(category) = self.size_category {
            write!(f, ", size {}", category)?;
        }
        Ok(())
    }
}

/// Manual path: measurements from user-drawn contours and landmarks.
///
/// Width is the contour diameter, height its extent along the up axis and
/// projection the landmark's distance from the contour centroid. Inter-fold
/// and chest-wall widths use the medial-most and lateral-most contour points.
pub fn measure_annotations(
    annotations: &AnnotationSet,
    frame: &BodyFrame,
    scale: &UnitScale,
    chart: &SizeChart,
) -> MeasurementSet {
    let mut set = MeasurementSet::empty(scale.unit());

    if let Some((l, r)) = annotations.landmarks.pair() {
        set.landmark_distance = Some(scale.length(distance(&l.position, &r.position)));
    }

    for (side, contour) in annotations.contours.iter() {
        let points = contour.points();
        let projection = annotations
            .landmark(side)
            .map(|l| scale.length(projection(&l.position, contour)));
        set.sides.set(
            side,
            SideMeasurements {
                width: scale.length(diameter(points)),
                height: scale.length(extent_along(points, frame.up)),
                circumference: scale.length(circumference(points)),
                projection,
            },
        );
    }

    if let Some((left, right)) = annotations.contours.pair() {
        let midline =
            (frame.lateral_of(&left.centroid()) + frame.lateral_of(&right.centroid())) / 2.0;
        let offset = |p: &Point3<f64>| (frame.lateral_of(p) - midline).abs();
        let medial = |c: &Contour| extreme_point(c.points(), |p| -offset(p));
        let lateral = |c: &Contour| extreme_point(c.points(), offset);

        if let (Some(a), Some(b)) = (medial(left), medial(right)) {
            set.inter_fold_width = Some(scale.length(distance(&a, &b)));
        }
        if let (Some(a), Some(b)) = (lateral(left), lateral(right)) {
            set.chest_wall_width = Some(scale.length(distance(&a, &b)));
        }
    }

    finish(set, scale, chart, "manual")
}

/// Automatic path: measurements from detected regions and landmarks.
///
/// Width and height are the region's extents, projection is the landmark's
/// forward offset from the side's base (the rearmost in-region vertex) and the
/// circumference is the perimeter of the width × height ellipse.
pub fn measure_regions(result: &AnalysisResult, scale: &UnitScale, chart: &SizeChart) -> MeasurementSet {
    let frame = &result.frame;
    let mut set = MeasurementSet::empty(scale.unit());

    if let Some((l, r)) = result.landmarks.pair() {
        set.landmark_distance = Some(scale.length(distance(&l.position, &r.position)));
    }

    for (side, region) in result.regions.iter() {
        let width = region.bounds.extent_along(frame.lateral());
        let height = region.bounds.extent_along(frame.up);
        let projection = result.landmark(side).and_then(|landmark| {
            let base = result
                .features
                .iter()
                .filter(|f| f.in_region && f.side == Some(side))
                .map(|f| frame.forward_of(&f.position))
                .reduce(f64::min)?;
            Some(scale.length((frame.forward_of(&landmark.position) - base).max(0.0)))
        });
        set.sides.set(
            side,
            SideMeasurements {
                width: scale.length(width),
                height: scale.length(height),
                circumference: scale.length(ellipse_perimeter(width / 2.0, height / 2.0)),
                projection,
            },
        );
    }

    if let Some((left, right)) = result.regions.pair() {
        let (l_medial, l_lateral) = lateral_edges(left, frame, result.midline);
        let (r_medial, r_lateral) = lateral_edges(right, frame, result.midline);
        set.inter_fold_width = Some(scale.length(l_medial + r_medial));
        set.chest_wall_width = Some(scale.length(l_lateral + r_lateral));
    }

    finish(set, scale, chart, "automatic")
}

/// Distances from the midline to a region's near and far lateral edges.
fn lateral_edges(region: &Region, frame: &BodyFrame, midline: f64) -> (f64, f64) {
    let axis = frame.lateral();
    let lo = (axis.component(&region.bounds.min) - midline).abs();
    let hi = (axis.component(&region.bounds.max) - midline).abs();
    (lo.min(hi), lo.max(hi))
}

fn finish(mut set: MeasurementSet, scale: &UnitScale, chart: &SizeChart, context: &str) -> MeasurementSet {
    if let Some((l, r)) = set.sides.pair() {
        set.symmetry_ratio = symmetry_ratio(l.width, r.width);
    }
    set.size_category = classify_size(&set, scale, chart);
    log_measurements(&set, context);
    set
}

/// Size label for a measurement set. Charts are expressed in centimeters,
/// so mesh-unit sets are never classified.
fn classify_size(set: &MeasurementSet, scale: &UnitScale, chart: &SizeChart) -> Option<SizeCategory> {
    if scale.unit() != LengthUnit::Centimeters {
        return None;
    }
    let value = match chart.basis {
        SizeBasis::Projection => set.mean_projection()?,
        SizeBasis::Volume => mean(
            set.sides
                .iter()
                .filter_map(|(_, m)| m.projection.map(|p| ellipsoid_volume(m.width, p))),
        )?,
    };
    chart.classify(value)
}

fn extreme_point(points: &[Point3<f64>], key: impl Fn(&Point3<f64>) -> f64) -> Option<Point3<f64>> {
    points
        .iter()
        .max_by(|a, b| key(a).total_cmp(&key(b)))
        .copied()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Landmark;
    use approx::assert_relative_eq;

    fn square(side: Side, cx: f64) -> Contour {
        Contour::new(
            side,
            vec![
                Point3::new(cx - 0.5, -0.5, 0.0),
                Point3::new(cx + 0.5, -0.5, 0.0),
                Point3::new(cx + 0.5, 0.5, 0.0),
                Point3::new(cx - 0.5, 0.5, 0.0),
            ],
        )
        .unwrap()
    }

    fn both_sides() -> AnnotationSet {
        let mut set = AnnotationSet::new();
        set.set_contour(square(Side::Left, 1.0));
        set.set_contour(square(Side::Right, -1.0));
        set.set_landmark(Landmark::manual(Side::Left, Point3::new(1.0, 0.0, 0.1)));
        set.set_landmark(Landmark::manual(Side::Right, Point3::new(-1.0, 0.0, 0.1)));
        set
    }

    #[test]
    fn test_symmetry_ratio_cases() {
        assert_eq!(symmetry_ratio(10.0, 10.0), 100.0);
        assert_eq!(symmetry_ratio(5.0, 10.0), 50.0);
        assert_eq!(symmetry_ratio(10.0, 5.0), 50.0);
        assert_eq!(symmetry_ratio(0.0, 10.0), 0.0);
        assert_eq!(symmetry_ratio(f64::NAN, 10.0), 0.0);
    }

    #[test]
    fn test_asymmetry_ratio_cases() {
        assert_eq!(asymmetry_ratio(10.0, 10.0), 0.0);
        assert_eq!(asymmetry_ratio(5.0, 10.0), 50.0);
        assert_eq!(asymmetry_ratio(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_unit_square_contour() {
        let contour = square(Side::Left, 0.5);
        let landmark = Point3::new(0.5, 0.0, 0.1);
        assert_relative_eq!(projection(&landmark, &contour), 0.1, epsilon = 1e-12);
        assert_relative_eq!(diameter(contour.points()), 2f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(circumference(contour.points()), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(diameter(&[]), 0.0);
        assert_eq!(circumference(&[Point3::origin()]), 0.0);
        assert_eq!(extent_along(&[], Axis::Y), 0.0);
        assert_eq!(ellipse_perimeter(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_ellipse_perimeter_circle() {
        assert_relative_eq!(
            ellipse_perimeter(1.0, 1.0),
            2.0 * std::f64::consts::PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_measure_distance() {
        let m = measure_distance(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 0.0));
        assert_eq!(m.distance, 5.0);
        assert_eq!(m.delta, Vector3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_calibration() {
        let scale = UnitScale::calibrate(0.2, 20.0).unwrap();
        assert_relative_eq!(scale.factor(), 100.0);
        assert_relative_eq!(scale.length(0.5), 50.0);
        assert_relative_eq!(scale.volume(1e-6), 1.0, epsilon = 1e-12);
        assert_eq!(scale.unit(), LengthUnit::Centimeters);

        assert!(matches!(
            UnitScale::calibrate(0.0, 20.0),
            Err(AnatomyError::InvalidScale { .. })
        ));
        assert!(UnitScale::centimeters(-1.0).is_err());
        assert!(UnitScale::centimeters(f64::INFINITY).is_err());
    }

    #[test]
    fn test_measure_annotations_full() {
        let set = measure_annotations(
            &both_sides(),
            &BodyFrame::default(),
            &UnitScale::native(),
            &SizeChart::default(),
        );
        assert_eq!(set.unit, LengthUnit::MeshUnits);
        assert_relative_eq!(set.landmark_distance.unwrap(), 2.0, epsilon = 1e-12);

        let left = set.side(Side::Left).unwrap();
        assert_relative_eq!(left.width, 2f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(left.height, 1.0, epsilon = 1e-12);
        assert_relative_eq!(left.circumference, 4.0, epsilon = 1e-12);
        assert_relative_eq!(left.projection.unwrap(), 0.1, epsilon = 1e-12);

        // Medial edges at x = ±0.5, lateral edges at x = ±1.5.
        assert_relative_eq!(set.inter_fold_width.unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(set.chest_wall_width.unwrap(), 3.0, epsilon = 1e-12);
        assert_eq!(set.symmetry_ratio, 100.0);
        // Mesh units are never classified.
        assert!(set.size_category.is_none());
    }

    #[test]
    fn test_measure_annotations_partial() {
        let mut annotations = AnnotationSet::new();
        annotations.set_contour(square(Side::Left, 1.0));
        let set = measure_annotations(
            &annotations,
            &BodyFrame::default(),
            &UnitScale::native(),
            &SizeChart::default(),
        );
        assert!(set.landmark_distance.is_none());
        assert!(set.side(Side::Right).is_none());
        assert!(set.side(Side::Left).unwrap().projection.is_none());
        assert!(set.inter_fold_width.is_none());
        assert_eq!(set.symmetry_ratio, 0.0);
    }

    #[test]
    fn test_scaled_measurements_and_size() {
        // 1 mesh unit = 40 cm, so projection 0.1 → 4 cm → category C.
        let scale = UnitScale::centimeters(40.0).unwrap();
        let set = measure_annotations(
            &both_sides(),
            &BodyFrame::default(),
            &scale,
            &SizeChart::projection(),
        );
        assert_relative_eq!(set.side(Side::Left).unwrap().projection.unwrap(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(set.landmark_distance.unwrap(), 80.0, epsilon = 1e-9);
        assert_eq!(set.size_category, Some(SizeCategory::C));
    }

    #[test]
    fn test_idempotent() {
        let annotations = both_sides();
        let frame = BodyFrame::default();
        let scale = UnitScale::centimeters(12.5).unwrap();
        let chart = SizeChart::volume();
        let a = measure_annotations(&annotations, &frame, &scale, &chart);
        let b = measure_annotations(&annotations, &frame, &scale, &chart);
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_lists_sides() {
        let set = measure_annotations(
            &both_sides(),
            &BodyFrame::default(),
            &UnitScale::native(),
            &SizeChart::default(),
        );
        let text = set.to_string();
        assert!(text.contains("left"));
        assert!(text.contains("right"));
        assert!(text.contains("Symmetry: 100.0%"));
    }
}
