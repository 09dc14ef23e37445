//! Per-side volume estimates.
//!
//! Two methods are available and are expected to agree within an order of
//! magnitude on the same geometry:
//!
//! - [`VolumeMethod::Ellipsoid`]: closed form `4/3 · π · (d/2)² · projection`
//!   from a measured diameter and projection.
//! - [`VolumeMethod::MeshIntegration`]: divergence theorem over an extracted
//!   region sub-mesh, capped by a fan through the region's base point.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::AnalysisResult;
use crate::annotation::{AnnotationSet, Contour};
use crate::measure::{LengthUnit, MeasurementSet, UnitScale, asymmetry_ratio, measure_annotations, measure_regions};
use crate::sizing::{SizeBasis, SizeCategory, SizeChart};
use crate::tracing_ext::log_volume;
use crate::types::{BodyFrame, Mesh, SideMap, Vertex};

/// Which estimate produced a [`VolumeCalculation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMethod {
    #[default]
    Ellipsoid,
    MeshIntegration,
}

impl fmt::Display for VolumeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeMethod::Ellipsoid => f.write_str("ellipsoid"),
            VolumeMethod::MeshIntegration => f.write_str("mesh integration"),
        }
    }
}

/// Half-ellipsoid style estimate from a diameter and a projection.
///
/// Returns 0 for negative or non-finite input.
pub fn ellipsoid_volume(diameter: f64, projection: f64) -> f64 {
    if !diameter.is_finite() || !projection.is_finite() || diameter < 0.0 || projection < 0.0 {
        return 0.0;
    }
    let r = diameter / 2.0;
    4.0 / 3.0 * std::f64::consts::PI * r * r * projection
}

/// Absolute divergence-theorem volume of `mesh` relative to `origin`.
///
/// For an open patch, `origin` should lie on the patch's rim so the implicit
/// cap is the base of the region.
pub fn integrate_volume(mesh: &Mesh, origin: &Point3<f64>) -> f64 {
    mesh.signed_volume_about(origin).abs()
}

// ============================================================================
// Region sub-meshes
// ============================================================================

/// Faces of a source mesh restricted to one region, renumbered locally.
#[derive(Debug, Clone)]
pub struct RegionMesh {
    pub mesh: Mesh,
    /// Point the implicit cap fans through.
    pub base_origin: Point3<f64>,
    /// Source index of each local vertex.
    pub source_vertices: Vec<u32>,
}

impl RegionMesh {
    /// Region of every vertex within `radius` of `center`.
    pub fn around(mesh: &Mesh, center: &Point3<f64>, radius: f64) -> Option<Self> {
        if !(radius > 0.0) {
            return None;
        }
        let r2 = radius * radius;
        let selected: Vec<u32> = mesh
            .vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| (v.position - center).norm_squared() <= r2)
            .map(|(i, _)| i as u32)
            .collect();
        extract_region_mesh(mesh, &selected)
    }

    /// Integrated volume in mesh units³.
    pub fn volume(&self) -> f64 {
        integrate_volume(&self.mesh, &self.base_origin)
    }
}

/// Keep the faces whose three vertices are all in `vertices`.
///
/// The base origin is the centroid of the patch's boundary vertices, or of all
/// kept vertices for a closed patch. Returns `None` when no face survives.
pub fn extract_region_mesh(mesh: &Mesh, vertices: &[u32]) -> Option<RegionMesh> {
    let mut local: HashMap<u32, u32> = HashMap::with_capacity(vertices.len());
    let mut source_vertices = Vec::new();
    let vertex_count = mesh.vertices.len() as u32;
    for &v in vertices {
        if v < vertex_count && !local.contains_key(&v) {
            local.insert(v, source_vertices.len() as u32);
            source_vertices.push(v);
        }
    }

    let faces: Vec<[u32; 3]> = mesh
        .faces
        .iter()
        .filter_map(|f| Some([*local.get(&f[0])?, *local.get(&f[1])?, *local.get(&f[2])?]))
        .collect();
    if faces.is_empty() {
        return None;
    }

    let region = Mesh {
        vertices: source_vertices
            .iter()
            .map(|&v| mesh.vertices[v as usize].clone())
            .collect(),
        faces,
    };
    let base_origin = boundary_centroid(&region)
        .or_else(|| centroid(region.vertices.iter().map(|v| v.position)))?;

    Some(RegionMesh {
        mesh: region,
        base_origin,
        source_vertices,
    })
}

/// Region bounded by a contour.
///
/// Keeps vertices in front of the contour's best-fit plane (oriented toward the
/// body's forward axis) whose projection falls inside the contour polygon or
/// within a small tolerance of one of its edges. The contour centroid is the
/// base origin.
pub fn extract_contour_region(mesh: &Mesh, contour: &Contour, frame: &BodyFrame) -> Option<RegionMesh> {
    let center = contour.centroid();
    let forward = frame.forward.unit();
    let mut normal = newell_normal(contour.points()).unwrap_or(forward);
    if normal.dot(&forward) < 0.0 {
        normal = -normal;
    }
    let (u, v) = plane_basis(&normal);
    let to_plane = |p: &Point3<f64>| {
        let d = p - center;
        Vector2::new(d.dot(&u), d.dot(&v))
    };
    let polygon: Vec<Vector2<f64>> = contour.points().iter().map(to_plane).collect();
    let tolerance = contour.radius() * 0.02;

    let selected: Vec<u32> = mesh
        .vertices
        .iter()
        .enumerate()
        .filter(|(_, vertex)| {
            let p = &vertex.position;
            (p - center).dot(&normal) >= -tolerance && {
                let q = to_plane(p);
                point_in_polygon(&q, &polygon) || distance_to_polygon(&q, &polygon) <= tolerance
            }
        })
        .map(|(i, _)| i as u32)
        .collect();

    let mut region = extract_region_mesh(mesh, &selected)?;
    region.base_origin = center;
    Some(region)
}

fn boundary_centroid(mesh: &Mesh) -> Option<Point3<f64>> {
    let mut edges: HashMap<(u32, u32), u32> = HashMap::new();
    for f in &mesh.faces {
        for (a, b) in [(f[0], f[1]), (f[1], f[2]), (f[2], f[0])] {
            *edges.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    // Sorted so the sum is bit-identical between runs.
    let mut rim: Vec<u32> = edges
        .into_iter()
        .filter(|&(_, count)| count == 1)
        .flat_map(|((a, b), _)| [a, b])
        .collect();
    rim.sort_unstable();
    rim.dedup();
    centroid(rim.iter().map(|&i| mesh.vertices[i as usize].position))
}

fn centroid(points: impl Iterator<Item = Point3<f64>>) -> Option<Point3<f64>> {
    let (sum, count) = points.fold((Vector3::zeros(), 0usize), |(s, c), p| (s + p.coords, c + 1));
    (count > 0).then(|| Point3::from(sum / count as f64))
}

fn newell_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    let mut n = Vector3::zeros();
    for (a, b) in points.iter().zip(points.iter().cycle().skip(1)) {
        n.x += (a.y - b.y) * (a.z + b.z);
        n.y += (a.z - b.z) * (a.x + b.x);
        n.z += (a.x - b.x) * (a.y + b.y);
    }
    n.try_normalize(f64::EPSILON)
}

fn plane_basis(normal: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    (u, v)
}

fn point_in_polygon(q: &Vector2<f64>, polygon: &[Vector2<f64>]) -> bool {
    let mut inside = false;
    for (a, b) in polygon.iter().zip(polygon.iter().cycle().skip(1)) {
        if (a.y > q.y) != (b.y > q.y) {
            let x = a.x + (q.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if q.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn distance_to_polygon(q: &Vector2<f64>, polygon: &[Vector2<f64>]) -> f64 {
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| {
            let ab = b - a;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((q - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            (q - (a + ab * t)).norm()
        })
        .fold(f64::INFINITY, f64::min)
}

// ============================================================================
// Volume calculation
// ============================================================================

/// Per-side volumes with derived totals, in the unit's cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeCalculation {
    pub method: VolumeMethod,
    pub unit: LengthUnit,
    pub sides: SideMap<f64>,
    pub total: f64,
    /// `|left − right| / max × 100`; 0 unless both sides are present.
    pub asymmetry: f64,
    pub size_category: Option<SizeCategory>,
}

impl VolumeCalculation {
    fn from_sides(method: VolumeMethod, unit: LengthUnit, sides: SideMap<f64>, chart: &SizeChart) -> Self {
        let total = sides.iter().map(|(_, v)| *v).sum();
        let asymmetry = sides.pair().map_or(0.0, |(l, r)| asymmetry_ratio(*l, *r));
        let size_category = if unit == LengthUnit::Centimeters && chart.basis == SizeBasis::Volume {
            let count = sides.iter().count();
            (count > 0)
                .then(|| total / count as f64)
                .and_then(|mean| chart.classify(mean))
        } else {
            None
        };
        let calc = Self {
            method,
            unit,
            sides,
            total,
            asymmetry,
            size_category,
        };
        log_volume(&calc, &method.to_string());
        calc
    }

    /// Ellipsoid volumes from already-scaled measurements. Sides without a
    /// projection are absent.
    pub fn from_measurements(set: &MeasurementSet, chart: &SizeChart) -> Self {
        let sides = SideMap {
            left: set.sides.left.as_ref().and_then(|m| Some(ellipsoid_volume(m.width, m.projection?))),
            right: set.sides.right.as_ref().and_then(|m| Some(ellipsoid_volume(m.width, m.projection?))),
        };
        Self::from_sides(VolumeMethod::Ellipsoid, set.unit, sides, chart)
    }

    /// Integrated volumes of extracted region meshes.
    pub fn from_region_meshes(regions: &SideMap<RegionMesh>, scale: &UnitScale, chart: &SizeChart) -> Self {
        let sides = regions.map(|_, region| scale.volume(region.volume()));
        Self::from_sides(VolumeMethod::MeshIntegration, scale.unit(), sides, chart)
    }

    /// Volumes over the manual annotations.
    ///
    /// Mesh integration extracts each side's region from its contour.
    pub fn from_annotations(
        mesh: &Mesh,
        annotations: &AnnotationSet,
        frame: &BodyFrame,
        scale: &UnitScale,
        chart: &SizeChart,
        method: VolumeMethod,
    ) -> Self {
        match method {
            VolumeMethod::Ellipsoid => {
                Self::from_measurements(&measure_annotations(annotations, frame, scale, chart), chart)
            }
            VolumeMethod::MeshIntegration => {
                let regions = SideMap {
                    left: annotations.contours.left.as_ref().and_then(|c| extract_contour_region(mesh, c, frame)),
                    right: annotations.contours.right.as_ref().and_then(|c| extract_contour_region(mesh, c, frame)),
                };
                Self::from_region_meshes(&regions, scale, chart)
            }
        }
    }

    /// Volumes over detected regions.
    ///
    /// Mesh integration covers every vertex inside the region's bounding
    /// sphere, since the detected candidates alone are too sparse to carry
    /// faces.
    pub fn from_regions(
        mesh: &Mesh,
        result: &AnalysisResult,
        scale: &UnitScale,
        chart: &SizeChart,
        method: VolumeMethod,
    ) -> Self {
        match method {
            VolumeMethod::Ellipsoid => Self::from_measurements(&measure_regions(result, scale, chart), chart),
            VolumeMethod::MeshIntegration => {
                let regions = SideMap {
                    left: result.regions.left.as_ref().and_then(|r| RegionMesh::around(mesh, &r.centroid, r.radius)),
                    right: result.regions.right.as_ref().and_then(|r| RegionMesh::around(mesh, &r.centroid, r.radius)),
                };
                Self::from_region_meshes(&regions, scale, chart)
            }
        }
    }
}

impl fmt::Display for VolumeCalculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = self.unit.volume_suffix();
        for (side, v) in self.sides.iter() {
            writeln!(f, "{:>5}: {:.2} {}", side, v, suffix)?;
        }
        write!(
            f,
            "Total: {:.2} {} ({}), asymmetry {:.1}%",
            self.total, suffix, self.method, self.asymmetry
        )?;
        if let Some(category) = self.size_category {
            write!(f, ", size {}", category)?;
        }
        Ok(())
    }
}

/// Open UV hemisphere of `radius` bulging toward `+z` from `center`, base rim
/// in the `z = center.z` plane, outward winding.
pub fn hemisphere(center: Point3<f64>, radius: f64, segments: u32, rings: u32) -> Mesh {
    let segments = segments.max(3);
    let rings = rings.max(1);
    let mut mesh = Mesh::with_capacity((segments * rings + 1) as usize, (segments * (2 * rings - 1)) as usize);
    mesh.vertices.push(Vertex::with_normal(center + Vector3::z() * radius, Vector3::z()));

    for i in 1..=rings {
        let phi = i as f64 / rings as f64 * std::f64::consts::FRAC_PI_2;
        for j in 0..segments {
            let theta = j as f64 / segments as f64 * std::f64::consts::TAU;
            let n = Vector3::new(phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos());
            mesh.vertices.push(Vertex::with_normal(center + n * radius, n));
        }
    }

    let ring = |i: u32, j: u32| 1 + (i - 1) * segments + j % segments;
    for j in 0..segments {
        mesh.faces.push([0, ring(1, j), ring(1, j + 1)]);
    }
    for i in 1..rings {
        for j in 0..segments {
            let (a0, a1) = (ring(i, j), ring(i, j + 1));
            let (b0, b1) = (ring(i + 1, j), ring(i + 1, j + 1));
            mesh.faces.push([a0, b0, b1]);
            mesh.faces.push([a0, b1, a1]);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Landmark;
    use crate::types::Side;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn equator_contour(side: Side, center: Point3<f64>, n: usize) -> Contour {
        let points = (0..n)
            .map(|j| {
                let theta = j as f64 / n as f64 * std::f64::consts::TAU;
                center + Vector3::new(theta.cos(), theta.sin(), 0.0)
            })
            .collect();
        Contour::new(side, points).unwrap()
    }

    #[test]
    fn test_ellipsoid_volume() {
        assert_relative_eq!(ellipsoid_volume(2.0, 1.0), 4.0 / 3.0 * PI, epsilon = 1e-12);
        assert_eq!(ellipsoid_volume(0.0, 1.0), 0.0);
        assert_eq!(ellipsoid_volume(-1.0, 1.0), 0.0);
        assert_eq!(ellipsoid_volume(1.0, f64::NAN), 0.0);
    }

    #[test]
    fn test_hemisphere_integration() {
        let mesh = hemisphere(Point3::origin(), 1.0, 64, 32);
        let all: Vec<u32> = (0..mesh.vertex_count() as u32).collect();
        let region = extract_region_mesh(&mesh, &all).unwrap();
        assert_relative_eq!(region.base_origin.coords.norm(), 0.0, epsilon = 1e-9);
        let expected = 2.0 / 3.0 * PI;
        let v = region.volume();
        assert!((v - expected).abs() / expected < 0.05, "volume {} vs {}", v, expected);
    }

    #[test]
    fn test_methods_agree_in_magnitude() {
        let mesh = hemisphere(Point3::origin(), 1.0, 64, 32);
        let integrated = RegionMesh::around(&mesh, &Point3::origin(), 1.01).unwrap().volume();
        let closed_form = ellipsoid_volume(2.0, 1.0);
        let ratio = closed_form / integrated;
        assert!(ratio > 0.1 && ratio < 10.0, "ratio {}", ratio);
    }

    #[test]
    fn test_extract_drops_partial_faces() {
        let mesh = hemisphere(Point3::origin(), 1.0, 16, 8);
        // Only the pole vertex and the first ring.
        let cap: Vec<u32> = (0..=16).collect();
        let region = extract_region_mesh(&mesh, &cap).unwrap();
        assert_eq!(region.mesh.face_count(), 16);
        assert_eq!(region.source_vertices.len(), 17);
        assert!(region.mesh.faces.iter().flatten().all(|&i| i < 17));

        assert!(extract_region_mesh(&mesh, &[0]).is_none());
        assert!(extract_region_mesh(&mesh, &[9999]).is_none());
    }

    #[test]
    fn test_contour_region_selects_cap() {
        let mut mesh = hemisphere(Point3::origin(), 1.0, 64, 32);
        // A second, unrelated cap far to the side must not be picked up.
        let other = hemisphere(Point3::new(5.0, 0.0, 0.0), 1.0, 16, 8);
        let offset = mesh.vertex_count() as u32;
        mesh.vertices.extend(other.vertices);
        mesh.faces
            .extend(other.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));

        let contour = equator_contour(Side::Left, Point3::origin(), 32);
        let region = extract_contour_region(&mesh, &contour, &BodyFrame::default()).unwrap();
        assert!(region.source_vertices.iter().all(|&i| i < offset));
        let expected = 2.0 / 3.0 * PI;
        assert!((region.volume() - expected).abs() / expected < 0.05);
    }

    #[test]
    fn test_from_annotations_both_methods() {
        let mut mesh = hemisphere(Point3::new(1.5, 0.0, 0.0), 1.0, 48, 24);
        let right = hemisphere(Point3::new(-1.5, 0.0, 0.0), 1.0, 48, 24);
        let offset = mesh.vertex_count() as u32;
        mesh.vertices.extend(right.vertices);
        mesh.faces
            .extend(right.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));

        let mut annotations = AnnotationSet::new();
        annotations.set_contour(equator_contour(Side::Left, Point3::new(1.5, 0.0, 0.0), 48));
        annotations.set_contour(equator_contour(Side::Right, Point3::new(-1.5, 0.0, 0.0), 48));
        annotations.set_landmark(Landmark::manual(Side::Left, Point3::new(1.5, 0.0, 1.0)));
        annotations.set_landmark(Landmark::manual(Side::Right, Point3::new(-1.5, 0.0, 1.0)));

        let frame = BodyFrame::default();
        let scale = UnitScale::native();
        let chart = SizeChart::volume();
        let integrated = VolumeCalculation::from_annotations(
            &mesh,
            &annotations,
            &frame,
            &scale,
            &chart,
            VolumeMethod::MeshIntegration,
        );
        let closed = VolumeCalculation::from_annotations(
            &mesh,
            &annotations,
            &frame,
            &scale,
            &chart,
            VolumeMethod::Ellipsoid,
        );

        let (l, r) = integrated.sides.pair().unwrap();
        assert_relative_eq!(*l, *r, max_relative = 1e-6);
        assert!(integrated.asymmetry < 1e-4);
        assert_relative_eq!(integrated.total, l + r);

        let (cl, _) = closed.sides.pair().unwrap();
        let ratio = cl / l;
        assert!(ratio > 0.1 && ratio < 10.0);
        // Mesh units are never classified.
        assert!(closed.size_category.is_none());
    }

    #[test]
    fn test_scaled_volume_and_category() {
        let mesh = hemisphere(Point3::origin(), 1.0, 64, 32);
        let all: Vec<u32> = (0..mesh.vertex_count() as u32).collect();
        let region = extract_region_mesh(&mesh, &all).unwrap();
        let regions = SideMap {
            left: Some(region),
            right: None,
        };
        // 1 unit = 6 cm → ~452 cm³.
        let scale = UnitScale::centimeters(6.0).unwrap();
        let calc = VolumeCalculation::from_region_meshes(&regions, &scale, &SizeChart::volume());
        let v = calc.sides.left.unwrap();
        assert_relative_eq!(v, 2.0 / 3.0 * PI * 216.0, max_relative = 0.05);
        assert_eq!(calc.size_category, Some(SizeCategory::D));
        assert_eq!(calc.asymmetry, 0.0);
        assert!(calc.to_string().contains("cm³"));
    }
}
