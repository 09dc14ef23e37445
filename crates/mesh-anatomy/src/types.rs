//! Core mesh and anatomy data types.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{AnatomyError, AnatomyResult};

/// A vertex in the mesh.
///
/// Coordinates are in mesh-native units; see [`crate::UnitScale`] for conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector, supplied by the loader or computed from adjacent faces.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with position and normal.
    #[inline]
    pub fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }
}

/// A triangle mesh with indexed vertices and faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Build a mesh from the flat buffers a renderer-side loader hands over.
    ///
    /// `positions` and `normals` hold three floats per vertex and must describe the
    /// same number of vertices. `indices` holds three indices per triangle; when it
    /// is `None` sequential triples are synthesized (`0,1,2`, `3,4,5`, ...).
    ///
    /// # Errors
    ///
    /// - [`AnatomyError::EmptyMesh`] if there are no positions
    /// - [`AnatomyError::AttributeMismatch`] for buffer lengths that disagree or
    ///   are not multiples of three
    /// - [`AnatomyError::InvalidVertexIndex`] for an index past the vertex count
    /// - [`AnatomyError::InvalidCoordinate`] for NaN or infinite coordinates
    pub fn from_buffers(
        positions: &[f32],
        normals: &[f32],
        indices: Option<&[u32]>,
    ) -> AnatomyResult<Self> {
        if positions.is_empty() {
            return Err(AnatomyError::empty_mesh("position buffer is empty"));
        }
        if positions.len() % 3 != 0 {
            return Err(AnatomyError::attribute_mismatch(
                "position",
                positions.len() - positions.len() % 3,
                positions.len(),
            ));
        }
        if normals.len() != positions.len() {
            return Err(AnatomyError::attribute_mismatch(
                "normal",
                positions.len(),
                normals.len(),
            ));
        }

        let vertex_count = positions.len() / 3;
        let vertices: Vec<Vertex> = positions
            .chunks_exact(3)
            .zip(normals.chunks_exact(3))
            .map(|(p, n)| {
                let normal = Vector3::new(n[0] as f64, n[1] as f64, n[2] as f64);
                Vertex {
                    position: Point3::new(p[0] as f64, p[1] as f64, p[2] as f64),
                    normal: normal.try_normalize(f64::EPSILON),
                }
            })
            .collect();

        let faces: Vec<[u32; 3]> = match indices {
            Some(idx) => {
                if idx.len() % 3 != 0 {
                    return Err(AnatomyError::attribute_mismatch(
                        "index",
                        idx.len() - idx.len() % 3,
                        idx.len(),
                    ));
                }
                idx.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect()
            }
            None => sequential_faces(vertex_count),
        };

        let mesh = Self { vertices, faces };
        mesh.check_geometry()?;
        Ok(mesh)
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Whether every vertex carries a normal.
    pub fn has_normals(&self) -> bool {
        self.vertices.iter().all(|v| v.normal.is_some())
    }

    /// Number of vertices without a normal.
    pub fn missing_normal_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.normal.is_none()).count()
    }

    /// Verify indices and coordinates.
    ///
    /// This is the mesh input contract: every index is below the vertex count and
    /// every coordinate is finite.
    pub fn check_geometry(&self) -> AnatomyResult<()> {
        for (vi, v) in self.vertices.iter().enumerate() {
            for (name, value) in [
                ("x", v.position.x),
                ("y", v.position.y),
                ("z", v.position.z),
            ] {
                if !value.is_finite() {
                    return Err(AnatomyError::invalid_coordinate(vi, name, value));
                }
            }
        }

        let n = self.vertices.len();
        for (fi, face) in self.faces.iter().enumerate() {
            for &idx in face {
                if idx as usize >= n {
                    return Err(AnatomyError::invalid_vertex_index(fi, idx, n));
                }
            }
        }
        Ok(())
    }

    /// Compute the axis-aligned bounding box, or `None` if the mesh has no vertices.
    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Get a specific triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Compute the signed volume using the divergence theorem.
    ///
    /// For each triangle, the centroid is dotted with the unnormalized face normal
    /// (cross product of two edges); the sum over all triangles divided by 6 is
    /// the enclosed volume. Positive for outward-facing normals.
    ///
    /// # Note
    /// This assumes the mesh is closed. For an open patch use
    /// [`Mesh::signed_volume_about`] with a point on the patch's rim, which
    /// measures the volume of the patch capped by a fan through that point.
    pub fn signed_volume(&self) -> f64 {
        self.signed_volume_about(&Point3::origin())
    }

    /// Signed divergence-theorem volume measured relative to `origin`.
    ///
    /// Independent of `origin` for closed meshes.
    pub fn signed_volume_about(&self, origin: &Point3<f64>) -> f64 {
        let mut volume = 0.0;
        for tri in self.triangles() {
            let centroid = tri.centroid() - origin;
            volume += centroid.dot(&tri.normal_unnormalized());
        }
        volume / 6.0
    }

    /// Compute the absolute volume of the mesh.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Flatten positions into an `f32` buffer (three floats per vertex), the layout
    /// renderers consume.
    pub fn position_buffer(&self) -> Vec<f32> {
        self.vertices
            .iter()
            .flat_map(|v| {
                [
                    v.position.x as f32,
                    v.position.y as f32,
                    v.position.z as f32,
                ]
            })
            .collect()
    }

    /// Flatten normals into an `f32` buffer; vertices without a normal emit zeros.
    pub fn normal_buffer(&self) -> Vec<f32> {
        self.vertices
            .iter()
            .flat_map(|v| {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                [n.x as f32, n.y as f32, n.z as f32]
            })
            .collect()
    }
}

/// Sequential triangle indices for a non-indexed vertex buffer.
///
/// Trailing vertices that do not complete a triangle are ignored.
pub fn sequential_faces(vertex_count: usize) -> Vec<[u32; 3]> {
    (0..vertex_count / 3)
        .map(|t| {
            let base = (t * 3) as u32;
            [base, base + 1, base + 2]
        })
        .collect()
}

/// A triangle with concrete vertex positions.
///
/// Winding is counter-clockwise when viewed from the front (normal points toward
/// viewer).
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    /// The direction follows the right-hand rule with CCW winding.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the unit face normal.
    /// Returns None for degenerate triangles (zero area).
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid (center of mass).
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::new(
            (self.v0.x + self.v1.x + self.v2.x) / 3.0,
            (self.v0.y + self.v1.y + self.v2.y) / 3.0,
            (self.v0.z + self.v1.z + self.v2.z) / 3.0,
        )
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Bounding box of a point set, or `None` if it is empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut aabb = Self {
            min: first,
            max: first,
        };
        for p in iter {
            aabb.expand(p);
        }
        Some(aabb)
    }

    /// Grow the box to contain `p`.
    pub fn expand(&mut self, p: &Point3<f64>) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    #[inline]
    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    #[inline]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.extent().norm()
    }

    /// Extent along one axis.
    #[inline]
    pub fn extent_along(&self, axis: Axis) -> f64 {
        axis.component(&self.max) - axis.component(&self.min)
    }
}

/// Anatomical side of the body (the subject's own left/right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// The other side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// At most one value per side. The two sides are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideMap<T> {
    pub left: Option<T>,
    pub right: Option<T>,
}

impl<T> Default for SideMap<T> {
    fn default() -> Self {
        Self {
            left: None,
            right: None,
        }
    }
}

impl<T> SideMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, side: Side) -> Option<&T> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    /// Store a value for `side`, returning the value it replaced.
    pub fn set(&mut self, side: Side, value: T) -> Option<T> {
        self.slot_mut(side).replace(value)
    }

    pub fn take(&mut self, side: Side) -> Option<T> {
        self.slot_mut(side).take()
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<T> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Both values when both sides are present.
    pub fn pair(&self) -> Option<(&T, &T)> {
        Some((self.left.as_ref()?, self.right.as_ref()?))
    }

    /// Present values with their side, left first.
    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        Side::BOTH
            .into_iter()
            .filter_map(move |side| self.get(side).map(|v| (side, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn map<U>(&self, mut f: impl FnMut(Side, &T) -> U) -> SideMap<U> {
        SideMap {
            left: self.left.as_ref().map(|v| f(Side::Left, v)),
            right: self.right.as_ref().map(|v| f(Side::Right, v)),
        }
    }
}

/// A coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn unit(self) -> Vector3<f64> {
        match self {
            Axis::X => Vector3::x(),
            Axis::Y => Vector3::y(),
            Axis::Z => Vector3::z(),
        }
    }

    #[inline]
    pub fn component(self, p: &Point3<f64>) -> f64 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
            Axis::Z => p.z,
        }
    }
}

/// Orientation of the body inside mesh coordinates.
///
/// Generated meshes are usually Y-up with the subject facing +Z, which puts the
/// subject's left at +X. Other exporters differ, so the analyzer and measurement
/// code read every anatomical direction from here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyFrame {
    /// Head direction.
    pub up: Axis,
    /// Direction the subject faces.
    pub forward: Axis,
    /// Whether the subject's left lies toward +lateral.
    pub left_is_positive: bool,
}

impl Default for BodyFrame {
    fn default() -> Self {
        Self {
            up: Axis::Y,
            forward: Axis::Z,
            left_is_positive: true,
        }
    }
}

impl BodyFrame {
    /// Z-up, subject facing +Y (common for scanner output).
    pub fn z_up() -> Self {
        Self {
            up: Axis::Z,
            forward: Axis::Y,
            left_is_positive: false,
        }
    }

    /// The axis that is neither up nor forward.
    pub fn lateral(&self) -> Axis {
        match (self.up, self.forward) {
            (Axis::Y, Axis::Z) | (Axis::Z, Axis::Y) => Axis::X,
            (Axis::X, Axis::Z) | (Axis::Z, Axis::X) => Axis::Y,
            _ => Axis::Z,
        }
    }

    #[inline]
    pub fn up_of(&self, p: &Point3<f64>) -> f64 {
        self.up.component(p)
    }

    #[inline]
    pub fn forward_of(&self, p: &Point3<f64>) -> f64 {
        self.forward.component(p)
    }

    #[inline]
    pub fn lateral_of(&self, p: &Point3<f64>) -> f64 {
        self.lateral().component(p)
    }

    /// Which side of the midline a lateral coordinate falls on.
    pub fn side_of(&self, lateral: f64, midline: f64) -> Side {
        if (lateral >= midline) == self.left_is_positive {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Unit vector pointing from the midline toward `side`.
    pub fn outward(&self, side: Side) -> Vector3<f64> {
        let lateral = self.lateral().unit();
        match (side, self.left_is_positive) {
            (Side::Left, true) | (Side::Right, false) => lateral,
            _ => -lateral,
        }
    }

    /// Whether the frame uses two distinct axes.
    pub fn is_valid(&self) -> bool {
        self.up != self.forward
    }
}
