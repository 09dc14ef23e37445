//! Surface query: ray picking against the loaded surface.
//!
//! A pointer position in normalized device coordinates is turned into a world
//! ray by a [`Camera`], and the ray is intersected with every [`Scene`] object
//! whose role is [`ObjectRole::Surface`]. Objects are tagged once, when they are
//! inserted; names are never consulted when filtering.
//!
//! Each surface carries a [`SurfaceIndex`] (a median-split BVH) built at
//! insertion, so a pick costs O(log F) per surface.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{AnatomyError, AnatomyResult};
use crate::types::{Aabb, Mesh, Triangle};

/// Tolerance for the parallel-ray test and minimum hit distance.
const RAY_EPSILON: f64 = 1e-10;

/// A world-space ray with unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Create a ray; `None` if the direction has zero length.
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Option<Self> {
        Some(Self {
            origin,
            direction: direction.try_normalize(f64::EPSILON)?,
        })
    }

    #[inline]
    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }
}

/// Anything that can turn a viewport position into a world ray.
pub trait Camera {
    /// Ray through `ndc`, where both axes span [-1, 1] (+y up).
    ///
    /// Returns `None` for positions outside the viewport or a degenerate camera.
    fn ray_from_ndc(&self, ndc: Point2<f64>) -> Option<Ray>;
}

/// Orthonormal camera basis (forward, right, up) or `None` when eye, target,
/// and up are degenerate.
fn camera_basis(
    eye: &Point3<f64>,
    target: &Point3<f64>,
    up: &Vector3<f64>,
) -> Option<(Vector3<f64>, Vector3<f64>, Vector3<f64>)> {
    let forward = (target - eye).try_normalize(f64::EPSILON)?;
    let right = forward.cross(up).try_normalize(f64::EPSILON)?;
    let true_up = right.cross(&forward);
    Some((forward, right, true_up))
}

fn ndc_in_viewport(ndc: &Point2<f64>) -> bool {
    (-1.0..=1.0).contains(&ndc.x) && (-1.0..=1.0).contains(&ndc.y)
}

/// Pinhole camera looking from `eye` toward `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub eye: Point3<f64>,
    pub target: Point3<f64>,
    pub up: Vector3<f64>,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f64,
    /// Viewport width / height.
    pub aspect: f64,
}

impl PerspectiveCamera {
    pub fn new(eye: Point3<f64>, target: Point3<f64>) -> Self {
        Self {
            eye,
            target,
            up: Vector3::y(),
            fov_y_degrees: 50.0,
            aspect: 1.0,
        }
    }

    pub fn with_fov(mut self, fov_y_degrees: f64) -> Self {
        self.fov_y_degrees = fov_y_degrees;
        self
    }

    pub fn with_aspect(mut self, aspect: f64) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_up(mut self, up: Vector3<f64>) -> Self {
        self.up = up;
        self
    }
}

impl Camera for PerspectiveCamera {
    fn ray_from_ndc(&self, ndc: Point2<f64>) -> Option<Ray> {
        if !ndc_in_viewport(&ndc) || self.aspect <= 0.0 {
            return None;
        }
        let (forward, right, up) = camera_basis(&self.eye, &self.target, &self.up)?;
        let tan_half = (self.fov_y_degrees.to_radians() * 0.5).tan();
        let direction =
            forward + right * (ndc.x * tan_half * self.aspect) + up * (ndc.y * tan_half);
        Ray::new(self.eye, direction)
    }
}

/// Parallel-projection camera; `half_height` is the world-space half extent of
/// the viewport vertically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthographicCamera {
    pub eye: Point3<f64>,
    pub target: Point3<f64>,
    pub up: Vector3<f64>,
    pub half_height: f64,
    pub aspect: f64,
}

impl OrthographicCamera {
    pub fn new(eye: Point3<f64>, target: Point3<f64>, half_height: f64) -> Self {
        Self {
            eye,
            target,
            up: Vector3::y(),
            half_height,
            aspect: 1.0,
        }
    }
}

impl Camera for OrthographicCamera {
    fn ray_from_ndc(&self, ndc: Point2<f64>) -> Option<Ray> {
        if !ndc_in_viewport(&ndc) || self.half_height <= 0.0 || self.aspect <= 0.0 {
            return None;
        }
        let (forward, right, up) = camera_basis(&self.eye, &self.target, &self.up)?;
        let origin = self.eye
            + right * (ndc.x * self.half_height * self.aspect)
            + up * (ndc.y * self.half_height);
        Ray::new(origin, forward)
    }
}

// ============================================================================
// BVH
// ============================================================================

impl Aabb {
    fn from_triangle(tri: &Triangle) -> Self {
        let mut aabb = Aabb {
            min: tri.v0,
            max: tri.v0,
        };
        aabb.expand(&tri.v1);
        aabb.expand(&tri.v2);
        aabb
    }

    fn merged(&self, other: &Aabb) -> Self {
        let mut out = *self;
        out.expand(&other.min);
        out.expand(&other.max);
        out
    }

    fn padded(&self, epsilon: f64) -> Self {
        let pad = Vector3::repeat(epsilon);
        Aabb {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Slab test. Returns (t_near, t_far) or None if no intersection.
    fn ray_intersect(&self, origin: &Point3<f64>, dir_inv: &Vector3<f64>) -> Option<(f64, f64)> {
        let t1 = (self.min.x - origin.x) * dir_inv.x;
        let t2 = (self.max.x - origin.x) * dir_inv.x;
        let t3 = (self.min.y - origin.y) * dir_inv.y;
        let t4 = (self.max.y - origin.y) * dir_inv.y;
        let t5 = (self.min.z - origin.z) * dir_inv.z;
        let t6 = (self.max.z - origin.z) * dir_inv.z;

        let t_min = t1.min(t2).max(t3.min(t4)).max(t5.min(t6));
        let t_max = t1.max(t2).min(t3.max(t4)).min(t5.max(t6));

        if t_max >= t_min && t_max >= 0.0 {
            Some((t_min.max(0.0), t_max))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
enum BvhNode {
    Leaf {
        aabb: Aabb,
        face_idx: usize,
    },
    Internal {
        aabb: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn build(triangles: &[Triangle], indices: &mut [usize]) -> Option<Self> {
        match indices.len() {
            0 => None,
            1 => Some(BvhNode::Leaf {
                aabb: Aabb::from_triangle(&triangles[indices[0]]).padded(RAY_EPSILON),
                face_idx: indices[0],
            }),
            _ => {
                let combined = indices
                    .iter()
                    .map(|&i| Aabb::from_triangle(&triangles[i]))
                    .reduce(|a, b| a.merged(&b))?
                    .padded(RAY_EPSILON);

                // Split along the longest extent at the centroid median.
                let extent = combined.extent();
                let axis = if extent.x >= extent.y && extent.x >= extent.z {
                    0
                } else if extent.y >= extent.z {
                    1
                } else {
                    2
                };
                indices.sort_by(|&a, &b| {
                    let va = triangles[a].centroid()[axis];
                    let vb = triangles[b].centroid()[axis];
                    va.total_cmp(&vb)
                });

                let mid = indices.len() / 2;
                let (left_indices, right_indices) = indices.split_at_mut(mid);
                let left = BvhNode::build(triangles, left_indices);
                let right = BvhNode::build(triangles, right_indices);

                match (left, right) {
                    (Some(l), Some(r)) => Some(BvhNode::Internal {
                        aabb: combined,
                        left: Box::new(l),
                        right: Box::new(r),
                    }),
                    (Some(n), None) | (None, Some(n)) => Some(n),
                    (None, None) => None,
                }
            }
        }
    }

    fn aabb(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { aabb, .. } | BvhNode::Internal { aabb, .. } => aabb,
        }
    }
}

/// Möller–Trumbore ray-triangle intersection.
///
/// Returns `(t, u, v)`: distance along the ray and the barycentric weights of
/// `v1` and `v2`.
pub fn ray_triangle_intersect(ray: &Ray, tri: &Triangle) -> Option<(f64, f64, f64)> {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;

    let h = ray.direction.cross(&edge2);
    let a = edge1.dot(&h);

    // Ray is parallel to triangle
    if a.abs() < RAY_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - tri.v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * ray.direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    if t > RAY_EPSILON { Some((t, u, v)) } else { None }
}

/// Nearest hit inside one mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshHit {
    pub face: usize,
    pub distance: f64,
    pub point: Point3<f64>,
    /// Weights of the face's three vertices.
    pub barycentric: [f64; 3],
}

impl MeshHit {
    /// Index (into the face) of the vertex closest to the hit point.
    pub fn nearest_corner(&self) -> usize {
        let [a, b, c] = self.barycentric;
        if a >= b && a >= c {
            0
        } else if b >= c {
            1
        } else {
            2
        }
    }
}

/// BVH over one mesh's triangles.
#[derive(Debug, Clone)]
pub struct SurfaceIndex {
    triangles: Vec<Triangle>,
    root: Option<BvhNode>,
}

impl SurfaceIndex {
    pub fn build(mesh: &Mesh) -> Self {
        let triangles: Vec<Triangle> = mesh.triangles().collect();
        let mut indices: Vec<usize> = (0..triangles.len()).collect();
        let root = BvhNode::build(&triangles, &mut indices);
        trace!(
            target: "mesh_anatomy::raycast",
            triangles = triangles.len(),
            "Built surface BVH"
        );
        Self { triangles, root }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Closest intersection along `ray`, if any.
    pub fn intersect(&self, ray: &Ray) -> Option<MeshHit> {
        let root = self.root.as_ref()?;
        let dir_inv = Vector3::new(
            1.0 / ray.direction.x,
            1.0 / ray.direction.y,
            1.0 / ray.direction.z,
        );
        let (distance, face, u, v) = self.trace(root, ray, &dir_inv, f64::INFINITY)?;
        Some(MeshHit {
            face,
            distance,
            point: ray.at(distance),
            barycentric: [1.0 - u - v, u, v],
        })
    }

    fn trace(
        &self,
        node: &BvhNode,
        ray: &Ray,
        dir_inv: &Vector3<f64>,
        max_dist: f64,
    ) -> Option<(f64, usize, f64, f64)> {
        let (t_near, _) = node.aabb().ray_intersect(&ray.origin, dir_inv)?;
        if t_near > max_dist {
            return None;
        }

        match node {
            BvhNode::Leaf { face_idx, .. } => {
                let (t, u, v) = ray_triangle_intersect(ray, &self.triangles[*face_idx])?;
                (t <= max_dist).then_some((t, *face_idx, u, v))
            }
            BvhNode::Internal { left, right, .. } => {
                let hit_left = self.trace(left, ray, dir_inv, max_dist);
                let max_right = hit_left.map(|h| h.0).unwrap_or(max_dist);
                let hit_right = self.trace(right, ray, dir_inv, max_right);
                match (hit_left, hit_right) {
                    (Some(l), Some(r)) => Some(if l.0 <= r.0 { l } else { r }),
                    (Some(h), None) | (None, Some(h)) => Some(h),
                    (None, None) => None,
                }
            }
        }
    }
}

// ============================================================================
// Scene
// ============================================================================

/// Kind of object the annotation tools create for visual feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ContourHandle,
    LandmarkMarker,
    PreviewLine,
    MarkerGroup,
    Diagnostic,
}

/// What an object in the scene is for. Set once at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    /// Real anatomy; eligible for picking.
    Surface,
    /// Created by a tool; never picked.
    ToolArtifact(ArtifactKind),
}

impl ObjectRole {
    #[inline]
    pub fn is_tool_artifact(&self) -> bool {
        matches!(self, ObjectRole::ToolArtifact(_))
    }
}

/// Stable handle to a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

#[derive(Debug, Clone)]
pub struct SceneObject {
    pub id: ObjectId,
    /// Informational only.
    pub name: String,
    pub role: ObjectRole,
    pub mesh: Mesh,
    index: Option<SurfaceIndex>,
}

impl SceneObject {
    pub fn index(&self) -> Option<&SurfaceIndex> {
        self.index.as_ref()
    }
}

/// Pick result: which surface was hit, and where.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub object: ObjectId,
    pub face: usize,
    pub point: Point3<f64>,
    pub distance: f64,
    pub barycentric: [f64; 3],
}

/// Collection of meshes handed over by the loader plus any diagnostic shapes.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    next_id: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scene holding a single surface mesh.
    pub fn with_surface(name: impl Into<String>, mesh: Mesh) -> (Self, ObjectId) {
        let mut scene = Self::new();
        let id = scene.add_surface(name, mesh);
        (scene, id)
    }

    /// Insert a pickable surface; builds its BVH.
    pub fn add_surface(&mut self, name: impl Into<String>, mesh: Mesh) -> ObjectId {
        let index = Some(SurfaceIndex::build(&mesh));
        self.insert(name.into(), ObjectRole::Surface, mesh, index)
    }

    /// Insert a tool-created object. It is never considered by [`Scene::pick`].
    pub fn add_artifact(
        &mut self,
        name: impl Into<String>,
        kind: ArtifactKind,
        mesh: Mesh,
    ) -> ObjectId {
        self.insert(name.into(), ObjectRole::ToolArtifact(kind), mesh, None)
    }

    fn insert(
        &mut self,
        name: String,
        role: ObjectRole,
        mesh: Mesh,
        index: Option<SurfaceIndex>,
    ) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        debug!(
            target: "mesh_anatomy::scene",
            id = id.0,
            name = %name,
            artifact = role.is_tool_artifact(),
            vertices = mesh.vertex_count(),
            "Scene object added"
        );
        self.objects.push(SceneObject {
            id,
            name,
            role,
            mesh,
            index,
        });
        id
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        let pos = self.objects.iter().position(|o| o.id == id)?;
        Some(self.objects.remove(pos))
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Pickable objects, in insertion order.
    pub fn surfaces(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects
            .iter()
            .filter(|o| matches!(o.role, ObjectRole::Surface))
    }

    /// The first surface, or [`AnatomyError::NoSurfaceInScene`].
    pub fn primary_surface(&self) -> AnatomyResult<&SceneObject> {
        self.surfaces().next().ok_or(AnatomyError::NoSurfaceInScene {
            objects: self.objects.len(),
        })
    }

    /// Swap in a new mesh for a surface and rebuild its BVH.
    ///
    /// The old geometry stays visible to picks until the swap, never a mix.
    pub fn replace_surface_mesh(&mut self, id: ObjectId, mesh: Mesh) -> AnatomyResult<()> {
        let objects = self.objects.len();
        let object = self
            .objects
            .iter_mut()
            .find(|o| o.id == id && matches!(o.role, ObjectRole::Surface))
            .ok_or(AnatomyError::NoSurfaceInScene { objects })?;
        object.index = Some(SurfaceIndex::build(&mesh));
        object.mesh = mesh;
        Ok(())
    }

    /// Nearest surface hit along `ray`.
    pub fn pick_ray(&self, ray: &Ray) -> Option<SurfaceHit> {
        self.surfaces()
            .filter_map(|obj| {
                let hit = obj.index.as_ref()?.intersect(ray)?;
                Some(SurfaceHit {
                    object: obj.id,
                    face: hit.face,
                    point: hit.point,
                    distance: hit.distance,
                    barycentric: hit.barycentric,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Nearest surface hit under the pointer.
    pub fn pick(&self, camera: &dyn Camera, ndc: Point2<f64>) -> Option<SurfaceHit> {
        let ray = camera.ray_from_ndc(ndc)?;
        let hit = self.pick_ray(&ray);
        trace!(
            target: "mesh_anatomy::raycast",
            ndc_x = ndc.x,
            ndc_y = ndc.y,
            hit = hit.is_some(),
            "Surface pick"
        );
        hit
    }
}
