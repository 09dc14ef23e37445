//! k-d tree over mesh vertex positions.
//!
//! Built once per analysis pass and shared read-only by every curvature chunk,
//! which keeps neighbourhood queries at O(log n) instead of scanning all vertices.

use hashbrown::HashMap;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point3, Rotation3};

use crate::types::Mesh;

/// Neighbour returned by a spatial query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Vertex index in the source mesh.
    pub index: usize,
    /// Euclidean distance to the query point.
    pub distance: f64,
}

/// Spatial index over vertex positions.
///
/// Points are stored in a fixed rotated frame. Axis-aligned data (flat grids,
/// latitude rings of a sphere) would otherwise put more items on a single split
/// value than a k-d tree bucket holds. Distances are rotation invariant.
///
/// Coincident points are welded: the tree holds each distinct position once
/// and `members` maps it back to every input index at that position. Triangle
/// soups and seam-split OBJ files repeat a fan vertex once per face, and a
/// bucket cannot split items that agree on every axis.
pub struct SpatialIndex {
    tree: KdTree<f64, 3>,
    frame: Rotation3<f64>,
    members: Vec<Vec<usize>>,
    len: usize,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.len)
            .field("distinct", &self.members.len())
            .finish()
    }
}

impl SpatialIndex {
    /// Index every vertex of `mesh`.
    pub fn build(mesh: &Mesh) -> Self {
        Self::from_points(mesh.vertices.iter().map(|v| &v.position))
    }

    /// Index arbitrary points; item ids are their iteration order.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let frame = Rotation3::from_euler_angles(0.4636, 0.7297, 0.2915);
        let mut tree = KdTree::new();
        let mut slots: HashMap<[u64; 3], usize> = HashMap::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        let mut len = 0;
        for (i, p) in points.into_iter().enumerate() {
            len += 1;
            let slot = *slots.entry(weld_key(p)).or_insert_with(|| {
                tree.add(&key(&frame, p), members.len() as u64);
                members.push(Vec::new());
                members.len() - 1
            });
            members[slot].push(i);
        }
        Self {
            tree,
            frame,
            members,
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct positions stored in the tree.
    #[inline]
    pub fn distinct_len(&self) -> usize {
        self.members.len()
    }

    fn expand(&self, slot: u64, distance: f64) -> impl Iterator<Item = Neighbor> + '_ {
        self.members[slot as usize].iter().map(move |&index| Neighbor { index, distance })
    }

    /// All indexed points within `radius` of `center` (inclusive), nearest first.
    pub fn within_radius(&self, center: &Point3<f64>, radius: f64) -> Vec<Neighbor> {
        if self.is_empty() || radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        self.tree
            .within::<SquaredEuclidean>(&key(&self.frame, center), radius * radius)
            .into_iter()
            .flat_map(|n| self.expand(n.item, n.distance.sqrt()))
            .collect()
    }

    /// The `k` nearest indexed points, nearest first. May include the query
    /// point itself when it is indexed.
    pub fn nearest(&self, center: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        // Every slot holds at least one index, so k slots cover k neighbours.
        let k_slots = k.min(self.members.len());
        let mut found: Vec<Neighbor> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&key(&self.frame, center), k_slots)
            .into_iter()
            .flat_map(|n| self.expand(n.item, n.distance.sqrt()))
            .collect();
        found.truncate(k);
        found
    }

    /// Median distance from a vertex to its nearest distinct neighbour.
    ///
    /// Samples are taken over the input vertices, so a position repeated many
    /// times weighs in as often as it occurs.
    ///
    /// Uses an evenly strided sample of at most `max_samples` vertices so the
    /// cost stays bounded on large meshes. Coincident duplicates (distance 0)
    /// are skipped. Returns `None` when no vertex has a distinct neighbour.
    pub fn median_spacing(&self, mesh: &Mesh, max_samples: usize) -> Option<f64> {
        let n = mesh.vertices.len().min(self.len);
        if n < 2 || max_samples == 0 {
            return None;
        }
        let stride = n.div_ceil(max_samples).max(1);

        let mut spacings: Vec<f64> = (0..n)
            .step_by(stride)
            .filter_map(|i| {
                let p = &mesh.vertices[i].position;
                // Distinct positions only; a few extra for near-coincident seams.
                self.tree
                    .nearest_n::<SquaredEuclidean>(&key(&self.frame, p), 8)
                    .into_iter()
                    .map(|n| n.distance.sqrt())
                    .find(|&d| d > f64::EPSILON)
            })
            .collect();

        if spacings.is_empty() {
            return None;
        }
        let mid = spacings.len() / 2;
        let (_, median, _) = spacings.select_nth_unstable_by(mid, f64::total_cmp);
        Some(*median)
    }
}

/// Bit pattern of a position, with -0.0 folded into 0.0.
#[inline]
fn weld_key(p: &Point3<f64>) -> [u64; 3] {
    [p.x, p.y, p.z].map(|c| if c == 0.0 { 0u64 } else { c.to_bits() })
}

#[inline]
fn key(frame: &Rotation3<f64>, p: &Point3<f64>) -> [f64; 3] {
    let r = frame * p;
    [r.x, r.y, r.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    fn make_line(n: usize, spacing: f64) -> Mesh {
        let mut mesh = Mesh::new();
        for i in 0..n {
            mesh.vertices
                .push(Vertex::from_coords(i as f64 * spacing, 0.0, 0.0));
        }
        mesh
    }

    #[test]
    fn test_within_radius() {
        let mesh = make_line(10, 1.0);
        let index = SpatialIndex::build(&mesh);
        assert_eq!(index.len(), 10);

        let hits = index.within_radius(&Point3::new(5.0, 0.0, 0.0), 1.5);
        let mut found: Vec<usize> = hits.iter().map(|n| n.index).collect();
        found.sort_unstable();
        assert_eq!(found, vec![4, 5, 6]);
    }

    #[test]
    fn test_nearest_order() {
        let mesh = make_line(10, 1.0);
        let index = SpatialIndex::build(&mesh);
        let hits = index.nearest(&Point3::new(2.2, 0.0, 0.0), 2);
        assert_eq!(hits[0].index, 2);
        assert_eq!(hits[1].index, 3);
        assert_relative_eq!(hits[0].distance, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_median_spacing_skips_duplicates() {
        let mut mesh = make_line(20, 0.25);
        // Duplicate every vertex, as an unindexed seam would.
        let copies = mesh.vertices.clone();
        mesh.vertices.extend(copies);
        let index = SpatialIndex::build(&mesh);
        let spacing = index.median_spacing(&mesh, 100).unwrap();
        assert_relative_eq!(spacing, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_many_coincident_points() {
        // A fan of 64 triangles stored as a soup repeats the hub once per face.
        let mut mesh = make_line(10, 0.5);
        for _ in 0..64 {
            mesh.vertices.push(Vertex::from_coords(2.0, 0.0, 0.0));
        }
        let index = SpatialIndex::build(&mesh);
        assert_eq!(index.len(), 74);
        assert_eq!(index.distinct_len(), 10);

        let hits = index.within_radius(&Point3::new(2.0, 0.0, 0.0), 0.1);
        assert_eq!(hits.len(), 65);
        assert!(hits.iter().all(|n| n.distance < 1e-12));
        assert!(hits.iter().any(|n| n.index == 4));
        assert!(hits.iter().any(|n| n.index == 73));

        // 65 at the hub, then the two line neighbours.
        let nearest = index.nearest(&Point3::new(2.0, 0.0, 0.0), 67);
        assert_eq!(nearest.len(), 67);
        assert_relative_eq!(nearest[64].distance, 0.0, epsilon = 1e-12);
        assert_relative_eq!(nearest[66].distance, 0.5, epsilon = 1e-12);

        let spacing = index.median_spacing(&mesh, 100).unwrap();
        assert_relative_eq!(spacing, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_negative_zero_welds() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(-0.0, 1.0, -0.0));
        let index = SpatialIndex::build(&mesh);
        assert_eq!(index.distinct_len(), 1);
        assert_eq!(index.nearest(&Point3::new(0.0, 1.0, 0.0), 2).len(), 2);
    }

    #[test]
    fn test_flat_grid_builds() {
        let mut mesh = Mesh::new();
        for j in 0..40 {
            for i in 0..40 {
                mesh.vertices
                    .push(Vertex::from_coords(i as f64, j as f64, 0.0));
            }
        }
        let index = SpatialIndex::build(&mesh);
        let hits = index.within_radius(&Point3::new(10.0, 10.0, 0.0), 1.01);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].index, 10 * 40 + 10);
        assert_relative_eq!(hits[0].distance, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(&Mesh::new());
        assert!(index.is_empty());
        assert!(index.within_radius(&Point3::origin(), 1.0).is_empty());
        assert!(index.nearest(&Point3::origin(), 3).is_empty());
        assert!(index.median_spacing(&Mesh::new(), 10).is_none());
    }
}
