//! Per-vertex normal computation.

use hashbrown::HashSet;
use nalgebra::Vector3;
use tracing::debug;

use crate::types::Mesh;

/// Compute area-weighted vertex normals from the faces around each vertex.
///
/// Vertices with no incident faces, or whose incident faces are all degenerate,
/// end up with `normal = None`.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut normal_accum: Vec<Vector3<f64>> = vec![Vector3::zeros(); mesh.vertices.len()];

    for (face, tri) in mesh.faces.iter().zip(mesh.triangles()) {
        // Unnormalized normal has length 2*area, which gives the area weighting.
        let weighted_normal = tri.normal_unnormalized();
        for &idx in face {
            normal_accum[idx as usize] += weighted_normal;
        }
    }

    for (vertex, accum) in mesh.vertices.iter_mut().zip(normal_accum) {
        vertex.normal = accum.try_normalize(f64::EPSILON);
    }

    debug!(
        target: "mesh_anatomy::normals",
        vertices = mesh.vertices.len(),
        "Computed vertex normals"
    );
}

/// Recompute normals only where `moved` vertices can have changed them.
///
/// A vertex normal depends on the faces around it, so every vertex sharing a face
/// with a moved vertex is refreshed. Returns the number of normals rewritten.
pub fn recompute_normals_near(mesh: &mut Mesh, moved: &[u32]) -> usize {
    if moved.is_empty() {
        return 0;
    }
    let moved: HashSet<u32> = moved.iter().copied().collect();

    let touched_faces: Vec<usize> = mesh
        .faces
        .iter()
        .enumerate()
        .filter(|(_, f)| f.iter().any(|v| moved.contains(v)))
        .map(|(i, _)| i)
        .collect();

    let affected: HashSet<u32> = touched_faces
        .iter()
        .flat_map(|&fi| mesh.faces[fi])
        .collect();

    let mut accum: hashbrown::HashMap<u32, Vector3<f64>> =
        affected.iter().map(|&v| (v, Vector3::zeros())).collect();

    for (face, tri) in mesh.faces.iter().zip(mesh.triangles()) {
        if !face.iter().any(|v| affected.contains(v)) {
            continue;
        }
        let weighted_normal = tri.normal_unnormalized();
        for idx in face {
            if let Some(sum) = accum.get_mut(idx) {
                *sum += weighted_normal;
            }
        }
    }

    let count = accum.len();
    for (idx, sum) in accum {
        mesh.vertices[idx as usize].normal = sum.try_normalize(f64::EPSILON);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use approx::assert_relative_eq;

    fn make_grid(n: usize) -> Mesh {
        let mut mesh = Mesh::new();
        for j in 0..n {
            for i in 0..n {
                mesh.vertices
                    .push(Vertex::from_coords(i as f64, j as f64, 0.0));
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
        mesh
    }

    #[test]
    fn test_flat_grid_normals_point_up() {
        let mut mesh = make_grid(4);
        compute_vertex_normals(&mut mesh);
        for v in &mesh.vertices {
            let n = v.normal.expect("every grid vertex has faces");
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_isolated_vertex_has_no_normal() {
        let mut mesh = make_grid(3);
        mesh.vertices.push(Vertex::from_coords(10.0, 10.0, 10.0));
        compute_vertex_normals(&mut mesh);
        assert!(mesh.vertices.last().unwrap().normal.is_none());
        assert_eq!(mesh.missing_normal_count(), 1);
    }

    #[test]
    fn test_local_recompute_matches_full() {
        let mut mesh = make_grid(5);
        compute_vertex_normals(&mut mesh);
        mesh.vertices[12].position.z = 0.5;

        let mut full = mesh.clone();
        compute_vertex_normals(&mut full);

        let refreshed = recompute_normals_near(&mut mesh, &[12]);
        assert!(refreshed >= 7, "center vertex has many neighbours, got {}", refreshed);
        for (a, b) in mesh.vertices.iter().zip(&full.vertices) {
            let (na, nb) = (a.normal.unwrap(), b.normal.unwrap());
            assert_relative_eq!(na, nb, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_local_recompute_nothing_moved() {
        let mut mesh = make_grid(3);
        assert_eq!(recompute_normals_near(&mut mesh, &[]), 0);
    }
}
