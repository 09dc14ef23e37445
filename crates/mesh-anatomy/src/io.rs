//! Mesh file I/O for STL and OBJ.
//!
//! Used by hosts that read meshes from disk. Meshes handed over by a renderer
//! go through [`Mesh::from_buffers`] instead.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{AnatomyError, AnatomyResult};
use crate::normals::compute_vertex_normals;
use crate::tracing_ext::{log_io_operation, log_mesh_stats};
use crate::types::{Mesh, Vertex};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    Obj,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "stl" => Some(MeshFormat::Stl),
                "obj" => Some(MeshFormat::Obj),
                _ => None,
            })
    }

    fn name(&self) -> &'static str {
        match self {
            MeshFormat::Stl => "stl",
            MeshFormat::Obj => "obj",
        }
    }
}

fn format_of(path: &Path) -> AnatomyResult<MeshFormat> {
    MeshFormat::from_path(path).ok_or_else(|| {
        AnatomyError::unsupported_format(path.extension().and_then(|e| e.to_str()).map(String::from))
    })
}

/// Load a mesh, auto-detecting the format from the extension.
///
/// Vertices without a normal get one computed from the surrounding faces, so
/// the result always satisfies the analyzer's input contract unless the file
/// holds isolated vertices.
pub fn load_mesh(path: &Path) -> AnatomyResult<Mesh> {
    let format = format_of(path)?;
    info!(target: "mesh_anatomy::io", path = %path.display(), format = format.name(), "Loading mesh");

    let result = match format {
        MeshFormat::Stl => load_stl(path),
        MeshFormat::Obj => load_obj(path),
    };
    let mut mesh = match result {
        Ok(mesh) => mesh,
        Err(e) => {
            log_io_operation("load", path, Some(format.name()), false);
            return Err(e);
        }
    };

    if mesh.vertices.is_empty() || mesh.faces.is_empty() {
        return Err(AnatomyError::empty_mesh("file has no vertices or faces"));
    }
    mesh.check_geometry()?;

    let missing = mesh.missing_normal_count();
    if missing > 0 {
        debug!(target: "mesh_anatomy::io", missing, "Computing vertex normals");
        compute_vertex_normals(&mut mesh);
    }

    if let Some(bounds) = mesh.bounds() {
        let dims = bounds.extent();
        let max_dim = dims.x.max(dims.y).max(dims.z);
        if max_dim < 0.1 {
            warn!(
                target: "mesh_anatomy::io",
                max_dim = format!("{:.6}", max_dim),
                "Mesh is very small; calibrate the unit scale before reading measurements"
            );
        }
    }

    log_mesh_stats(&mesh, "loaded");
    log_io_operation("load", path, Some(format.name()), true);
    Ok(mesh)
}

/// Load mesh from STL file (binary or ASCII). STL carries no vertex normals.
fn load_stl(path: &Path) -> AnatomyResult<Mesh> {
    let file = File::open(path).map_err(|e| AnatomyError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let stl = stl_io::read_stl(&mut reader).map_err(|e| AnatomyError::parse_error(path, e.to_string()))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices
            .push(Vertex::from_coords(v.0[0] as f64, v.0[1] as f64, v.0[2] as f64));
    }

    for face in &stl.faces {
        let indices = [
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ];
        // Skip degenerate triangles
        if indices[0] != indices[1] && indices[1] != indices[2] && indices[0] != indices[2] {
            mesh.faces.push(indices);
        }
    }

    debug!(
        target: "mesh_anatomy::io",
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "STL converted"
    );
    Ok(mesh)
}

/// Load mesh from OBJ file, keeping the file's normals when present.
fn load_obj(path: &Path) -> AnatomyResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| AnatomyError::parse_error(path, e.to_string()))?;

    if models.is_empty() {
        return Err(AnatomyError::empty_mesh("OBJ file contains no models"));
    }

    // Merge all models into a single mesh
    let mut mesh = Mesh::new();
    let mut vertex_offset = 0u32;

    for model in &models {
        let obj_mesh = &model.mesh;
        let has_normals = obj_mesh.normals.len() == obj_mesh.positions.len();

        for (i, p) in obj_mesh.positions.chunks_exact(3).enumerate() {
            let mut vertex = Vertex::from_coords(p[0] as f64, p[1] as f64, p[2] as f64);
            if has_normals {
                let n = &obj_mesh.normals[i * 3..i * 3 + 3];
                vertex.normal = Vector3::new(n[0] as f64, n[1] as f64, n[2] as f64).try_normalize(f64::EPSILON);
            }
            mesh.vertices.push(vertex);
        }

        for t in obj_mesh.indices.chunks_exact(3) {
            mesh.faces
                .push([t[0] + vertex_offset, t[1] + vertex_offset, t[2] + vertex_offset]);
        }

        vertex_offset = mesh.vertices.len() as u32;
    }

    debug!(
        target: "mesh_anatomy::io",
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        models = models.len(),
        "OBJ loaded"
    );
    Ok(mesh)
}

/// Save a mesh, choosing the format from the extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> AnatomyResult<()> {
    let format = format_of(path)?;
    let result = match format {
        MeshFormat::Stl => save_stl(mesh, path),
        MeshFormat::Obj => save_obj(mesh, path),
    };
    log_io_operation("save", path, Some(format.name()), result.is_ok());
    result
}

/// Save mesh to STL file (binary format).
pub fn save_stl(mesh: &Mesh, path: &Path) -> AnatomyResult<()> {
    let file = File::create(path).map_err(|e| AnatomyError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal().unwrap_or_else(Vector3::zeros);
            let (v0, v1, v2) = (tri.v0, tri.v1, tri.v2);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [
                    stl_io::Vertex::new([v0.x as f32, v0.y as f32, v0.z as f32]),
                    stl_io::Vertex::new([v1.x as f32, v1.y as f32, v1.z as f32]),
                    stl_io::Vertex::new([v2.x as f32, v2.y as f32, v2.z as f32]),
                ],
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(|e| AnatomyError::io_write(path, e))?;
    writer.flush().map_err(|e| AnatomyError::io_write(path, e))?;

    debug!(target: "mesh_anatomy::io", triangles = triangles.len(), "STL written");
    Ok(())
}

/// Save mesh to OBJ file (ASCII), with vertex normals when present.
///
/// OBJ keeps the indexed structure, so a deformed mesh reloads with the same
/// vertex numbering as its source.
pub fn save_obj(mesh: &Mesh, path: &Path) -> AnatomyResult<()> {
    let file = File::create(path).map_err(|e| AnatomyError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer).map_err(|e| AnatomyError::io_write(path, e))?;
    debug!(
        target: "mesh_anatomy::io",
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "OBJ written"
    );
    Ok(())
}

fn write_obj(mesh: &Mesh, w: &mut impl Write) -> std::io::Result<()> {
    writeln!(w, "# OBJ file exported by mesh-anatomy")?;
    writeln!(w, "# Vertices: {}", mesh.vertices.len())?;
    writeln!(w, "# Faces: {}", mesh.faces.len())?;
    writeln!(w)?;

    for v in &mesh.vertices {
        writeln!(w, "v {:.6} {:.6} {:.6}", v.position.x, v.position.y, v.position.z)?;
    }

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    if has_normals {
        writeln!(w)?;
        for v in &mesh.vertices {
            // Zero placeholder keeps normal indices aligned with vertex indices.
            let n = v.normal.unwrap_or_else(Vector3::zeros);
            writeln!(w, "vn {:.6} {:.6} {:.6}", n.x, n.y, n.z)?;
        }
    }

    writeln!(w)?;
    for face in &mesh.faces {
        // OBJ uses 1-based indexing
        let [i0, i1, i2] = face.map(|i| i + 1);
        if has_normals {
            writeln!(w, "f {}//{} {}//{} {}//{}", i0, i0, i1, i1, i2, i2)?;
        } else {
            writeln!(w, "f {} {} {}", i0, i1, i2)?;
        }
    }
    w.flush()
}
