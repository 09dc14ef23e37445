//! anatomy info command - display mesh statistics.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_anatomy::Mesh;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    surface_area: f64,
    has_normals: bool,
    up: String,
    forward: String,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh = Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let config = super::load_config(cli)?;

    let bounds = mesh.bounds().map(|b| {
        let dims = b.extent();
        BoundsInfo {
            min: output::point(&b.min),
            max: output::point(&b.max),
            dimensions: [dims.x, dims.y, dims.z],
        }
    });

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        bounds,
        surface_area: mesh.surface_area(),
        has_normals: mesh.has_normals(),
        up: format!("{:?}", config.frame.up),
        forward: format!("{:?}", config.frame.forward),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Mesh Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Vertices".cyan(), info.vertices);
                println!("  {}: {}", "Faces".cyan(), info.faces);

                if let Some(ref b) = info.bounds {
                    println!(
                        "  {}: {:.3} x {:.3} x {:.3} units",
                        "Dimensions".cyan(),
                        b.dimensions[0],
                        b.dimensions[1],
                        b.dimensions[2]
                    );
                    println!("  {}: {}", "Min bounds".cyan(), output::format_point(&b.min));
                    println!("  {}: {}", "Max bounds".cyan(), output::format_point(&b.max));
                }
                println!("  {}: {:.3} units²", "Surface area".cyan(), info.surface_area);
                println!(
                    "  {}: {}",
                    "Has normals".cyan(),
                    if info.has_normals { "yes" } else { "no" }
                );
                println!(
                    "  {}: up {}, forward {}",
                    "Body frame".cyan(),
                    info.up,
                    info.forward
                );
            }
        }
    }

    Ok(())
}
