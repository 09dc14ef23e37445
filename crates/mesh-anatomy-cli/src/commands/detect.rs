//! anatomy detect command - curvature-based region and landmark detection.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_anatomy::{AnatomySession, LandmarkStrategy, Mesh, Side, VertexFeature};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct DetectResult {
    input: String,
    threshold: f64,
    threshold_source: String,
    radius: f64,
    region_vertices: usize,
    candidates: usize,
    midline: f64,
    sides: Vec<SideResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<Vec<VertexFeature>>,
}

#[derive(Serialize)]
struct SideResult {
    side: Side,
    region_vertices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    centroid: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    landmark: Option<[f64; 3]>,
}

pub fn run(input: &Path, strategy: Option<LandmarkStrategy>, features: bool, cli: &Cli) -> Result<()> {
    let mesh = Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let mut config = super::load_config(cli)?;
    if let Some(strategy) = strategy {
        config.analysis.landmark_strategy = strategy;
    }

    let mut session = AnatomySession::new(mesh, config)?;
    let analysis = session.run_analysis().context("Feature analysis failed")?;

    let sides = Side::BOTH
        .iter()
        .map(|&side| {
            let region = analysis.region(side);
            SideResult {
                side,
                region_vertices: region.map_or(0, |r| r.len()),
                centroid: region.map(|r| output::point(&r.centroid)),
                landmark: analysis.landmark(side).map(|l| output::point(&l.position)),
            }
        })
        .collect();

    let result = DetectResult {
        input: input.display().to_string(),
        threshold: analysis.threshold.value,
        threshold_source: analysis.threshold.source.to_string(),
        radius: analysis.radius,
        region_vertices: analysis.region_vertex_count,
        candidates: analysis.candidate_count,
        midline: analysis.midline,
        sides,
        features: features.then(|| analysis.features.clone()),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Feature Detection".bold().underline());
                println!("  {}: {}", "File".cyan(), result.input);
                println!(
                    "  {}: {:.5} ({})",
                    "Curvature threshold".cyan(),
                    result.threshold,
                    result.threshold_source
                );
                println!("  {}: {:.4} units", "Neighbourhood radius".cyan(), result.radius);
                println!("  {}: {}", "Region vertices".cyan(), result.region_vertices);
                println!("  {}: {}", "Candidates".cyan(), result.candidates);
                println!();
                for side in &result.sides {
                    output::heading(&format!("{} side", side.side), cli);
                    println!("  {}: {}", "Region vertices".cyan(), side.region_vertices);
                    match &side.landmark {
                        Some(p) => println!("  {}: {}", "Landmark".cyan(), output::format_point(p)),
                        None => println!("  {}: {}", "Landmark".cyan(), "not found".yellow()),
                    }
                }
            }
        }
    }

    Ok(())
}
