//! anatomy simulate command - augmentation preview.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_anatomy::{AugmentationParams, MeasurementSource, VolumeCalculation};
use serde::Serialize;

use crate::{Cli, MeasureArgs, OutputFormat, output};

#[derive(Serialize)]
struct SimulateResult {
    input: String,
    output: String,
    source: MeasurementSource,
    params: AugmentationParams,
    vertices_modified: usize,
    max_displacement: f64,
    volume_before: VolumeCalculation,
    volume_after: VolumeCalculation,
    volume_change_percent: f64,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    args: &MeasureArgs,
    params: &AugmentationParams,
    cli: &Cli,
) -> Result<()> {
    let mut session = super::open_session(input, cli)?;
    let source = super::prepare_source(&mut session, args)?;

    let outcome = session
        .simulate(source, params)
        .context("Augmentation failed")?;

    let result = SimulateResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        source,
        params: *params,
        vertices_modified: outcome.vertices_modified,
        max_displacement: outcome.max_displacement,
        volume_before: outcome.before.clone(),
        volume_after: outcome.after.clone(),
        volume_change_percent: outcome.volume_change(),
    };

    session
        .mesh()
        .save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;
    tracing::info!(path = %output_path.display(), "saved augmented mesh");

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Augmentation Preview".bold().underline());
                println!("  {}: {}", "Input".cyan(), result.input);
                println!("  {}: {}", "Output".cyan(), result.output);
                println!("  {}: {}", "Source".cyan(), result.source);
                println!(
                    "  {}: size {:.2}, projection {:.2}, profile {}",
                    "Parameters".cyan(),
                    params.size_multiplier,
                    params.projection_multiplier,
                    params.profile
                );
                println!("  {}: {}", "Vertices moved".cyan(), result.vertices_modified);
                println!("  {}: {:.4}", "Max displacement".cyan(), result.max_displacement);
                println!();
                output::heading("Before", cli);
                println!("{}", result.volume_before);
                output::heading("After", cli);
                println!("{}", result.volume_after);
                let change = format!("{:+.1}%", result.volume_change_percent);
                println!(
                    "  {}: {}",
                    "Volume change".cyan(),
                    if result.volume_change_percent >= 0.0 {
                        change.green()
                    } else {
                        change.yellow()
                    }
                );
            }
        }
    }

    Ok(())
}
