//! anatomy measure command - distances, widths, symmetry and volume.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_anatomy::{MeasurementSet, MeasurementSource, UnitScale, VolumeCalculation, VolumeMethod};
use serde::Serialize;

use crate::{Cli, MeasureArgs, OutputFormat, output};

#[derive(Serialize)]
struct MeasureResult {
    input: String,
    source: MeasurementSource,
    scale: UnitScale,
    measurements: MeasurementSet,
    volume: VolumeCalculation,
}

pub fn run(input: &Path, args: &MeasureArgs, method: VolumeMethod, cli: &Cli) -> Result<()> {
    let mut session = super::open_session(input, cli)?;
    let source = super::prepare_source(&mut session, args)?;

    let result = MeasureResult {
        input: input.display().to_string(),
        source,
        scale: session.scale(),
        measurements: session.measurements(source)?,
        volume: session.volumes(source, method)?,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Measurements".bold().underline());
                println!("  {}: {}", "File".cyan(), result.input);
                println!("  {}: {}", "Source".cyan(), result.source);
                println!(
                    "  {}: {:.4} {} per mesh unit",
                    "Scale".cyan(),
                    result.scale.factor(),
                    result.scale.unit()
                );
                println!();
                println!("{}", result.measurements);
                println!();
                output::heading("Volume", cli);
                println!("{}", result.volume);
            }
        }
    }

    Ok(())
}
