//! Subcommand implementations.

pub mod config;
pub mod detect;
pub mod info;
pub mod measure;
pub mod simulate;

use std::path::Path;

use anyhow::{Context, Result, bail};
use mesh_anatomy::{AnatomyConfig, AnatomySession, AnnotationSet, MeasurementSource, Mesh, UnitScale};

use crate::{Cli, MeasureArgs};

/// Configuration from `--config`, `--preset`, or the defaults.
pub fn load_config(cli: &Cli) -> Result<AnatomyConfig> {
    let config = match (&cli.config, &cli.preset) {
        (Some(path), _) => AnatomyConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        (None, Some(name)) => AnatomyConfig::preset(name).with_context(|| {
            format!(
                "Unknown preset {:?} (available: {})",
                name,
                AnatomyConfig::PRESETS.join(", ")
            )
        })?,
        (None, None) => AnatomyConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Load the mesh and start a session with the effective configuration.
pub fn open_session(input: &Path, cli: &Cli) -> Result<AnatomySession> {
    let mesh = Mesh::load(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let config = load_config(cli)?;
    Ok(AnatomySession::new(mesh, config)?)
}

/// Load annotations or run the analysis, then apply the requested scale.
pub fn prepare_source(session: &mut AnatomySession, args: &MeasureArgs) -> Result<MeasurementSource> {
    let source = match &args.annotations {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read annotations from {:?}", path))?;
            let annotations = AnnotationSet::from_json(&json)
                .with_context(|| format!("Invalid annotation file {:?}", path))?;
            if annotations.is_empty() {
                bail!("Annotation file {:?} has no contours or landmarks", path);
            }
            session.load_annotations(annotations);
            MeasurementSource::Manual
        }
        None => {
            session.run_analysis().context("Feature analysis failed")?;
            MeasurementSource::Automatic
        }
    };

    if let Some(factor) = args.scale {
        session.set_scale(UnitScale::centimeters(factor)?);
    } else if let Some(real_cm) = args.calibrate {
        session
            .calibrate(source, real_cm)
            .context("Calibration needs a landmark on each side")?;
    }
    Ok(source)
}
