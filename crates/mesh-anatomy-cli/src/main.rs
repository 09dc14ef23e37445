//! anatomy: Command-line interface for mesh-based anatomical measurement.
//!
//! Detects regions and landmarks on a torso mesh, measures them from either
//! the automatic detection or a JSON file of hand-drawn annotations, and
//! writes augmentation previews.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_anatomy=info` - Basic operation logging
//! - `RUST_LOG=mesh_anatomy=debug` - Detailed progress logging
//! - `RUST_LOG=mesh_anatomy::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Detect regions with info logging
//! RUST_LOG=mesh_anatomy=info anatomy detect torso.obj
//!
//! # Measure hand-drawn annotations, calibrated to a 19.5 cm landmark distance
//! anatomy measure torso.obj --annotations marks.json --calibrate 19.5
//!
//! # Preview a 20% size increase
//! anatomy simulate torso.obj -o preview.obj --size 1.2 --profile high
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use mesh_anatomy::{ImplantProfile, ImplantShape, LandmarkStrategy, VolumeMethod};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{config, detect, info, measure, simulate};

/// anatomy - Anatomical measurement and augmentation preview on torso meshes.
#[derive(Parser)]
#[command(name = "anatomy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(long, global = true, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in configuration preset
    #[arg(long, global = true)]
    preset: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Where measurements come from and how they are scaled.
#[derive(clap::Args)]
pub struct MeasureArgs {
    /// Annotation JSON file; without it the automatic detection is used
    #[arg(long, short)]
    annotations: Option<PathBuf>,

    /// Centimeters per mesh unit
    #[arg(long, conflicts_with = "calibrate")]
    scale: Option<f64>,

    /// Real landmark-to-landmark distance in cm, used to derive the scale
    #[arg(long)]
    calibrate: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh statistics and information
    Info {
        /// Input mesh file
        input: PathBuf,
    },

    /// Detect breast regions and landmarks from surface curvature
    Detect {
        /// Input mesh file
        input: PathBuf,

        /// Landmark selection strategy
        #[arg(long)]
        strategy: Option<StrategyArg>,

        /// Include per-vertex features in JSON output
        #[arg(long)]
        features: bool,
    },

    /// Measure distances, widths, projection, symmetry and volume
    Measure {
        /// Input mesh file
        input: PathBuf,

        #[command(flatten)]
        source: MeasureArgs,

        /// Volume method
        #[arg(long, default_value = "ellipsoid")]
        method: MethodArg,
    },

    /// Deform the mesh to preview an augmentation
    Simulate {
        /// Input mesh file
        input: PathBuf,

        /// Output file path for the deformed mesh
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        source: MeasureArgs,

        /// Overall size multiplier
        #[arg(long, default_value = "1.0")]
        size: f64,

        /// Forward projection multiplier
        #[arg(long, default_value = "1.0")]
        projection: f64,

        /// Upper pole fullness (-1..1)
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        upper: f64,

        /// Lower pole fullness (-1..1)
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        lower: f64,

        /// Vertical offset (-1..1)
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        height: f64,

        /// Offset toward the midline (-1..1)
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        medial: f64,

        /// Implant shape
        #[arg(long, default_value = "round")]
        shape: ShapeArg,

        /// Implant profile
        #[arg(long, default_value = "moderate")]
        profile: ProfileArg,
    },

    /// Print or write the effective configuration
    Config {
        /// Write to this file (TOML, or JSON by extension) instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// List the built-in presets
        #[arg(long)]
        list: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Weighted curvature plus closeness to the region centroid
    Centrality,
    /// Most forward candidate
    Prominence,
}

impl From<StrategyArg> for LandmarkStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Centrality => LandmarkStrategy::CurvatureCentrality,
            StrategyArg::Prominence => LandmarkStrategy::Prominence,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    /// Ellipsoid estimate from width and projection
    Ellipsoid,
    /// Signed-tetrahedron integration over the region surface
    Mesh,
}

impl From<MethodArg> for VolumeMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Ellipsoid => VolumeMethod::Ellipsoid,
            MethodArg::Mesh => VolumeMethod::MeshIntegration,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ShapeArg {
    Round,
    Teardrop,
    Gummy,
}

impl From<ShapeArg> for ImplantShape {
    fn from(arg: ShapeArg) -> Self {
        match arg {
            ShapeArg::Round => ImplantShape::Round,
            ShapeArg::Teardrop => ImplantShape::Teardrop,
            ShapeArg::Gummy => ImplantShape::Gummy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProfileArg {
    Low,
    Moderate,
    High,
    UltraHigh,
}

impl From<ProfileArg> for ImplantProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Low => ImplantProfile::Low,
            ProfileArg::Moderate => ImplantProfile::Moderate,
            ProfileArg::High => ImplantProfile::High,
            ProfileArg::UltraHigh => ImplantProfile::UltraHigh,
        }
    }
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_anatomy=info",
            2 => "mesh_anatomy=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input } => info::run(input, &cli),
        Commands::Detect {
            input,
            strategy,
            features,
        } => detect::run(input, strategy.map(Into::into), *features, &cli),
        Commands::Measure {
            input,
            source,
            method,
        } => measure::run(input, source, (*method).into(), &cli),
        Commands::Simulate {
            input,
            output,
            source,
            size,
            projection,
            upper,
            lower,
            height,
            medial,
            shape,
            profile,
        } => {
            let params = mesh_anatomy::AugmentationParams::default()
                .with_size_multiplier(*size)
                .with_projection_multiplier(*projection)
                .with_pole_fullness(*upper, *lower)
                .with_offsets(*height, *medial)
                .with_shape((*shape).into())
                .with_profile((*profile).into());
            simulate::run(input, output, source, &params, &cli)
        }
        Commands::Config { output, list } => config::run(output.as_deref(), *list, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(err) = e.downcast_ref::<mesh_anatomy::AnatomyError>() {
                eprintln!("{}: {}", "Error".red().bold(), err);
                eprintln!("  {}: {}", "Code".cyan(), err.code());
                eprintln!("  {}: {}", "Suggestion".green(), err.recovery_suggestion());
                if let Some(location) = err.location() {
                    eprintln!("  {}: {}", "Location".yellow(), location);
                }
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
