//! anatomy config command - show or write the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_anatomy::AnatomyConfig;

use crate::{Cli, OutputFormat, output};

pub fn run(output_path: Option<&Path>, list: bool, cli: &Cli) -> Result<()> {
    if list {
        match cli.format {
            OutputFormat::Json => output::print(&AnatomyConfig::PRESETS, cli.format, cli.quiet),
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", "Presets".bold().underline());
                    for name in AnatomyConfig::PRESETS {
                        println!("  {}", name.cyan());
                    }
                }
            }
        }
        return Ok(());
    }

    let config = super::load_config(cli)?;

    if let Some(path) = output_path {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            std::fs::write(path, config.to_json()?)
                .with_context(|| format!("Failed to write {:?}", path))?;
        } else {
            config
                .save_toml(path)
                .with_context(|| format!("Failed to write {:?}", path))?;
        }
        if !cli.quiet {
            println!("{} {}", "Wrote".green(), path.display());
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => output::print(&config, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                print!("{}", config.to_toml()?);
            }
        }
    }
    Ok(())
}
