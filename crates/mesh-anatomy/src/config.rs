//! Persisted configuration for a measurement session.
//!
//! Every heuristic constant the library uses lives in one of the sections
//! below, so a deployment can retune thresholds without touching code.
//!
//! # Example TOML
//!
//! ```toml
//! [frame]
//! up = "z"
//! forward = "y"
//! left_is_positive = false
//!
//! [analysis]
//! forward_min = 0.4
//! landmark_strategy = "prominence"
//!
//! [analysis.curvature]
//! radius_factor = 4.0
//!
//! [sizing]
//! basis = "volume"
//! ```
//!
//! Missing sections and keys fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::{AnalysisParams, LandmarkStrategy};
use crate::annotation::CaptureConfig;
use crate::augment::AugmentConfig;
use crate::curvature::CurvatureParams;
use crate::error::AnatomyResult;
use crate::sizing::SizeChart;
use crate::types::BodyFrame;

/// All tunables, grouped by component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnatomyConfig {
    pub frame: BodyFrame,
    pub capture: CaptureConfig,
    pub analysis: AnalysisParams,
    pub sizing: SizeChart,
    pub augment: AugmentConfig,
}

impl AnatomyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scanner output: Z up, facing +Y, prominence landmarks.
    pub fn preset_scanner() -> Self {
        Self {
            frame: BodyFrame::z_up(),
            analysis: AnalysisParams::default().with_landmark_strategy(LandmarkStrategy::Prominence),
            ..Self::default()
        }
    }

    /// Dense meshes: wider curvature neighbourhoods, volume-based sizing.
    pub fn preset_high_resolution() -> Self {
        Self {
            analysis: AnalysisParams::default().with_curvature(CurvatureParams::smooth()),
            sizing: SizeChart::volume(),
            ..Self::default()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "scanner" => Some(Self::preset_scanner()),
            "high-resolution" => Some(Self::preset_high_resolution()),
            _ => None,
        }
    }

    pub const PRESETS: [&'static str; 3] = ["default", "scanner", "high-resolution"];

    /// Check every section.
    ///
    /// # Errors
    ///
    /// The first [`crate::AnatomyError::InvalidParameter`] found.
    pub fn validate(&self) -> AnatomyResult<()> {
        if !self.frame.is_valid() {
            return Err(crate::AnatomyError::invalid_parameter(
                "frame.forward",
                0.0,
                "up and forward must be different axes",
            ));
        }
        self.analysis.validate()?;
        self.sizing.validate()?;
        self.augment.validate()?;
        if !(self.capture.min_point_spacing >= 0.0) {
            return Err(crate::AnatomyError::invalid_parameter(
                "capture.min_point_spacing",
                self.capture.min_point_spacing,
                "must be non-negative",
            ));
        }
        Ok(())
    }

    /// Parse a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or the TOML is invalid.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn save_toml(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_str = self.to_toml()?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load by extension: `.json` as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            let contents = std::fs::read_to_string(path)?;
            Ok(Self::from_json(&contents)?)
        } else {
            Self::from_toml_file(path)
        }
    }
}

/// Errors that can occur when loading or saving configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading or writing file.
    Io(std::io::Error),
    /// TOML parsing error.
    TomlParse(toml::de::Error),
    /// TOML serialization error.
    TomlSerialize(toml::ser::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::TomlParse(e) => write!(f, "TOML parse error: {}", e),
            Self::TomlSerialize(e) => write!(f, "TOML serialize error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::TomlParse(e) => Some(e),
            Self::TomlSerialize(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::TomlParse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        Self::TomlSerialize(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
