//! Size-category classification.
//!
//! A [`SizeChart`] is an ordered list of upper bounds. The category is the
//! first band whose bound exceeds the value, so the mapping is a monotonic
//! step function. The default bands are illustrative domain constants, not
//! clinical ground truth; load a chart from configuration to replace them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnatomyError, AnatomyResult};

/// Ordinal size label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeCategory {
    A,
    B,
    C,
    D,
    DD,
    E,
    F,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 7] = [
        SizeCategory::A,
        SizeCategory::B,
        SizeCategory::C,
        SizeCategory::D,
        SizeCategory::DD,
        SizeCategory::E,
        SizeCategory::F,
    ];
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SizeCategory::A => "A",
            SizeCategory::B => "B",
            SizeCategory::C => "C",
            SizeCategory::D => "D",
            SizeCategory::DD => "DD",
            SizeCategory::E => "E",
            SizeCategory::F => "F",
        };
        f.write_str(label)
    }
}

/// Which derived value a chart classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBasis {
    /// Mean projection, in centimeters.
    Projection,
    /// Mean per-side volume, in cubic centimeters.
    Volume,
}

/// One step of the chart: values below `upper` map to `category`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeBand {
    pub upper: f64,
    pub category: SizeCategory,
}

/// Ordered bands plus the category for values beyond the last band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeChart {
    pub basis: SizeBasis,
    pub largest: SizeCategory,
    pub bands: Vec<SizeBand>,
}

impl Default for SizeChart {
    fn default() -> Self {
        Self::projection()
    }
}

impl SizeChart {
    /// Projection chart (cm).
    pub fn projection() -> Self {
        Self::from_bounds(SizeBasis::Projection, &[2.5, 3.5, 4.5, 5.5, 6.5, 7.5])
    }

    /// Volume chart (cm³ per side).
    pub fn volume() -> Self {
        Self::from_bounds(SizeBasis::Volume, &[200.0, 300.0, 400.0, 500.0, 600.0, 700.0])
    }

    /// Bands for `A..E` from six ascending bounds; larger values are `F`.
    fn from_bounds(basis: SizeBasis, bounds: &[f64; 6]) -> Self {
        Self {
            basis,
            largest: SizeCategory::F,
            bands: bounds
                .iter()
                .zip(SizeCategory::ALL)
                .map(|(&upper, category)| SizeBand { upper, category })
                .collect(),
        }
    }

    /// Bounds must ascend strictly and categories must not go backwards.
    pub fn validate(&self) -> AnatomyResult<()> {
        for pair in self.bands.windows(2) {
            if !(pair[1].upper > pair[0].upper) || pair[1].category < pair[0].category {
                return Err(AnatomyError::invalid_parameter(
                    "size_chart.bands",
                    pair[1].upper,
                    "bounds must ascend with non-decreasing categories",
                ));
            }
        }
        if let Some(last) = self.bands.last()
            && self.largest < last.category
        {
            return Err(AnatomyError::invalid_parameter(
                "size_chart.largest",
                last.upper,
                "largest category must not precede the last band",
            ));
        }
        Ok(())
    }

    /// Category for `value`; `None` for non-positive or non-finite input.
    pub fn classify(&self, value: f64) -> Option<SizeCategory> {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        Some(
            self.bands
                .iter()
                .find(|band| value < band.upper)
                .map_or(self.largest, |band| band.category),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_steps() {
        let chart = SizeChart::projection();
        assert_eq!(chart.classify(1.0), Some(SizeCategory::A));
        assert_eq!(chart.classify(2.5), Some(SizeCategory::B));
        assert_eq!(chart.classify(5.0), Some(SizeCategory::D));
        assert_eq!(chart.classify(6.0), Some(SizeCategory::DD));
        assert_eq!(chart.classify(100.0), Some(SizeCategory::F));
    }

    #[test]
    fn test_classify_is_monotonic() {
        let chart = SizeChart::volume();
        let mut previous = SizeCategory::A;
        for i in 1..1000 {
            let category = chart.classify(i as f64).unwrap();
            assert!(category >= previous, "{} dropped below {}", category, previous);
            previous = category;
        }
    }

    #[test]
    fn test_undefined_values() {
        let chart = SizeChart::default();
        assert_eq!(chart.classify(0.0), None);
        assert_eq!(chart.classify(-1.0), None);
        assert_eq!(chart.classify(f64::NAN), None);
    }

    #[test]
    fn test_validate() {
        assert!(SizeChart::projection().validate().is_ok());
        let mut chart = SizeChart::projection();
        chart.bands.swap(0, 1);
        assert!(chart.validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SizeCategory::DD.to_string(), "DD");
    }

    #[test]
    fn test_toml_roundtrip() {
        let chart = SizeChart::volume();
        let text = toml::to_string(&chart).unwrap();
        let back: SizeChart = toml::from_str(&text).unwrap();
        assert_eq!(back, chart);
    }
}
