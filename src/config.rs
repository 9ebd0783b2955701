//! # Detection Power Configuration
//!
//! Settings of a [`crate::DetectionPowerCalculator`]: which significance test
//! to run, how many Monte Carlo realizations to draw, and the test-specific
//! controls (expected direction or pattern, multi-part segment sizes,
//! efficient-mode window, Pettitt null simulations).

use crate::errors::{validate_finite, DetectionPowerError, DetectionPowerResult};
use crate::multipart::{CheckStep, EfficientSearch, TrendSign, DEFAULT_NO_TREND_ALPHA};
use crate::significance::SignificanceMode;
use serde::{Deserialize, Serialize};

/// Expected trend of the significance test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectSlope {
    /// Infer the direction from the noise-free series (single-trend tests only)
    Auto,
    /// One expected direction
    Direction(TrendSign),
    /// One expected behaviour per segment (multi-part test)
    Pattern(Vec<TrendSign>),
}

/// Configuration of the detection power calculation.
#[derive(Debug, Clone)]
pub struct DetectionPowerConfig {
    /// Test applied to each realization
    pub significance_mode: SignificanceMode,
    /// Number of noisy realizations per scenario
    pub nsims: usize,
    /// Significance level `alpha`
    pub min_p_value: f64,
    /// Scenarios whose true series is shorter than this report NaN power
    pub min_samples: usize,
    /// Expected direction or multi-part pattern
    pub expect_slope: ExpectSlope,
    /// Restrict multi-part searches around the noise-free breakpoints
    pub efficient_mode: bool,
    /// Number of segments of the multi-part test
    pub nparts: usize,
    /// Minimum segment length of the multi-part test
    pub min_part_size: usize,
    /// Two-sided level defining a trend-free segment
    pub no_trend_alpha: f64,
    /// Explicit `|Z|` cutoff for a trend-free segment, overrides `no_trend_alpha`
    pub no_trend_z: Option<f64>,
    /// Candidate spacing of efficient multi-part searches
    pub check_step: CheckStep,
    /// Series at or below this length are searched exhaustively
    pub efficient_min: usize,
    /// Efficient-mode window half-width as a fraction of the series length
    pub efficient_window: f64,
    /// Null-distribution draws of the Pettitt test
    pub nsims_pettitt: usize,
    /// Keep the noise-free series in each result
    pub return_true_conc: bool,
    /// Keep the first this-many noisy realizations in each result
    pub return_noisy_conc_iters: usize,
    /// Evaluate realizations in parallel (needs the `parallel` feature)
    pub parallel_realizations: bool,
    /// Log batch progress every this-many scenarios
    pub progress_every: Option<usize>,
}

impl Default for DetectionPowerConfig {
    fn default() -> Self {
        Self {
            significance_mode: SignificanceMode::LinearRegression,
            nsims: 1000,
            min_p_value: 0.05,
            min_samples: 10,
            expect_slope: ExpectSlope::Auto,
            efficient_mode: true,
            nparts: 2,
            min_part_size: 10,
            no_trend_alpha: DEFAULT_NO_TREND_ALPHA,
            no_trend_z: None,
            check_step: CheckStep::default(),
            efficient_min: 10,
            efficient_window: 0.05,
            nsims_pettitt: 2000,
            return_true_conc: false,
            return_noisy_conc_iters: 0,
            parallel_realizations: true,
            progress_every: None,
        }
    }
}

impl DetectionPowerConfig {
    /// Defaults with another significance mode.
    pub fn for_mode(significance_mode: SignificanceMode) -> Self {
        Self {
            significance_mode,
            ..Self::default()
        }
    }

    /// Multi-part Mann-Kendall with one expected behaviour per segment.
    pub fn multipart(pattern: Vec<TrendSign>) -> Self {
        Self {
            significance_mode: SignificanceMode::NSectionMannKendall,
            nparts: pattern.len(),
            expect_slope: ExpectSlope::Pattern(pattern),
            ..Self::default()
        }
    }

    /// Pettitt change-point test.
    pub fn pettitt() -> Self {
        Self::for_mode(SignificanceMode::PettittTest)
    }

    /// Efficient-mode search controls.
    pub fn efficient_search(&self) -> EfficientSearch {
        EfficientSearch {
            check_step: self.check_step.clone(),
            efficient_min: self.efficient_min,
            window: self.efficient_window,
        }
    }

    /// Check every field.
    pub fn validate(&self) -> DetectionPowerResult<()> {
        if self.nsims == 0 {
            return Err(DetectionPowerError::configuration("nsims", "must be positive"));
        }
        validate_finite(self.min_p_value, "min_p_value")?;
        if !(self.min_p_value > 0.0 && self.min_p_value < 1.0) {
            return Err(DetectionPowerError::configuration(
                "min_p_value",
                format!("{} outside (0, 1)", self.min_p_value),
            ));
        }
        if self.min_samples == 0 {
            return Err(DetectionPowerError::configuration("min_samples", "must be positive"));
        }
        if self.nsims_pettitt == 0 {
            return Err(DetectionPowerError::configuration("nsims_pettitt", "must be positive"));
        }
        if self.progress_every == Some(0) {
            return Err(DetectionPowerError::configuration("progress_every", "must be positive"));
        }
        if !(self.no_trend_alpha > 0.0 && self.no_trend_alpha < 1.0) {
            return Err(DetectionPowerError::configuration(
                "no_trend_alpha",
                format!("{} outside (0, 1)", self.no_trend_alpha),
            ));
        }
        if let Some(z) = self.no_trend_z {
            validate_finite(z, "no_trend_z")?;
            if z <= 0.0 {
                return Err(DetectionPowerError::configuration("no_trend_z", "must be positive"));
            }
        }
        self.efficient_search().validate()?;

        if self.significance_mode == SignificanceMode::NSectionMannKendall {
            if self.nparts == 0 {
                return Err(DetectionPowerError::configuration("nparts", "must be at least 1"));
            }
            let pattern_len = match &self.expect_slope {
                ExpectSlope::Pattern(pattern) => pattern.len(),
                ExpectSlope::Direction(_) => 1,
                ExpectSlope::Auto => {
                    return Err(DetectionPowerError::configuration(
                        "expect_slope",
                        "n-section-mann-kendall needs an explicit pattern",
                    ))
                }
            };
            if pattern_len != self.nparts {
                return Err(DetectionPowerError::configuration(
                    "expect_slope",
                    format!(
                        "pattern has {} entries but nparts is {}",
                        pattern_len, self.nparts
                    ),
                ));
            }
            if self.min_part_size < crate::trend_stats::MIN_TREND_SAMPLES {
                return Err(DetectionPowerError::configuration(
                    "min_part_size",
                    format!("must be at least {}", crate::trend_stats::MIN_TREND_SAMPLES),
                ));
            }
        } else if let ExpectSlope::Pattern(pattern) = &self.expect_slope {
            if pattern.len() != 1 {
                return Err(DetectionPowerError::configuration(
                    "expect_slope",
                    format!("{} takes one direction, not a pattern", self.significance_mode),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DetectionPowerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nsims, 1000);
        assert_eq!(config.nsims_pettitt, 2000);
        assert!(config.efficient_mode);
    }

    #[test]
    fn test_multipart_preset() {
        let config = DetectionPowerConfig::multipart(
            TrendSign::pattern(&[1, 0, -1]).unwrap(),
        );
        assert_eq!(config.nparts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let cases = vec![
            DetectionPowerConfig {
                nsims: 0,
                ..Default::default()
            },
            DetectionPowerConfig {
                min_p_value: 1.5,
                ..Default::default()
            },
            DetectionPowerConfig {
                efficient_window: -0.1,
                ..Default::default()
            },
            DetectionPowerConfig {
                nparts: 3,
                ..DetectionPowerConfig::multipart(TrendSign::pattern(&[1, -1]).unwrap())
            },
            DetectionPowerConfig::for_mode(SignificanceMode::NSectionMannKendall),
            DetectionPowerConfig {
                expect_slope: ExpectSlope::Pattern(TrendSign::pattern(&[1, -1]).unwrap()),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(DetectionPowerError::Configuration { .. })),
                "should reject {:?}",
                config
            );
        }
    }
}
