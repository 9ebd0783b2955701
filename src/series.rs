//! Concentration time series.

use crate::errors::{validate_all_finite, DetectionPowerError, DetectionPowerResult};
use crate::math_utils::{first_argmax, first_argmin};
use serde::{Deserialize, Serialize};

/// Ordered `(time, concentration)` samples with strictly increasing, finite times.
///
/// Noisy realizations are independent copies sharing the true series' time axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationSeries {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl ConcentrationSeries {
    /// Build a series from explicit times and values.
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> DetectionPowerResult<Self> {
        if times.len() != values.len() {
            return Err(DetectionPowerError::configuration(
                "true_conc_ts",
                format!(
                    "{} times but {} concentration values",
                    times.len(),
                    values.len()
                ),
            ));
        }
        validate_all_finite(&times, "times")?;
        validate_all_finite(&values, "concentration")?;
        if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DetectionPowerError::configuration(
                "times",
                format!("not strictly increasing at index {}", i + 1),
            ));
        }
        Ok(Self { times, values })
    }

    /// Build a series indexed `0, 1, 2, ...`.
    pub fn from_values(values: Vec<f64>) -> DetectionPowerResult<Self> {
        let times = (0..values.len()).map(|i| i as f64).collect();
        Self::new(times, values)
    }

    /// Build a series sampled at `k / samp_per_year` years.
    pub(crate) fn sampled(values: Vec<f64>, samp_per_year: f64) -> DetectionPowerResult<Self> {
        let times = (0..values.len())
            .map(|k| k as f64 / samp_per_year)
            .collect();
        Self::new(times, values)
    }

    /// Same time axis with replacement values. Lengths must match.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.times.len());
        Self {
            times: self.times.clone(),
            values,
        }
    }

    /// Sample times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Concentration values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the series has no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the first maximum concentration.
    pub fn argmax(&self) -> Option<usize> {
        first_argmax(&self.values)
    }

    /// Index of the first minimum concentration.
    pub fn argmin(&self) -> Option<usize> {
        first_argmin(&self.values)
    }
}
