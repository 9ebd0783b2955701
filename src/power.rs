//! Monte Carlo detection power estimation.
//!
//! For one scenario: build the noise-free receptor series, draw `nsims` noisy
//! realizations, apply the configured significance test to each and report
//! the percentage of realizations in which the expected trend or change is
//! detected.

use crate::config::DetectionPowerConfig;
use crate::errors::{DetectionPowerError, DetectionPowerResult};
use crate::execution::{check_cancelled, check_cancelled_every, CancelToken};
use crate::noise::NoiseInjector;
use crate::results::PowerRecord;
use crate::scenario::{Scenario, ScenarioParams};
use crate::series::ConcentrationSeries;
use crate::significance::{build_significance_test, SignificanceTest};
use crate::transport::build_true_series;
use serde::{Deserialize, Serialize};

/// Realizations between cancellation polls.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Summary values of the noise-free receptor series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportSummary {
    /// Maximum receptor concentration
    pub max_conc: f64,
    /// Time of the first maximum
    pub max_conc_time: f64,
    /// Pathway 2 fraction (binary model only)
    pub frac_p2: Option<f64>,
}

/// Detection power of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerResult {
    /// Scenario identifier
    pub idv: String,
    /// Percentage of realizations with a detection, NaN on error
    pub power: f64,
    /// Realizations requested
    pub nsims: usize,
    /// Summary of the noise-free series, when it could be built
    pub transport: Option<TransportSummary>,
    /// Noise-free series, when requested
    pub true_conc: Option<ConcentrationSeries>,
    /// Leading noisy realizations, when requested
    pub noisy_conc: Vec<ConcentrationSeries>,
    /// Why the scenario has no power value
    pub error: Option<String>,
}

impl PowerResult {
    /// Result row of a scenario that failed.
    pub fn failed(idv: impl Into<String>, nsims: usize, error: &DetectionPowerError) -> Self {
        Self {
            idv: idv.into(),
            power: f64::NAN,
            nsims,
            transport: None,
            true_conc: None,
            noisy_conc: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// True when the scenario carries an error message.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl PartialEq for PowerResult {
    fn eq(&self, other: &Self) -> bool {
        self.idv == other.idv
            && (self.power == other.power || (self.power.is_nan() && other.power.is_nan()))
            && self.nsims == other.nsims
            && self.transport == other.transport
            && self.true_conc == other.true_conc
            && self.noisy_conc == other.noisy_conc
            && self.error == other.error
    }
}

/// Runs the Monte Carlo power estimate for scenarios.
///
/// # Example
/// ```rust
/// use gw_detect_power::{DetectionPowerCalculator, DetectionPowerConfig, ScenarioParams};
///
/// let calc = DetectionPowerCalculator::new(DetectionPowerConfig {
///     nsims: 50,
///     ..Default::default()
/// })
/// .unwrap();
/// let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
/// let result = calc.power_calc(&ScenarioParams::pass_true_conc("well-1", 0.5, rising));
/// assert_eq!(result.power, 100.0);
/// ```
#[derive(Debug, Clone)]
pub struct DetectionPowerCalculator {
    config: DetectionPowerConfig,
    cancel: Option<CancelToken>,
}

impl DetectionPowerCalculator {
    /// Calculator with a validated configuration.
    pub fn new(config: DetectionPowerConfig) -> DetectionPowerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Attach a cancellation token polled between realizations.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &DetectionPowerConfig {
        &self.config
    }

    /// Power of a validated scenario.
    ///
    /// A true series shorter than `min_samples` is not an error: the result has
    /// NaN power and an error message, and no realizations are evaluated.
    pub fn estimate_power(&self, scenario: &Scenario) -> DetectionPowerResult<PowerResult> {
        check_cancelled(self.cancel.as_ref())?;
        let nsims = self.config.nsims;

        let truth = build_true_series(&scenario.transport)?;
        let injector = NoiseInjector::new(scenario.noise_std, scenario.seed)?;

        let mut result = PowerResult {
            idv: scenario.idv.clone(),
            power: f64::NAN,
            nsims,
            transport: Some(TransportSummary {
                max_conc: truth.max_conc,
                max_conc_time: truth.max_conc_time,
                frac_p2: truth.frac_p2,
            }),
            true_conc: self.config.return_true_conc.then(|| truth.series.clone()),
            noisy_conc: injector
                .draw_noisy(&truth.series, self.config.return_noisy_conc_iters.min(nsims)),
            error: None,
        };

        if truth.series.len() < self.config.min_samples {
            let err = DetectionPowerError::InsufficientData {
                required: self.config.min_samples,
                actual: truth.series.len(),
            };
            log::debug!("scenario {}: {}", scenario.idv, err);
            result.error = Some(err.to_string());
            return Ok(result);
        }

        let test = build_significance_test(&self.config, &truth.series, scenario.seed)?;

        let detections = if injector.is_noise_free() {
            // every realization equals the true series
            if detects(test.as_ref(), &truth.series)? {
                nsims
            } else {
                0
            }
        } else {
            self.count_detections(test.as_ref(), &injector, &truth.series)?
        };

        result.power = 100.0 * detections as f64 / nsims as f64;
        log::debug!(
            "scenario {}: power {:.1}% ({} of {} realizations, {})",
            scenario.idv,
            result.power,
            detections,
            nsims,
            test.name()
        );
        Ok(result)
    }

    /// Power of a flat parameter set; validation errors propagate.
    pub fn estimate_from_params(&self, params: &ScenarioParams) -> DetectionPowerResult<PowerResult> {
        self.estimate_power(&params.to_scenario()?)
    }

    /// Power of a flat parameter set. Never fails: errors are reported in the
    /// result's `error` field with NaN power.
    pub fn power_calc(&self, params: &ScenarioParams) -> PowerResult {
        match self.estimate_from_params(params) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("scenario {} failed: {}", params.idv, err);
                PowerResult::failed(params.idv.clone(), self.config.nsims, &err)
            }
        }
    }

    /// Flat result row of a parameter set.
    pub fn power_record(&self, params: &ScenarioParams) -> PowerRecord {
        PowerRecord::from_result(params, &self.power_calc(params), &self.config)
    }

    fn count_detections(
        &self,
        test: &dyn SignificanceTest,
        injector: &NoiseInjector,
        truth: &ConcentrationSeries,
    ) -> DetectionPowerResult<usize> {
        let nsims = self.config.nsims;
        let cancel = self.cancel.as_ref();
        let evaluate = |i: usize| -> DetectionPowerResult<bool> {
            check_cancelled_every(cancel, i, CANCEL_CHECK_INTERVAL)?;
            detects(test, &injector.realization(truth, i))
        };

        #[cfg(feature = "parallel")]
        {
            if self.config.parallel_realizations {
                use rayon::prelude::*;

                let hits = (0..nsims)
                    .into_par_iter()
                    .map(&evaluate)
                    .collect::<DetectionPowerResult<Vec<bool>>>()?;
                return Ok(hits.into_iter().filter(|&hit| hit).count());
            }
        }

        (0..nsims).try_fold(0usize, |acc, i| Ok(acc + usize::from(evaluate(i)?)))
    }
}

/// A realization too short for the test counts as not detected.
fn detects(test: &dyn SignificanceTest, series: &ConcentrationSeries) -> DetectionPowerResult<bool> {
    match test.evaluate(series) {
        Ok(outcome) => Ok(outcome.detected),
        Err(err) if err.is_insufficient_data() => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::TrendSign;
    use crate::significance::SignificanceMode;
    use crate::transport::{Sampling, SourceHistory};

    fn config(nsims: usize) -> DetectionPowerConfig {
        DetectionPowerConfig {
            nsims,
            ..Default::default()
        }
    }

    fn piston(error: f64) -> ScenarioParams {
        ScenarioParams::piston_flow(
            "pf",
            error,
            5.0,
            SourceHistory {
                initial_conc: 10.0,
                target_conc: 5.0,
                prev_slope: 1.0,
                max_conc: 25.0,
                min_conc: 1.0,
                implementation_time: 5.0,
            },
            Sampling {
                samp_per_year: 10.0,
                samp_years: 20.0,
            },
        )
        .with_seed(558)
    }

    #[test]
    fn test_power_is_percentage_and_deterministic() {
        let calc = DetectionPowerCalculator::new(config(200)).unwrap();
        let a = calc.power_calc(&piston(5.0));
        let b = calc.power_calc(&piston(5.0));
        assert!(a.error.is_none(), "{:?}", a.error);
        assert!((0.0..=100.0).contains(&a.power));
        assert_eq!(a, b);
        assert_eq!(a.transport.unwrap().max_conc, 15.0);
    }

    #[test]
    fn test_sequential_realizations_match_parallel() {
        let par = DetectionPowerCalculator::new(config(150)).unwrap();
        let seq = DetectionPowerCalculator::new(DetectionPowerConfig {
            parallel_realizations: false,
            ..config(150)
        })
        .unwrap();
        assert_eq!(par.power_calc(&piston(8.0)), seq.power_calc(&piston(8.0)));
    }

    #[test]
    fn test_short_series_reports_nan_power() {
        let calc = DetectionPowerCalculator::new(config(10)).unwrap();
        let result = calc.power_calc(&ScenarioParams::pass_true_conc("s", 1.0, vec![1.0, 2.0, 3.0]));
        assert!(result.power.is_nan());
        assert!(result.error.as_deref().unwrap_or("").contains("Insufficient data"));
        assert!(result.transport.is_some());
    }

    #[test]
    fn test_invalid_scenario_captured_in_result() {
        let calc = DetectionPowerCalculator::new(config(10)).unwrap();
        let mut params = piston(1.0);
        params.mrt = Some(-1.0);
        let result = calc.power_calc(&params);
        assert!(result.is_error());
        assert!(result.power.is_nan());
        assert!(calc.estimate_from_params(&params).is_err());
    }

    #[test]
    fn test_zero_noise_is_all_or_nothing() {
        let calc = DetectionPowerCalculator::new(config(25)).unwrap();
        let rising: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let r = calc.power_calc(&ScenarioParams::pass_true_conc("up", 0.0, rising));
        assert_eq!(r.power, 100.0);
        let flat = calc.power_calc(&ScenarioParams::pass_true_conc("flat", 0.0, vec![2.0; 15]));
        assert_eq!(flat.power, 0.0);
    }

    #[test]
    fn test_retained_series() {
        let calc = DetectionPowerCalculator::new(DetectionPowerConfig {
            return_true_conc: true,
            return_noisy_conc_iters: 3,
            ..config(20)
        })
        .unwrap();
        let r = calc.power_calc(&piston(1.0));
        assert_eq!(r.true_conc.as_ref().map(|s| s.len()), Some(200));
        assert_eq!(r.noisy_conc.len(), 3);
        assert_ne!(r.noisy_conc[0], r.noisy_conc[1]);
    }

    #[test]
    fn test_cancelled_calculator() {
        let token = CancelToken::new();
        let calc = DetectionPowerCalculator::new(config(20))
            .unwrap()
            .with_cancel(token.clone());
        token.cancel();
        assert!(matches!(
            calc.estimate_from_params(&piston(1.0)),
            Err(DetectionPowerError::Cancelled)
        ));
    }

    #[test]
    fn test_multipart_mode_runs() {
        let calc = DetectionPowerCalculator::new(DetectionPowerConfig {
            nsims: 20,
            ..DetectionPowerConfig::multipart(vec![TrendSign::Increasing, TrendSign::Decreasing])
        })
        .unwrap();
        let r = calc.power_calc(&piston(0.5));
        assert!(r.error.is_none(), "{:?}", r.error);
        assert_eq!(calc.config().significance_mode, SignificanceMode::NSectionMannKendall);
    }
}
