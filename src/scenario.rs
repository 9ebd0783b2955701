//! Scenario parameters.
//!
//! [`ScenarioParams`] is the flat parameter set of one row of a batch, where
//! parameters of models other than the selected one may be absent.
//! [`ScenarioParams::to_scenario`] validates it into a typed [`Scenario`].

use crate::errors::{validate_finite, DetectionPowerError, DetectionPowerResult};
use crate::series::ConcentrationSeries;
use crate::transport::{BinaryPathways, Sampling, SourceHistory, TransportKind, TransportSpec};
use serde::{Deserialize, Serialize};

/// Seed used when a scenario does not carry its own.
pub const DEFAULT_SEED: u64 = 5585;

/// Lower concentration bound used when a scenario does not set one.
pub const DEFAULT_MIN_CONC: f64 = 0.0;

/// Flat scenario parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParams {
    /// Scenario identifier
    pub idv: String,
    /// Noise standard deviation
    pub error: f64,
    /// Transport model
    pub mrt_model: TransportKind,
    /// Years of sampling
    pub samp_years: Option<f64>,
    /// Samples per year
    pub samp_per_year: Option<f64>,
    /// Years to reach the target source concentration
    pub implementation_time: Option<f64>,
    /// Receptor concentration at the start of sampling
    pub initial_conc: Option<f64>,
    /// Target source concentration
    pub target_conc: Option<f64>,
    /// Historical source slope
    pub prev_slope: Option<f64>,
    /// Upper concentration bound
    pub max_conc: Option<f64>,
    /// Lower concentration bound
    pub min_conc: Option<f64>,
    /// Mean residence time
    pub mrt: Option<f64>,
    /// Pathway 1 mean residence time
    pub mrt_p1: Option<f64>,
    /// Pathway 1 fraction
    pub frac_p1: Option<f64>,
    /// Pathway 1 exponential fraction
    pub f_p1: Option<f64>,
    /// Pathway 2 exponential fraction
    pub f_p2: Option<f64>,
    /// Supplied receptor series for `pass_true_conc`
    pub true_conc_ts: Option<Vec<f64>>,
    /// Sample times of `true_conc_ts`, strictly increasing. When absent the
    /// series is taken as evenly spaced at `0, 1, 2, ...`
    pub true_conc_times: Option<Vec<f64>>,
    /// Random seed
    pub seed: Option<u64>,
}

/// Validated scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Scenario identifier
    pub idv: String,
    /// Noise standard deviation
    pub noise_std: f64,
    /// Random seed
    pub seed: u64,
    /// Transport model and its parameters
    pub transport: TransportSpec,
}

impl ScenarioParams {
    fn empty(idv: impl Into<String>, error: f64, mrt_model: TransportKind) -> Self {
        Self {
            idv: idv.into(),
            error,
            mrt_model,
            samp_years: None,
            samp_per_year: None,
            implementation_time: None,
            initial_conc: None,
            target_conc: None,
            prev_slope: None,
            max_conc: None,
            min_conc: None,
            mrt: None,
            mrt_p1: None,
            frac_p1: None,
            f_p1: None,
            f_p2: None,
            true_conc_ts: None,
            true_conc_times: None,
            seed: None,
        }
    }

    /// Scenario over a caller-supplied receptor series.
    pub fn pass_true_conc(idv: impl Into<String>, error: f64, true_conc_ts: Vec<f64>) -> Self {
        Self {
            true_conc_ts: Some(true_conc_ts),
            ..Self::empty(idv, error, TransportKind::PassTrueConc)
        }
    }

    /// Piston-flow scenario.
    pub fn piston_flow(
        idv: impl Into<String>,
        error: f64,
        mrt: f64,
        source: SourceHistory,
        sampling: Sampling,
    ) -> Self {
        Self {
            mrt: Some(mrt),
            ..Self::empty(idv, error, TransportKind::PistonFlow).with_source(source, sampling)
        }
    }

    /// Binary exponential piston-flow scenario.
    pub fn binary_exponential_piston_flow(
        idv: impl Into<String>,
        error: f64,
        pathways: BinaryPathways,
        source: SourceHistory,
        sampling: Sampling,
    ) -> Self {
        Self {
            mrt: Some(pathways.mrt),
            mrt_p1: Some(pathways.mrt_p1),
            frac_p1: Some(pathways.frac_p1),
            f_p1: Some(pathways.f_p1),
            f_p2: Some(pathways.f_p2),
            ..Self::empty(idv, error, TransportKind::BinaryExponentialPistonFlow)
                .with_source(source, sampling)
        }
    }

    fn with_source(mut self, source: SourceHistory, sampling: Sampling) -> Self {
        self.samp_years = Some(sampling.samp_years);
        self.samp_per_year = Some(sampling.samp_per_year);
        self.implementation_time = Some(source.implementation_time);
        self.initial_conc = Some(source.initial_conc);
        self.target_conc = Some(source.target_conc);
        self.prev_slope = Some(source.prev_slope);
        self.max_conc = Some(source.max_conc);
        self.min_conc = Some(source.min_conc);
        self
    }

    /// Attach sample times to a supplied receptor series.
    pub fn with_times(mut self, times: Vec<f64>) -> Self {
        self.true_conc_times = Some(times);
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Seed that will be used.
    pub fn effective_seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    fn require(&self, value: Option<f64>, name: &str) -> DetectionPowerResult<f64> {
        value.ok_or_else(|| {
            DetectionPowerError::configuration(
                name,
                format!("required by the {} model", self.mrt_model),
            )
        })
    }

    fn source(&self) -> DetectionPowerResult<SourceHistory> {
        let source = SourceHistory {
            initial_conc: self.require(self.initial_conc, "initial_conc")?,
            target_conc: self.require(self.target_conc, "target_conc")?,
            prev_slope: self.require(self.prev_slope, "prev_slope")?,
            max_conc: self.require(self.max_conc, "max_conc")?,
            min_conc: self.min_conc.unwrap_or(DEFAULT_MIN_CONC),
            implementation_time: self.require(self.implementation_time, "implementation_time")?,
        };
        source.validate()?;
        Ok(source)
    }

    fn sampling(&self) -> DetectionPowerResult<Sampling> {
        let sampling = Sampling {
            samp_per_year: self.require(self.samp_per_year, "samp_per_year")?,
            samp_years: self.require(self.samp_years, "samp_years")?,
        };
        sampling.validate()?;
        Ok(sampling)
    }

    /// Validate into a typed scenario.
    pub fn to_scenario(&self) -> DetectionPowerResult<Scenario> {
        validate_finite(self.error, "error")?;
        if self.error < 0.0 {
            return Err(DetectionPowerError::configuration("error", "must not be negative"));
        }

        let transport = match self.mrt_model {
            TransportKind::PassTrueConc => {
                let values = self.true_conc_ts.clone().ok_or_else(|| {
                    DetectionPowerError::configuration(
                        "true_conc_ts",
                        "required by the pass_true_conc model",
                    )
                })?;
                let series = match self.true_conc_times.clone() {
                    Some(times) => ConcentrationSeries::new(times, values)?,
                    None => ConcentrationSeries::from_values(values)?,
                };
                TransportSpec::PassTrueConc { series }
            }
            TransportKind::PistonFlow => TransportSpec::PistonFlow {
                mrt: self.require(self.mrt, "mrt")?,
                source: self.source()?,
                sampling: self.sampling()?,
            },
            TransportKind::BinaryExponentialPistonFlow => {
                let pathways = BinaryPathways {
                    mrt: self.require(self.mrt, "mrt")?,
                    mrt_p1: self.require(self.mrt_p1, "mrt_p1")?,
                    frac_p1: self.require(self.frac_p1, "frac_p1")?,
                    f_p1: self.require(self.f_p1, "f_p1")?,
                    f_p2: self.require(self.f_p2, "f_p2")?,
                };
                pathways.validate()?;
                TransportSpec::BinaryExponentialPistonFlow {
                    pathways,
                    source: self.source()?,
                    sampling: self.sampling()?,
                }
            }
        };

        Ok(Scenario {
            idv: self.idv.clone(),
            noise_std: self.error,
            seed: self.effective_seed(),
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceHistory {
        SourceHistory {
            initial_conc: 10.0,
            target_conc: 5.0,
            prev_slope: 1.0,
            max_conc: 25.0,
            min_conc: 1.0,
            implementation_time: 5.0,
        }
    }

    fn sampling() -> Sampling {
        Sampling {
            samp_per_year: 10.0,
            samp_years: 20.0,
        }
    }

    #[test]
    fn test_piston_params_to_scenario() {
        let params = ScenarioParams::piston_flow("a", 0.5, 5.0, source(), sampling());
        let scenario = params.to_scenario().unwrap();
        assert_eq!(scenario.seed, DEFAULT_SEED);
        assert_eq!(scenario.transport.kind(), TransportKind::PistonFlow);
    }

    #[test]
    fn test_missing_parameter_is_configuration_error() {
        let mut params = ScenarioParams::piston_flow("a", 0.5, 5.0, source(), sampling());
        params.mrt = None;
        match params.to_scenario() {
            Err(DetectionPowerError::Configuration { parameter, .. }) => assert_eq!(parameter, "mrt"),
            other => panic!("expected missing mrt, got {:?}", other),
        }
        let mut params = ScenarioParams::pass_true_conc("b", 0.5, vec![1.0, 2.0]);
        params.true_conc_ts = None;
        assert!(params.to_scenario().is_err());
    }

    #[test]
    fn test_supplied_series_times() {
        let params = ScenarioParams::pass_true_conc("a", 0.5, vec![1.0, 2.0, 4.0]);
        let series = match params.to_scenario().unwrap().transport {
            TransportSpec::PassTrueConc { series } => series,
            other => panic!("unexpected transport {:?}", other),
        };
        assert_eq!(series.times(), &[0.0, 1.0, 2.0]);

        let timed = params.clone().with_times(vec![0.0, 0.5, 2.0]);
        match timed.to_scenario().unwrap().transport {
            TransportSpec::PassTrueConc { series } => assert_eq!(series.times(), &[0.0, 0.5, 2.0]),
            other => panic!("unexpected transport {:?}", other),
        }

        let unordered = params.clone().with_times(vec![0.0, 2.0, 1.0]);
        match unordered.to_scenario() {
            Err(DetectionPowerError::Configuration { parameter, .. }) => assert_eq!(parameter, "times"),
            other => panic!("expected unordered times, got {:?}", other),
        }
        let short = params.with_times(vec![0.0, 1.0]);
        assert!(matches!(
            short.to_scenario(),
            Err(DetectionPowerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_inconsistent_bounds_rejected() {
        let mut bad = source();
        bad.initial_conc = 30.0;
        let params = ScenarioParams::piston_flow("a", 0.5, 5.0, bad, sampling());
        assert!(matches!(
            params.to_scenario(),
            Err(DetectionPowerError::Configuration { .. })
        ));
        let negative = ScenarioParams::pass_true_conc("b", -0.1, vec![1.0, 2.0, 3.0]);
        assert!(negative.to_scenario().is_err());
    }

    #[test]
    fn test_min_conc_defaults_to_zero() {
        let mut params = ScenarioParams::piston_flow("a", 0.5, 5.0, source(), sampling());
        params.min_conc = None;
        match params.to_scenario().unwrap().transport {
            TransportSpec::PistonFlow { source, .. } => assert_eq!(source.min_conc, DEFAULT_MIN_CONC),
            other => panic!("unexpected transport {:?}", other),
        }
    }
}
