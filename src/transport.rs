//! Lumped-parameter transport models.
//!
//! A transport model turns a source concentration history (a historical linear
//! trend, then a linear reduction to a target over an implementation period)
//! into the concentration seen at a receptor well, sampled at a fixed rate.
//!
//! Three models are available:
//!
//! - **pass_true_conc**: the caller supplies the receptor series directly.
//! - **piston_flow**: the receptor sees the source delayed by the mean residence time.
//! - **binary_exponential_piston_flow**: two parallel pathways, each an exponential
//!   piston-flow age distribution, mixed by a pathway fraction.

use crate::errors::{
    validate_all_finite, validate_finite, validate_parameter, DetectionPowerError,
    DetectionPowerResult,
};
use crate::math_utils::linspace;
use crate::series::ConcentrationSeries;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Age horizon of the binary model, as a multiple of the longest pathway MRT.
pub const AGE_HORIZON_FACTOR: f64 = 10.0;

/// Default age-grid precision (bin width `10^-precision` years).
pub const DEFAULT_AGE_PRECISION: u32 = 2;

const BISECTION_MAX_ITER: usize = 200;

/// Which transport model produced a scenario's true series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Caller-supplied series.
    PassTrueConc,
    /// Pure lag by the mean residence time.
    PistonFlow,
    /// Two exponential piston-flow pathways.
    BinaryExponentialPistonFlow,
}

impl TransportKind {
    /// All supported models.
    pub const ALL: [TransportKind; 3] = [
        TransportKind::PassTrueConc,
        TransportKind::PistonFlow,
        TransportKind::BinaryExponentialPistonFlow,
    ];

    /// Name used in result tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::PassTrueConc => "pass_true_conc",
            TransportKind::PistonFlow => "piston_flow",
            TransportKind::BinaryExponentialPistonFlow => "binary_exponential_piston_flow",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = DetectionPowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                DetectionPowerError::configuration("mrt_model", format!("unknown model `{}`", s))
            })
    }
}

/// Source concentration history shared by the lagged models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceHistory {
    /// Receptor concentration at the start of sampling
    pub initial_conc: f64,
    /// Source concentration reached at the end of implementation
    pub target_conc: f64,
    /// Historical source trend (concentration per year)
    pub prev_slope: f64,
    /// Upper bound on any concentration
    pub max_conc: f64,
    /// Lower bound on any concentration
    pub min_conc: f64,
    /// Years over which the source falls from its present value to the target
    pub implementation_time: f64,
}

impl SourceHistory {
    /// Check bounds and finiteness.
    pub fn validate(&self) -> DetectionPowerResult<()> {
        validate_finite(self.initial_conc, "initial_conc")?;
        validate_finite(self.target_conc, "target_conc")?;
        validate_finite(self.prev_slope, "prev_slope")?;
        validate_finite(self.max_conc, "max_conc")?;
        validate_finite(self.min_conc, "min_conc")?;
        validate_finite(self.implementation_time, "implementation_time")?;
        if self.min_conc > self.max_conc {
            return Err(DetectionPowerError::configuration(
                "min_conc",
                format!("{} exceeds max_conc {}", self.min_conc, self.max_conc),
            ));
        }
        validate_parameter(self.initial_conc, self.min_conc, self.max_conc, "initial_conc")?;
        validate_parameter(self.target_conc, self.min_conc, self.max_conc, "target_conc")?;
        if self.implementation_time < 0.0 {
            return Err(DetectionPowerError::configuration(
                "implementation_time",
                "must not be negative",
            ));
        }
        Ok(())
    }

    #[inline]
    fn clip(&self, conc: f64) -> f64 {
        conc.max(self.min_conc).min(self.max_conc)
    }

    /// Source concentration at time `t` (years, 0 = start of sampling) given
    /// the present source concentration `c0`.
    #[inline]
    fn source_at(&self, c0: f64, t: f64) -> f64 {
        if t <= 0.0 {
            self.clip(c0 + self.prev_slope * t)
        } else if t < self.implementation_time {
            let start = self.clip(c0);
            start + (self.target_conc - start) * (t / self.implementation_time)
        } else {
            self.target_conc
        }
    }
}

/// Sampling plan of the receptor well.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    /// Samples per year
    pub samp_per_year: f64,
    /// Years of sampling
    pub samp_years: f64,
}

impl Sampling {
    /// Check that the plan yields at least one sample.
    pub fn validate(&self) -> DetectionPowerResult<()> {
        validate_finite(self.samp_per_year, "samp_per_year")?;
        validate_finite(self.samp_years, "samp_years")?;
        if self.samp_per_year <= 0.0 {
            return Err(DetectionPowerError::configuration("samp_per_year", "must be positive"));
        }
        if self.samp_years <= 0.0 {
            return Err(DetectionPowerError::configuration("samp_years", "must be positive"));
        }
        if self.n_samples() == 0 {
            return Err(DetectionPowerError::configuration(
                "samp_years",
                "sampling plan yields no samples",
            ));
        }
        Ok(())
    }

    /// Number of samples, `round(samp_years * samp_per_year)`.
    pub fn n_samples(&self) -> usize {
        (self.samp_years * self.samp_per_year).round() as usize
    }

    /// Samples spanning `years`, rounded.
    fn samples_in(&self, years: f64) -> usize {
        (years * self.samp_per_year).round().max(0.0) as usize
    }
}

/// Parameters of the binary exponential piston-flow model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryPathways {
    /// Overall mean residence time (years)
    pub mrt: f64,
    /// Mean residence time of pathway 1 (years)
    pub mrt_p1: f64,
    /// Fraction of water following pathway 1
    pub frac_p1: f64,
    /// Exponential fraction of pathway 1
    pub f_p1: f64,
    /// Exponential fraction of pathway 2
    pub f_p2: f64,
}

impl BinaryPathways {
    /// Check parameter ranges; see [`BinaryPathways::mrt_p2`] for the derived MRT.
    pub fn validate(&self) -> DetectionPowerResult<()> {
        validate_finite(self.mrt, "mrt")?;
        validate_finite(self.mrt_p1, "mrt_p1")?;
        if self.mrt <= 0.0 {
            return Err(DetectionPowerError::configuration("mrt", "must be positive"));
        }
        if self.mrt_p1 <= 0.0 {
            return Err(DetectionPowerError::configuration("mrt_p1", "must be positive"));
        }
        validate_parameter(self.frac_p1, 0.0, 1.0, "frac_p1")?;
        for (value, name) in [(self.f_p1, "f_p1"), (self.f_p2, "f_p2")] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(DetectionPowerError::configuration(
                    name,
                    format!("{} outside (0, 1]", value),
                ));
            }
        }
        if self.frac_p1 == 1.0 && (self.mrt_p1 - self.mrt).abs() > 1e-9 * self.mrt {
            return Err(DetectionPowerError::configuration(
                "mrt_p1",
                "must equal mrt when frac_p1 is 1",
            ));
        }
        Ok(())
    }

    /// Fraction of water following pathway 2.
    pub fn frac_p2(&self) -> f64 {
        1.0 - self.frac_p1
    }

    /// Mean residence time of pathway 2, `None` when pathway 2 carries no water.
    ///
    /// Fails with a transport model error when the overall and pathway 1 MRTs
    /// cannot be reconciled with a positive pathway 2 MRT.
    pub fn mrt_p2(&self) -> DetectionPowerResult<Option<f64>> {
        let frac_p2 = self.frac_p2();
        if frac_p2 <= 0.0 {
            return Ok(None);
        }
        let mrt_p2 = (self.mrt - self.mrt_p1 * self.frac_p1) / frac_p2;
        if !mrt_p2.is_finite() || mrt_p2 <= 0.0 {
            return Err(DetectionPowerError::TransportModel {
                reason: format!(
                    "derived pathway 2 MRT {} is not positive (mrt {}, mrt_p1 {}, frac_p1 {})",
                    mrt_p2, self.mrt, self.mrt_p1, self.frac_p1
                ),
            });
        }
        Ok(Some(mrt_p2))
    }
}

/// Transport model selection with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransportSpec {
    /// Use the supplied series unchanged.
    PassTrueConc {
        /// Receptor concentration series
        series: ConcentrationSeries,
    },
    /// Pure lag by `mrt` years.
    PistonFlow {
        /// Mean residence time (years)
        mrt: f64,
        /// Source history
        source: SourceHistory,
        /// Receptor sampling plan
        sampling: Sampling,
    },
    /// Binary exponential piston-flow mixing.
    BinaryExponentialPistonFlow {
        /// Pathway parameters
        pathways: BinaryPathways,
        /// Source history
        source: SourceHistory,
        /// Receptor sampling plan
        sampling: Sampling,
    },
}

impl TransportSpec {
    /// Model kind for reporting.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSpec::PassTrueConc { .. } => TransportKind::PassTrueConc,
            TransportSpec::PistonFlow { .. } => TransportKind::PistonFlow,
            TransportSpec::BinaryExponentialPistonFlow { .. } => {
                TransportKind::BinaryExponentialPistonFlow
            }
        }
    }
}

/// Noise-free receptor series plus its summary values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrueSeries {
    /// Receptor concentration series
    pub series: ConcentrationSeries,
    /// Maximum receptor concentration
    pub max_conc: f64,
    /// Time of the first maximum
    pub max_conc_time: f64,
    /// Pathway 2 fraction (binary model only)
    pub frac_p2: Option<f64>,
}

impl TrueSeries {
    fn summarize(series: ConcentrationSeries, frac_p2: Option<f64>) -> DetectionPowerResult<Self> {
        let peak = series.argmax().ok_or(DetectionPowerError::InsufficientData {
            required: 1,
            actual: 0,
        })?;
        let max_conc = series.values()[peak];
        let max_conc_time = series.times()[peak];
        Ok(Self {
            series,
            max_conc,
            max_conc_time,
            frac_p2,
        })
    }
}

/// Build the noise-free receptor series for any transport model.
pub fn build_true_series(spec: &TransportSpec) -> DetectionPowerResult<TrueSeries> {
    match spec {
        TransportSpec::PassTrueConc { series } => pass_true_conc(series),
        TransportSpec::PistonFlow {
            mrt,
            source,
            sampling,
        } => piston_flow(*mrt, source, sampling),
        TransportSpec::BinaryExponentialPistonFlow {
            pathways,
            source,
            sampling,
        } => BinaryEpfm::new(*pathways, *source, *sampling)?.run(),
    }
}

/// Identity model: validates and summarizes a caller-supplied series.
pub fn pass_true_conc(series: &ConcentrationSeries) -> DetectionPowerResult<TrueSeries> {
    if series.is_empty() {
        return Err(DetectionPowerError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }
    TrueSeries::summarize(series.clone(), None)
}

/// Piston-flow model: the receptor sees the source `mrt` years late.
///
/// The receptor first replays the historical ramp from `initial_conc` for
/// `mrt` years, then the reduction from the present source value to the
/// target, then the target. All values are clipped to the concentration bounds.
pub fn piston_flow(
    mrt: f64,
    source: &SourceHistory,
    sampling: &Sampling,
) -> DetectionPowerResult<TrueSeries> {
    validate_finite(mrt, "mrt")?;
    if mrt < 0.0 {
        return Err(DetectionPowerError::configuration("mrt", "must not be negative"));
    }
    source.validate()?;
    sampling.validate()?;

    let n = sampling.n_samples();
    let present_source = source.initial_conc + source.prev_slope * mrt;

    let mut values = linspace(source.initial_conc, present_source, sampling.samples_in(mrt));
    values.extend(linspace(
        source.clip(present_source),
        source.target_conc,
        sampling.samples_in(source.implementation_time),
    ));
    values.resize(n.max(values.len()), source.target_conc);
    values.truncate(n);
    for v in values.iter_mut() {
        *v = source.clip(*v);
    }

    let series = ConcentrationSeries::sampled(values, sampling.samp_per_year)?;
    TrueSeries::summarize(series, None)
}

/// Exponential piston-flow cumulative age distribution.
#[inline]
fn epm_cdf(age: f64, mrt: f64, f: f64) -> f64 {
    let delay = mrt * (1.0 - f);
    if age < delay {
        0.0
    } else {
        1.0 - (-(age - delay) / (f * mrt)).exp()
    }
}

/// Per-bin age fractions of one pathway, normalised to sum to 1.
fn pathway_fractions(edges: &[f64], mrt: f64, f: f64) -> DetectionPowerResult<Vec<f64>> {
    let cdf: Vec<f64> = edges.iter().map(|&a| epm_cdf(a, mrt, f)).collect();
    let fractions: Vec<f64> = cdf.windows(2).map(|w| w[1] - w[0]).collect();
    let total: f64 = fractions.iter().sum();
    if !(total > 0.0) {
        return Err(DetectionPowerError::TransportModel {
            reason: format!("age distribution with mrt {} and f {} is empty", mrt, f),
        });
    }
    Ok(fractions.into_iter().map(|x| x / total).collect())
}

/// Discretised, weighted age distributions of both pathways.
#[derive(Debug, Clone)]
struct AgeKernel {
    ages: Vec<f64>,
    weight_p1: Vec<f64>,
    weight_p2: Vec<f64>,
    horizon: f64,
    bin_width: f64,
}

impl AgeKernel {
    fn total_fractions(&self) -> Vec<f64> {
        self.weight_p1
            .iter()
            .zip(&self.weight_p2)
            .map(|(a, b)| a + b)
            .collect()
    }
}

/// Diagnostic output of the binary exponential piston-flow model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryEpfmDiagnostics {
    /// Mid-bin ages of the age distribution (years)
    pub ages: Vec<f64>,
    /// Combined age fractions, summing to 1
    pub age_fractions: Vec<f64>,
    /// Times of the source history grid (years, 0 = start of sampling)
    pub source_times: Vec<f64>,
    /// Source concentration on `source_times`
    pub source_conc: Vec<f64>,
    /// Pathway 1 contribution at each receptor sample
    pub pathway_1: Vec<f64>,
    /// Pathway 2 contribution at each receptor sample
    pub pathway_2: Vec<f64>,
    /// Present source concentration solved from the initial receptor value
    pub present_source_conc: f64,
    /// Time of peak receptor concentration
    pub peak_time: f64,
}

/// Binary exponential piston-flow model.
///
/// The historical source is `clip(c0 + prev_slope * t)` for `t <= 0`, where the
/// present source value `c0` is solved so that the receptor starts at
/// `initial_conc`. After `t = 0` the source falls linearly to the target over
/// the implementation time.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryEpfm {
    pathways: BinaryPathways,
    source: SourceHistory,
    sampling: Sampling,
    precision: u32,
}

impl BinaryEpfm {
    /// Validate the parameters and build a model with the default age precision.
    pub fn new(
        pathways: BinaryPathways,
        source: SourceHistory,
        sampling: Sampling,
    ) -> DetectionPowerResult<Self> {
        pathways.validate()?;
        pathways.mrt_p2()?;
        source.validate()?;
        sampling.validate()?;
        Ok(Self {
            pathways,
            source,
            sampling,
            precision: DEFAULT_AGE_PRECISION,
        })
    }

    /// Age bin width `10^-precision` years.
    pub fn with_precision(mut self, precision: u32) -> DetectionPowerResult<Self> {
        if precision > 6 {
            return Err(DetectionPowerError::configuration(
                "precision",
                format!("{} is finer than the supported 6 decimal places", precision),
            ));
        }
        self.precision = precision;
        Ok(self)
    }

    /// Receptor series only.
    pub fn run(&self) -> DetectionPowerResult<TrueSeries> {
        let kernel = self.kernel()?;
        let c0 = self.present_source(&kernel);
        let (values, _, _) = self.receptor(&kernel, c0, false);
        self.finish(values)
    }

    /// Receptor series plus the age distribution, source history and the
    /// per-pathway contributions. The series is identical to [`BinaryEpfm::run`].
    pub fn run_with_diagnostics(
        &self,
    ) -> DetectionPowerResult<(TrueSeries, BinaryEpfmDiagnostics)> {
        let kernel = self.kernel()?;
        let c0 = self.present_source(&kernel);
        let (values, pathway_1, pathway_2) = self.receptor(&kernel, c0, true);
        let true_series = self.finish(values)?;

        let end = self.sampling.n_samples() as f64 / self.sampling.samp_per_year;
        let steps = ((kernel.horizon + end) / kernel.bin_width).ceil() as usize;
        let source_times: Vec<f64> = (0..=steps)
            .map(|i| -kernel.horizon + i as f64 * kernel.bin_width)
            .collect();
        let source_conc = source_times
            .iter()
            .map(|&t| self.source.source_at(c0, t))
            .collect();

        let diagnostics = BinaryEpfmDiagnostics {
            age_fractions: kernel.total_fractions(),
            ages: kernel.ages,
            source_times,
            source_conc,
            pathway_1,
            pathway_2,
            present_source_conc: c0,
            peak_time: true_series.max_conc_time,
        };
        Ok((true_series, diagnostics))
    }

    fn kernel(&self) -> DetectionPowerResult<AgeKernel> {
        let mrt_p2 = self.pathways.mrt_p2()?;
        let longest = mrt_p2.map_or(self.pathways.mrt_p1, |m| m.max(self.pathways.mrt_p1));
        let bin_width = 10f64.powi(-(self.precision as i32));
        let horizon = AGE_HORIZON_FACTOR * longest;
        let bins = (horizon / bin_width).ceil() as usize;

        let edges: Vec<f64> = (0..=bins).map(|i| i as f64 * bin_width).collect();
        let ages = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();

        let frac_p1 = self.pathways.frac_p1;
        let weight_p1 = if frac_p1 > 0.0 {
            pathway_fractions(&edges, self.pathways.mrt_p1, self.pathways.f_p1)?
                .into_iter()
                .map(|x| x * frac_p1)
                .collect()
        } else {
            vec![0.0; bins]
        };
        let weight_p2 = match mrt_p2 {
            Some(mrt_p2) => {
                let frac_p2 = self.pathways.frac_p2();
                pathway_fractions(&edges, mrt_p2, self.pathways.f_p2)?
                    .into_iter()
                    .map(|x| x * frac_p2)
                    .collect()
            }
            None => vec![0.0; bins],
        };

        Ok(AgeKernel {
            ages,
            weight_p1,
            weight_p2,
            horizon,
            bin_width,
        })
    }

    /// Contributions of both pathways at time `t`.
    fn convolve(&self, kernel: &AgeKernel, c0: f64, t: f64) -> (f64, f64) {
        kernel
            .ages
            .iter()
            .zip(kernel.weight_p1.iter().zip(&kernel.weight_p2))
            .fold((0.0, 0.0), |(p1, p2), (&age, (&w1, &w2))| {
                let src = self.source.source_at(c0, t - age);
                (p1 + w1 * src, p2 + w2 * src)
            })
    }

    /// Solve for the present source value that reproduces `initial_conc` at `t = 0`.
    fn present_source(&self, kernel: &AgeKernel) -> f64 {
        let target = self.source.initial_conc;
        if self.source.prev_slope == 0.0 {
            return target;
        }

        let reach = self.source.prev_slope.abs() * kernel.horizon;
        let mut lo = self.source.min_conc - reach;
        let mut hi = self.source.max_conc + reach;
        for _ in 0..BISECTION_MAX_ITER {
            let mid = 0.5 * (lo + hi);
            let (p1, p2) = self.convolve(kernel, mid, 0.0);
            if p1 + p2 < target {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= 1e-12 * hi.abs().max(1.0) {
                break;
            }
        }
        0.5 * (lo + hi)
    }

    fn receptor(&self, kernel: &AgeKernel, c0: f64, keep_parts: bool) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n = self.sampling.n_samples();
        let mut values = Vec::with_capacity(n);
        let mut part_1 = Vec::with_capacity(if keep_parts { n } else { 0 });
        let mut part_2 = Vec::with_capacity(if keep_parts { n } else { 0 });
        for k in 0..n {
            let t = k as f64 / self.sampling.samp_per_year;
            let (p1, p2) = self.convolve(kernel, c0, t);
            values.push(p1 + p2);
            if keep_parts {
                part_1.push(p1);
                part_2.push(p2);
            }
        }
        (values, part_1, part_2)
    }

    fn finish(&self, values: Vec<f64>) -> DetectionPowerResult<TrueSeries> {
        validate_all_finite(&values, "binary model receptor").map_err(|e| {
            DetectionPowerError::TransportModel {
                reason: e.to_string(),
            }
        })?;
        let series = ConcentrationSeries::sampled(values, self.sampling.samp_per_year)?;
        TrueSeries::summarize(series, Some(self.pathways.frac_p2()))
    }
}
