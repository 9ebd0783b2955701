//! Significance test strategies applied to each noisy realization.
//!
//! One strategy type per test family, selected once per scenario by
//! [`SignificanceMode`] and prepared from the noise-free series (expected
//! direction, extremum anchor, efficient-search plan, Pettitt null
//! distribution). Evaluating a realization is then a pure function of the
//! realization.

use crate::config::{DetectionPowerConfig, ExpectSlope};
use crate::errors::{validate_data_length, DetectionPowerError, DetectionPowerResult};
use crate::math_utils::ols_regression;
use crate::multipart::{MultiPartSearch, SearchPlan, TrendSign};
use crate::rng::{stream_seed, SeededRng};
use crate::series::ConcentrationSeries;
use crate::trend_stats::{mann_kendall, pettitt, pettitt_k, MIN_TREND_SAMPLES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Salt separating the Pettitt null-distribution streams from the noise streams.
const PETTITT_NULL_SALT: u64 = 0x7065_7474_6974_7400;

/// Supported significance tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignificanceMode {
    /// OLS slope over the whole series
    LinearRegression,
    /// OLS slope from the first maximum of the true series
    LinearRegressionFromMax,
    /// OLS slope from the first minimum of the true series
    LinearRegressionFromMin,
    /// Mann-Kendall over the whole series
    MannKendall,
    /// Mann-Kendall from the first maximum of the true series
    MannKendallFromMax,
    /// Mann-Kendall from the first minimum of the true series
    MannKendallFromMin,
    /// Multi-part Mann-Kendall breakpoint search
    NSectionMannKendall,
    /// Pettitt change-point test
    PettittTest,
}

impl SignificanceMode {
    /// All implemented modes.
    pub const ALL: [SignificanceMode; 8] = [
        SignificanceMode::LinearRegression,
        SignificanceMode::LinearRegressionFromMax,
        SignificanceMode::LinearRegressionFromMin,
        SignificanceMode::MannKendall,
        SignificanceMode::MannKendallFromMax,
        SignificanceMode::MannKendallFromMin,
        SignificanceMode::NSectionMannKendall,
        SignificanceMode::PettittTest,
    ];

    /// Mode name used in configuration and result tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignificanceMode::LinearRegression => "linear-regression",
            SignificanceMode::LinearRegressionFromMax => "linear-regression-from-max",
            SignificanceMode::LinearRegressionFromMin => "linear-regression-from-min",
            SignificanceMode::MannKendall => "mann-kendall",
            SignificanceMode::MannKendallFromMax => "mann-kendall-from-max",
            SignificanceMode::MannKendallFromMin => "mann-kendall-from-min",
            SignificanceMode::NSectionMannKendall => "n-section-mann-kendall",
            SignificanceMode::PettittTest => "pettitt-test",
        }
    }

    fn anchor(&self) -> Anchor {
        match self {
            SignificanceMode::LinearRegressionFromMax | SignificanceMode::MannKendallFromMax => {
                Anchor::FromMax
            }
            SignificanceMode::LinearRegressionFromMin | SignificanceMode::MannKendallFromMin => {
                Anchor::FromMin
            }
            _ => Anchor::Start,
        }
    }
}

impl fmt::Display for SignificanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignificanceMode {
    type Err = DetectionPowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignificanceMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                DetectionPowerError::configuration(
                    "significance_mode",
                    format!("unknown mode `{}`", s),
                )
            })
    }
}

/// Where a single-trend test starts on each realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Whole series
    Start,
    /// From the first maximum of the true series
    FromMax,
    /// From the first minimum of the true series
    FromMin,
}

impl Anchor {
    fn index(&self, truth: &ConcentrationSeries) -> usize {
        match self {
            Anchor::Start => 0,
            Anchor::FromMax => truth.argmax().unwrap_or(0),
            Anchor::FromMin => truth.argmin().unwrap_or(0),
        }
    }

    fn implied_direction(&self) -> Option<TrendSign> {
        match self {
            Anchor::Start => None,
            Anchor::FromMax => Some(TrendSign::Decreasing),
            Anchor::FromMin => Some(TrendSign::Increasing),
        }
    }
}

/// Result of one test on one realization.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    /// Whether the expected trend or change was detected
    pub detected: bool,
    /// Test p-value (NaN when the test has none, e.g. no partition found)
    pub p_value: f64,
    /// Test statistic (slope, Z, partition score or Pettitt K)
    pub statistic: f64,
    /// Estimated change index (Pettitt only)
    pub change_index: Option<usize>,
    /// Cuts of the best matching partition (multi-part only)
    pub cuts: Option<Vec<usize>>,
}

impl TestOutcome {
    /// Outcome of a test that locates no change.
    fn trend(detected: bool, p_value: f64, statistic: f64) -> Self {
        Self {
            detected,
            p_value,
            statistic,
            change_index: None,
            cuts: None,
        }
    }
}

/// A significance test evaluated on every noisy realization.
pub trait SignificanceTest: Send + Sync {
    /// Short test name for logs.
    fn name(&self) -> &'static str;

    /// Fewest points the test accepts.
    fn min_samples(&self) -> usize;

    /// Evaluate one realization.
    fn evaluate(&self, series: &ConcentrationSeries) -> DetectionPowerResult<TestOutcome>;
}

/// Resolve the expected direction of a single-trend test.
fn single_direction(
    expect: &ExpectSlope,
    anchor: Anchor,
    auto: impl FnOnce() -> DetectionPowerResult<TrendSign>,
) -> DetectionPowerResult<TrendSign> {
    match (expect, anchor.implied_direction()) {
        (ExpectSlope::Auto, Some(direction)) => Ok(direction),
        (ExpectSlope::Auto, None) => auto(),
        (ExpectSlope::Direction(direction), _) => Ok(*direction),
        (ExpectSlope::Pattern(pattern), _) => match pattern.as_slice() {
            [direction] => Ok(*direction),
            _ => Err(DetectionPowerError::configuration(
                "expect_slope",
                "a single-trend test takes one direction, not a pattern",
            )),
        },
    }
}

/// Direction of a noise-free statistic, `NoTrend` unless it is significant.
fn significant_sign(statistic: f64, p_value: f64, alpha: f64) -> TrendSign {
    if p_value < alpha {
        TrendSign::of(statistic)
    } else {
        TrendSign::NoTrend
    }
}

// ============================================================================
// LINEAR REGRESSION
// ============================================================================

/// OLS slope test: detected when the slope has the expected sign and `p < alpha`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressionTest {
    start: usize,
    expected: TrendSign,
    alpha: f64,
}

impl LinearRegressionTest {
    /// Build from the noise-free series.
    pub fn prepare(
        truth: &ConcentrationSeries,
        anchor: Anchor,
        expect: &ExpectSlope,
        alpha: f64,
    ) -> DetectionPowerResult<Self> {
        let start = anchor.index(truth);
        let expected = single_direction(expect, anchor, || {
            let fit = ols_regression(&truth.times()[start..], &truth.values()[start..])?;
            Ok(significant_sign(fit.slope, fit.p_value, alpha))
        })?;
        Ok(Self {
            start,
            expected,
            alpha,
        })
    }

    /// Expected slope direction.
    pub fn expected(&self) -> TrendSign {
        self.expected
    }
}

impl SignificanceTest for LinearRegressionTest {
    fn name(&self) -> &'static str {
        "linear-regression"
    }

    fn min_samples(&self) -> usize {
        MIN_TREND_SAMPLES
    }

    fn evaluate(&self, series: &ConcentrationSeries) -> DetectionPowerResult<TestOutcome> {
        let times = series.times().get(self.start..).unwrap_or(&[]);
        let values = series.values().get(self.start..).unwrap_or(&[]);
        validate_data_length(values, self.min_samples())?;
        let fit = ols_regression(times, values)?;
        let detected = self.expected != TrendSign::NoTrend
            && TrendSign::of(fit.slope) == self.expected
            && fit.p_value < self.alpha;
        Ok(TestOutcome::trend(detected, fit.p_value, fit.slope))
    }
}

// ============================================================================
// MANN-KENDALL
// ============================================================================

/// Mann-Kendall test: detected when `Z` has the expected sign and `p < alpha`.
#[derive(Debug, Clone, PartialEq)]
pub struct MannKendallTest {
    start: usize,
    expected: TrendSign,
    alpha: f64,
}

impl MannKendallTest {
    /// Build from the noise-free series.
    pub fn prepare(
        truth: &ConcentrationSeries,
        anchor: Anchor,
        expect: &ExpectSlope,
        alpha: f64,
    ) -> DetectionPowerResult<Self> {
        let start = anchor.index(truth);
        let expected = single_direction(expect, anchor, || {
            let mk = mann_kendall(&truth.values()[start..])?;
            Ok(significant_sign(mk.z, mk.p_value, alpha))
        })?;
        Ok(Self {
            start,
            expected,
            alpha,
        })
    }

    /// Expected trend direction.
    pub fn expected(&self) -> TrendSign {
        self.expected
    }
}

impl SignificanceTest for MannKendallTest {
    fn name(&self) -> &'static str {
        "mann-kendall"
    }

    fn min_samples(&self) -> usize {
        MIN_TREND_SAMPLES
    }

    fn evaluate(&self, series: &ConcentrationSeries) -> DetectionPowerResult<TestOutcome> {
        let values = series.values().get(self.start..).unwrap_or(&[]);
        let mk = mann_kendall(values)?;
        let detected = self.expected != TrendSign::NoTrend
            && TrendSign::of(mk.z) == self.expected
            && mk.p_value < self.alpha;
        Ok(TestOutcome::trend(detected, mk.p_value, mk.z))
    }
}

// ============================================================================
// MULTI-PART MANN-KENDALL
// ============================================================================

/// Multi-part test: detected when some partition matches the expected pattern.
#[derive(Debug, Clone)]
pub struct MultiPartMannKendallTest {
    search: MultiPartSearch,
    plan: SearchPlan,
}

impl MultiPartMannKendallTest {
    /// Build the search and, in efficient mode, plan it from the noise-free series.
    pub fn prepare(
        truth: &ConcentrationSeries,
        config: &DetectionPowerConfig,
    ) -> DetectionPowerResult<Self> {
        let pattern = match &config.expect_slope {
            ExpectSlope::Pattern(pattern) => pattern.clone(),
            ExpectSlope::Direction(direction) if config.nparts == 1 => vec![*direction],
            _ => {
                return Err(DetectionPowerError::configuration(
                    "expect_slope",
                    "n-section-mann-kendall needs an explicit pattern",
                ))
            }
        };
        let mut search =
            MultiPartSearch::new(config.nparts, pattern, config.min_part_size, config.min_p_value)?
                .with_no_trend_alpha(config.no_trend_alpha)?;
        if let Some(z) = config.no_trend_z {
            search = search.with_no_trend_z(z)?;
        }
        let plan = if config.efficient_mode {
            config.efficient_search().plan(&search, truth.values())?
        } else {
            SearchPlan::Exhaustive
        };
        Ok(Self { search, plan })
    }

    /// The prepared search plan.
    pub fn plan(&self) -> &SearchPlan {
        &self.plan
    }
}

impl SignificanceTest for MultiPartMannKendallTest {
    fn name(&self) -> &'static str {
        "n-section-mann-kendall"
    }

    fn min_samples(&self) -> usize {
        self.search.min_length()
    }

    fn evaluate(&self, series: &ConcentrationSeries) -> DetectionPowerResult<TestOutcome> {
        Ok(match self.plan.search(&self.search, series.values())? {
            Some(best) => TestOutcome {
                detected: true,
                p_value: best
                    .segments
                    .iter()
                    .filter(|seg| seg.expected != TrendSign::NoTrend)
                    .map(|seg| seg.p_value)
                    .fold(f64::NAN, f64::max),
                statistic: best.score,
                change_index: None,
                cuts: Some(best.cuts),
            },
            None => TestOutcome::trend(false, f64::NAN, f64::NAN),
        })
    }
}

// ============================================================================
// PETTITT
// ============================================================================

/// Pettitt change-point test with a simulated null distribution.
///
/// The statistic only depends on ranks, so one null distribution of K for
/// i.i.d. normal series of the scenario's length serves every realization.
#[derive(Debug, Clone)]
pub struct PettittTest {
    n: usize,
    null_k: Vec<i64>,
    alpha: f64,
}

impl PettittTest {
    /// Simulate the null distribution for series of length `n`.
    pub fn prepare(n: usize, nsims: usize, alpha: f64, seed: u64) -> DetectionPowerResult<Self> {
        if nsims == 0 {
            return Err(DetectionPowerError::configuration("nsims_pettitt", "must be positive"));
        }
        let null_seed = seed ^ PETTITT_NULL_SALT;
        let mut buf = vec![0.0; n];
        let mut null_k: Vec<i64> = (0..nsims)
            .map(|i| {
                SeededRng::with_seed(stream_seed(null_seed, i as u64)).fill_normal(&mut buf, 1.0);
                pettitt_k(&buf)
            })
            .collect();
        null_k.sort_unstable();
        Ok(Self { n, null_k, alpha })
    }

    /// Share of null draws at least as extreme as `k`.
    pub fn p_value(&self, k: i64) -> f64 {
        let below = self.null_k.partition_point(|&x| x < k);
        (self.null_k.len() - below) as f64 / self.null_k.len() as f64
    }
}

impl SignificanceTest for PettittTest {
    fn name(&self) -> &'static str {
        "pettitt-test"
    }

    fn min_samples(&self) -> usize {
        MIN_TREND_SAMPLES
    }

    fn evaluate(&self, series: &ConcentrationSeries) -> DetectionPowerResult<TestOutcome> {
        if series.len() != self.n {
            return Err(DetectionPowerError::configuration(
                "series",
                format!(
                    "Pettitt null distribution built for {} points, got {}",
                    self.n,
                    series.len()
                ),
            ));
        }
        let result = pettitt(series.values())?;
        let p_value = self.p_value(result.k);
        Ok(TestOutcome {
            detected: p_value < self.alpha,
            p_value,
            statistic: result.k as f64,
            change_index: Some(result.change_index),
            cuts: None,
        })
    }
}

/// Build the configured test for one scenario from its noise-free series.
pub fn build_significance_test(
    config: &DetectionPowerConfig,
    truth: &ConcentrationSeries,
    seed: u64,
) -> DetectionPowerResult<Box<dyn SignificanceTest>> {
    let mode = config.significance_mode;
    let alpha = config.min_p_value;
    let test: Box<dyn SignificanceTest> = match mode {
        SignificanceMode::LinearRegression
        | SignificanceMode::LinearRegressionFromMax
        | SignificanceMode::LinearRegressionFromMin => Box::new(LinearRegressionTest::prepare(
            truth,
            mode.anchor(),
            &config.expect_slope,
            alpha,
        )?),
        SignificanceMode::MannKendall
        | SignificanceMode::MannKendallFromMax
        | SignificanceMode::MannKendallFromMin => Box::new(MannKendallTest::prepare(
            truth,
            mode.anchor(),
            &config.expect_slope,
            alpha,
        )?),
        SignificanceMode::NSectionMannKendall => {
            Box::new(MultiPartMannKendallTest::prepare(truth, config)?)
        }
        SignificanceMode::PettittTest => Box::new(PettittTest::prepare(
            truth.len(),
            config.nsims_pettitt,
            alpha,
            seed,
        )?),
    };
    log::debug!("prepared {} test for {} points", test.name(), truth.len());
    Ok(test)
}
