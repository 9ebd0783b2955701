//! # Batch Orchestration
//!
//! Runs many scenarios through one [`DetectionPowerCalculator`] and assembles
//! a [`PowerTable`] in input order. A failing scenario becomes a row with NaN
//! power and its error message; only cancellation and malformed batches abort
//! the run. Sequential and parallel strategies produce identical tables, as
//! every scenario draws from its own seed.

use crate::errors::{DetectionPowerError, DetectionPowerResult};
use crate::execution::{check_cancelled, CancelToken};
use crate::power::{DetectionPowerCalculator, PowerResult};
use crate::results::{PowerRecord, PowerTable};
use crate::scenario::ScenarioParams;
use crate::transport::TransportKind;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How scenarios of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One scenario after the other on the calling thread
    Sequential,
    /// Scenarios fanned out on a rayon pool; `None` uses rayon's default size
    Parallel {
        /// Worker threads
        threads: Option<usize>,
    },
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::Parallel { threads: None }
    }
}

/// Scenario fields as parallel columns, one element per scenario.
///
/// Optional columns may be omitted entirely (`None`); a present column must
/// have one entry per `idv`.
#[derive(Debug, Clone, Default)]
pub struct ScenarioColumns {
    /// Scenario identifiers
    pub idv: Vec<String>,
    /// Noise standard deviations
    pub error: Vec<f64>,
    /// Transport models
    pub mrt_model: Vec<TransportKind>,
    /// Years of sampling
    pub samp_years: Option<Vec<Option<f64>>>,
    /// Samples per year
    pub samp_per_year: Option<Vec<Option<f64>>>,
    /// Years to reach the target source concentration
    pub implementation_time: Option<Vec<Option<f64>>>,
    /// Receptor concentration at the start of sampling
    pub initial_conc: Option<Vec<Option<f64>>>,
    /// Target source concentration
    pub target_conc: Option<Vec<Option<f64>>>,
    /// Historical source slope
    pub prev_slope: Option<Vec<Option<f64>>>,
    /// Upper concentration bound
    pub max_conc: Option<Vec<Option<f64>>>,
    /// Lower concentration bound
    pub min_conc: Option<Vec<Option<f64>>>,
    /// Mean residence time
    pub mrt: Option<Vec<Option<f64>>>,
    /// Pathway 1 mean residence time
    pub mrt_p1: Option<Vec<Option<f64>>>,
    /// Pathway 1 fraction
    pub frac_p1: Option<Vec<Option<f64>>>,
    /// Pathway 1 exponential fraction
    pub f_p1: Option<Vec<Option<f64>>>,
    /// Pathway 2 exponential fraction
    pub f_p2: Option<Vec<Option<f64>>>,
    /// Supplied receptor series
    pub true_conc_ts: Option<Vec<Option<Vec<f64>>>>,
    /// Sample times of the supplied series, `0, 1, 2, ...` where absent
    pub true_conc_times: Option<Vec<Option<Vec<f64>>>>,
    /// Random seeds
    pub seed: Option<Vec<Option<u64>>>,
}

fn check_column<T>(column: Option<&Vec<T>>, field: &str, expected: usize) -> DetectionPowerResult<()> {
    match column {
        Some(values) if values.len() != expected => Err(DetectionPowerError::BatchShape {
            field: field.to_string(),
            expected,
            actual: values.len(),
        }),
        _ => Ok(()),
    }
}

fn cell<T: Clone>(column: &Option<Vec<Option<T>>>, row: usize) -> Option<T> {
    column.as_ref().and_then(|values| values[row].clone())
}

impl ScenarioColumns {
    /// Number of scenarios (length of the `idv` column).
    pub fn len(&self) -> usize {
        self.idv.len()
    }

    /// True when there are no scenarios.
    pub fn is_empty(&self) -> bool {
        self.idv.is_empty()
    }

    fn check_shape(&self) -> DetectionPowerResult<()> {
        let n = self.idv.len();
        check_column(Some(&self.error), "error", n)?;
        check_column(Some(&self.mrt_model), "mrt_model", n)?;
        let optional = [
            (&self.samp_years, "samp_years"),
            (&self.samp_per_year, "samp_per_year"),
            (&self.implementation_time, "implementation_time"),
            (&self.initial_conc, "initial_conc"),
            (&self.target_conc, "target_conc"),
            (&self.prev_slope, "prev_slope"),
            (&self.max_conc, "max_conc"),
            (&self.min_conc, "min_conc"),
            (&self.mrt, "mrt"),
            (&self.mrt_p1, "mrt_p1"),
            (&self.frac_p1, "frac_p1"),
            (&self.f_p1, "f_p1"),
            (&self.f_p2, "f_p2"),
        ];
        for (column, field) in optional {
            check_column(column.as_ref(), field, n)?;
        }
        check_column(self.true_conc_ts.as_ref(), "true_conc_ts", n)?;
        check_column(self.true_conc_times.as_ref(), "true_conc_times", n)?;
        check_column(self.seed.as_ref(), "seed", n)
    }

    /// One parameter set per row.
    pub fn into_params(self) -> DetectionPowerResult<Vec<ScenarioParams>> {
        self.check_shape()?;
        let rows = (0..self.len())
            .map(|i| ScenarioParams {
                idv: self.idv[i].clone(),
                error: self.error[i],
                mrt_model: self.mrt_model[i],
                samp_years: cell(&self.samp_years, i),
                samp_per_year: cell(&self.samp_per_year, i),
                implementation_time: cell(&self.implementation_time, i),
                initial_conc: cell(&self.initial_conc, i),
                target_conc: cell(&self.target_conc, i),
                prev_slope: cell(&self.prev_slope, i),
                max_conc: cell(&self.max_conc, i),
                min_conc: cell(&self.min_conc, i),
                mrt: cell(&self.mrt, i),
                mrt_p1: cell(&self.mrt_p1, i),
                frac_p1: cell(&self.frac_p1, i),
                f_p1: cell(&self.f_p1, i),
                f_p2: cell(&self.f_p2, i),
                true_conc_ts: cell(&self.true_conc_ts, i),
                true_conc_times: cell(&self.true_conc_times, i),
                seed: cell(&self.seed, i),
            })
            .collect();
        Ok(rows)
    }
}

impl From<&[ScenarioParams]> for ScenarioColumns {
    fn from(rows: &[ScenarioParams]) -> Self {
        fn col<T>(rows: &[ScenarioParams], get: impl Fn(&ScenarioParams) -> Option<T>) -> Option<Vec<Option<T>>> {
            Some(rows.iter().map(get).collect())
        }
        Self {
            idv: rows.iter().map(|r| r.idv.clone()).collect(),
            error: rows.iter().map(|r| r.error).collect(),
            mrt_model: rows.iter().map(|r| r.mrt_model).collect(),
            samp_years: col(rows, |r| r.samp_years),
            samp_per_year: col(rows, |r| r.samp_per_year),
            implementation_time: col(rows, |r| r.implementation_time),
            initial_conc: col(rows, |r| r.initial_conc),
            target_conc: col(rows, |r| r.target_conc),
            prev_slope: col(rows, |r| r.prev_slope),
            max_conc: col(rows, |r| r.max_conc),
            min_conc: col(rows, |r| r.min_conc),
            mrt: col(rows, |r| r.mrt),
            mrt_p1: col(rows, |r| r.mrt_p1),
            frac_p1: col(rows, |r| r.frac_p1),
            f_p1: col(rows, |r| r.f_p1),
            f_p2: col(rows, |r| r.f_p2),
            true_conc_ts: col(rows, |r| r.true_conc_ts.clone()),
            true_conc_times: col(rows, |r| r.true_conc_times.clone()),
            seed: col(rows, |r| r.seed),
        }
    }
}

/// Runs batches of scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioOrchestrator {
    calculator: DetectionPowerCalculator,
    strategy: ExecutionStrategy,
    cancel: Option<CancelToken>,
    output_path: Option<PathBuf>,
}

impl ScenarioOrchestrator {
    /// Orchestrator with the default (parallel) strategy.
    pub fn new(calculator: DetectionPowerCalculator) -> Self {
        Self {
            calculator,
            strategy: ExecutionStrategy::default(),
            cancel: None,
            output_path: None,
        }
    }

    /// Set the scheduling strategy.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Abort the batch when `cancel` is triggered.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.calculator = self.calculator.with_cancel(cancel.clone());
        self.cancel = Some(cancel);
        self
    }

    /// Also write the finished table as CSV to `path`.
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// The calculator applied to every scenario.
    pub fn calculator(&self) -> &DetectionPowerCalculator {
        &self.calculator
    }

    /// The scheduling strategy.
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Power of every scenario, one row each in input order.
    pub fn run_batch(&self, scenarios: &[ScenarioParams]) -> DetectionPowerResult<PowerTable> {
        check_unique_ids(scenarios)?;
        log::info!(
            "running {} scenarios ({}, {} realizations each, {:?})",
            scenarios.len(),
            self.calculator.config().significance_mode,
            self.calculator.config().nsims,
            self.strategy
        );

        let completed = AtomicUsize::new(0);
        let run_one = |params: &ScenarioParams| self.run_one(params, &completed, scenarios.len());

        let records = match self.strategy {
            ExecutionStrategy::Sequential => scenarios
                .iter()
                .map(run_one)
                .collect::<DetectionPowerResult<Vec<_>>>()?,
            ExecutionStrategy::Parallel { threads } => {
                run_parallel(scenarios, threads, &run_one)?
            }
        };

        let table = PowerTable::new(records);
        let failed = table.errors().count();
        log::info!(
            "batch finished: {} scenarios, {} with errors",
            table.len(),
            failed
        );

        if let Some(path) = &self.output_path {
            table.write_csv_path(path)?;
            log::info!("results written to {}", path.display());
        }
        Ok(table)
    }

    /// Power of every row of a columnar batch.
    pub fn run_columns(&self, columns: ScenarioColumns) -> DetectionPowerResult<PowerTable> {
        let params = columns.into_params()?;
        self.run_batch(&params)
    }

    fn run_one(
        &self,
        params: &ScenarioParams,
        completed: &AtomicUsize,
        total: usize,
    ) -> DetectionPowerResult<PowerRecord> {
        check_cancelled(self.cancel.as_ref())?;
        let config = self.calculator.config();
        let result = match self.calculator.estimate_from_params(params) {
            Ok(result) => result,
            Err(DetectionPowerError::Cancelled) => return Err(DetectionPowerError::Cancelled),
            Err(err) => {
                log::warn!("scenario {} failed: {}", params.idv, err);
                PowerResult::failed(params.idv.clone(), config.nsims, &err)
            }
        };

        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = config.progress_every {
            if done % every == 0 || done == total {
                log::info!("{} of {} scenarios complete", done, total);
            }
        }
        Ok(PowerRecord::from_result(params, &result, config))
    }
}

fn check_unique_ids(scenarios: &[ScenarioParams]) -> DetectionPowerResult<()> {
    let mut seen = HashSet::with_capacity(scenarios.len());
    for params in scenarios {
        if !seen.insert(params.idv.as_str()) {
            return Err(DetectionPowerError::DuplicateScenario {
                idv: params.idv.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(feature = "parallel")]
fn run_parallel<F>(
    scenarios: &[ScenarioParams],
    threads: Option<usize>,
    run_one: &F,
) -> DetectionPowerResult<Vec<PowerRecord>>
where
    F: Fn(&ScenarioParams) -> DetectionPowerResult<PowerRecord> + Sync,
{
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0))
        .build()
        .map_err(|e| DetectionPowerError::configuration("threads", format!("failed to build thread pool: {}", e)))?;
    pool.install(|| scenarios.par_iter().map(run_one).collect())
}

#[cfg(not(feature = "parallel"))]
fn run_parallel<F>(
    scenarios: &[ScenarioParams],
    _threads: Option<usize>,
    run_one: &F,
) -> DetectionPowerResult<Vec<PowerRecord>>
where
    F: Fn(&ScenarioParams) -> DetectionPowerResult<PowerRecord> + Sync,
{
    log::warn!("built without the `parallel` feature, running scenarios sequentially");
    scenarios.iter().map(run_one).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionPowerConfig;

    fn calculator() -> DetectionPowerCalculator {
        DetectionPowerCalculator::new(DetectionPowerConfig {
            nsims: 40,
            ..Default::default()
        })
        .unwrap()
    }

    fn ramp(idv: &str, error: f64) -> ScenarioParams {
        let values = (0..20).map(|i| 0.1 * i as f64).collect();
        ScenarioParams::pass_true_conc(idv, error, values).with_seed(7)
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let orchestrator = ScenarioOrchestrator::new(calculator());
        let err = orchestrator
            .run_batch(&[ramp("a", 1.0), ramp("a", 2.0)])
            .unwrap_err();
        assert!(matches!(err, DetectionPowerError::DuplicateScenario { idv } if idv == "a"));
    }

    #[test]
    fn test_failed_scenario_keeps_its_row() {
        let orchestrator =
            ScenarioOrchestrator::new(calculator()).with_strategy(ExecutionStrategy::Sequential);
        let mut bad = ramp("bad", 1.0);
        bad.true_conc_ts = None;
        let table = orchestrator
            .run_batch(&[ramp("a", 0.5), bad, ramp("c", 0.5)])
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.records()[1].idv, "bad");
        assert!(table.records()[1].power.is_nan());
        assert!(table.records()[1].error_message.is_some());
        assert!(table.get("c").unwrap().error_message.is_none());
    }

    #[test]
    fn test_column_shape_mismatch() {
        let mut columns = ScenarioColumns::from(&[ramp("a", 1.0), ramp("b", 1.0)][..]);
        columns.seed = Some(vec![Some(1)]);
        match columns.into_params() {
            Err(DetectionPowerError::BatchShape {
                field,
                expected,
                actual,
            }) => {
                assert_eq!(field, "seed");
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("expected shape error, got {:?}", other),
        }
    }

    #[test]
    fn test_columns_round_trip_params() {
        let timed = ramp("b", 0.3).with_times((0..20).map(|i| 0.25 * i as f64).collect());
        let rows = vec![ramp("a", 1.0), timed];
        let back = ScenarioColumns::from(rows.as_slice()).into_params().unwrap();
        assert_eq!(back, rows);
        assert_eq!(back[0].true_conc_times, None);

        let mut columns = ScenarioColumns::from(rows.as_slice());
        columns.true_conc_times = Some(vec![None]);
        assert!(matches!(
            columns.into_params(),
            Err(DetectionPowerError::BatchShape { field, .. }) if field == "true_conc_times"
        ));
    }

    #[test]
    fn test_cancelled_batch() {
        let token = CancelToken::new();
        let orchestrator = ScenarioOrchestrator::new(calculator()).with_cancel(token.clone());
        token.cancel();
        assert!(matches!(
            orchestrator.run_batch(&[ramp("a", 1.0)]),
            Err(DetectionPowerError::Cancelled)
        ));
    }
}
