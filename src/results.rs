//! # Result Tables
//!
//! Flat per-scenario result rows and the batch table, with CSV persistence.
//! Floats are written in shortest round-trip form, NaN as `NaN` and missing
//! values as empty cells, so a written table reads back exactly.

use crate::config::DetectionPowerConfig;
use crate::errors::{DetectionPowerError, DetectionPowerResult};
use crate::power::PowerResult;
use crate::scenario::ScenarioParams;
use crate::significance::SignificanceMode;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// One result row: echoed scenario parameters plus the power outputs.
///
/// The scenario's concentration bounds are echoed as `max_conc_bound` and
/// `min_conc_bound`; `max_conc` is the peak of the noise-free receptor series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerRecord {
    /// Scenario identifier
    pub idv: String,
    /// Detection power in percent, NaN on error
    pub power: f64,
    /// Peak of the noise-free receptor series
    pub max_conc: Option<f64>,
    /// Time of that peak
    pub max_conc_time: Option<f64>,
    /// Pathway 2 fraction (binary model only)
    pub frac_p2: Option<f64>,
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
    /// Upper concentration bound of the scenario
    pub max_conc_bound: Option<f64>,
    /// Lower concentration bound of the scenario
    pub min_conc_bound: Option<f64>,
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
    /// Random seed
    pub seed: u64,
    /// Significance test
    pub significance_mode: SignificanceMode,
    /// Realizations requested
    pub nsims: usize,
    /// Failure message
    pub error_message: Option<String>,
}

impl PowerRecord {
    /// Flatten a result together with its parameters and calculator settings.
    pub fn from_result(
        params: &ScenarioParams,
        result: &PowerResult,
        config: &DetectionPowerConfig,
    ) -> Self {
        let summary = result.transport.as_ref();
        Self {
            idv: result.idv.clone(),
            power: result.power,
            max_conc: summary.map(|s| s.max_conc),
            max_conc_time: summary.map(|s| s.max_conc_time),
            frac_p2: summary.and_then(|s| s.frac_p2),
            error: params.error,
            mrt_model: params.mrt_model,
            samp_years: params.samp_years,
            samp_per_year: params.samp_per_year,
            implementation_time: params.implementation_time,
            initial_conc: params.initial_conc,
            target_conc: params.target_conc,
            prev_slope: params.prev_slope,
            max_conc_bound: params.max_conc,
            min_conc_bound: params.min_conc,
            mrt: params.mrt,
            mrt_p1: params.mrt_p1,
            frac_p1: params.frac_p1,
            f_p1: params.f_p1,
            f_p2: params.f_p2,
            seed: params.effective_seed(),
            significance_mode: config.significance_mode,
            nsims: config.nsims,
            error_message: result.error.clone(),
        }
    }
}

#[inline]
fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[inline]
fn same_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for PowerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.idv == other.idv
            && same(self.power, other.power)
            && same_opt(self.max_conc, other.max_conc)
            && same_opt(self.max_conc_time, other.max_conc_time)
            && same_opt(self.frac_p2, other.frac_p2)
            && same(self.error, other.error)
            && self.mrt_model == other.mrt_model
            && same_opt(self.samp_years, other.samp_years)
            && same_opt(self.samp_per_year, other.samp_per_year)
            && same_opt(self.implementation_time, other.implementation_time)
            && same_opt(self.initial_conc, other.initial_conc)
            && same_opt(self.target_conc, other.target_conc)
            && same_opt(self.prev_slope, other.prev_slope)
            && same_opt(self.max_conc_bound, other.max_conc_bound)
            && same_opt(self.min_conc_bound, other.min_conc_bound)
            && same_opt(self.mrt, other.mrt)
            && same_opt(self.mrt_p1, other.mrt_p1)
            && same_opt(self.frac_p1, other.frac_p1)
            && same_opt(self.f_p1, other.f_p1)
            && same_opt(self.f_p2, other.f_p2)
            && self.seed == other.seed
            && self.significance_mode == other.significance_mode
            && self.nsims == other.nsims
            && self.error_message == other.error_message
    }
}

/// Batch results keyed by scenario id, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerTable {
    records: Vec<PowerRecord>,
}

impl PowerTable {
    /// Table over existing rows.
    pub fn new(records: Vec<PowerRecord>) -> Self {
        Self { records }
    }

    /// All rows.
    pub fn records(&self) -> &[PowerRecord] {
        &self.records
    }

    /// Consume the table.
    pub fn into_records(self) -> Vec<PowerRecord> {
        self.records
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Row of scenario `idv`.
    pub fn get(&self, idv: &str) -> Option<&PowerRecord> {
        self.records.iter().find(|r| r.idv == idv)
    }

    /// Iterate over rows.
    pub fn iter(&self) -> std::slice::Iter<'_, PowerRecord> {
        self.records.iter()
    }

    /// Rows that failed.
    pub fn errors(&self) -> impl Iterator<Item = &PowerRecord> {
        self.records.iter().filter(|r| r.error_message.is_some())
    }

    /// Write the table as CSV with a header row.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> DetectionPowerResult<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
        for record in &self.records {
            wtr.serialize(record)?;
        }
        wtr.flush().map_err(|e| DetectionPowerError::IoError {
            operation: "flush csv".to_string(),
            source: Some(Arc::new(e)),
        })?;
        Ok(())
    }

    /// Read a table written by [`PowerTable::write_csv`].
    pub fn read_csv<R: io::Read>(reader: R) -> DetectionPowerResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let records = rdr
            .deserialize()
            .collect::<Result<Vec<PowerRecord>, csv::Error>>()?;
        Ok(Self { records })
    }

    /// Write the table to a CSV file.
    pub fn write_csv_path(&self, path: impl AsRef<Path>) -> DetectionPowerResult<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| DetectionPowerError::IoError {
            operation: format!("create {}", path.display()),
            source: Some(Arc::new(e)),
        })?;
        self.write_csv(io::BufWriter::new(file))
    }

    /// Read a table from a CSV file.
    pub fn read_csv_path(path: impl AsRef<Path>) -> DetectionPowerResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DetectionPowerError::IoError {
            operation: format!("open {}", path.display()),
            source: Some(Arc::new(e)),
        })?;
        Self::read_csv(io::BufReader::new(file))
    }
}

impl<'a> IntoIterator for &'a PowerTable {
    type Item = &'a PowerRecord;
    type IntoIter = std::slice::Iter<'a, PowerRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
