//! # Groundwater Trend Detection Power
//!
//! Monte Carlo estimation of how likely a monitoring programme is to detect a
//! change in groundwater concentrations.
//!
//! A scenario describes the noise-free concentration at a receptor, either
//! supplied directly or generated from a source history and a lag model
//! (piston flow or binary exponential piston flow). Gaussian noise is added to
//! that series many times and a significance test is applied to every
//! realization. The detection power is the percentage of realizations in which
//! the expected trend or change point is found.
//!
//! ## Key Features
//!
//! - **Transport Models**: pass-through series, piston flow and the binary
//!   exponential piston-flow model with two age pathways
//! - **Significance Tests**: linear regression and Mann-Kendall, optionally
//!   anchored at the series maximum or minimum, multi-part Mann-Kendall with an
//!   expected per-segment pattern, and the Pettitt change-point test
//! - **Efficient Multi-Part Search**: breakpoint candidates restricted to a
//!   window around the noise-free breakpoints
//! - **Reproducibility**: every scenario and realization draws from its own
//!   seeded ChaCha stream, so results do not depend on scheduling
//! - **Batch Runs**: sequential or rayon-parallel batches with per-scenario
//!   error capture, cancellation and CSV persistence
//!
//! ## Quick Start
//!
//! ```rust
//! use gw_detect_power::{
//!     DetectionPowerCalculator, DetectionPowerConfig, ExecutionStrategy, ScenarioOrchestrator,
//!     ScenarioParams, SignificanceMode,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DetectionPowerConfig {
//!         nsims: 100,
//!         ..DetectionPowerConfig::for_mode(SignificanceMode::MannKendall)
//!     };
//!     let calculator = DetectionPowerCalculator::new(config)?;
//!
//!     let declining: Vec<f64> = (0..40).map(|i| 20.0 - 0.25 * i as f64).collect();
//!     let scenarios = vec![
//!         ScenarioParams::pass_true_conc("quiet", 0.0, declining.clone()),
//!         ScenarioParams::pass_true_conc("noisy", 4.0, declining),
//!     ];
//!
//!     let table = ScenarioOrchestrator::new(calculator)
//!         .with_strategy(ExecutionStrategy::Sequential)
//!         .run_batch(&scenarios)?;
//!     assert_eq!(table.get("quiet").map(|r| r.power), Some(100.0));
//!     for record in &table {
//!         println!("{}: {:.1}%", record.idv, record.power);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`ScenarioOrchestrator`] fans a batch out over a [`DetectionPowerCalculator`],
//! which builds the true series ([`transport`]), draws realizations
//! ([`noise`]) and applies a [`significance::SignificanceTest`]. Results are
//! collected into a [`PowerTable`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod execution;
pub mod math_utils;
pub mod results;
pub mod rng;
pub mod series;

// Models and tests
pub mod multipart;
pub mod noise;
pub mod significance;
pub mod transport;
pub mod trend_stats;

// Power estimation
pub mod orchestrator;
pub mod power;
pub mod scenario;

// Re-exports for convenience - main public API
pub use config::{DetectionPowerConfig, ExpectSlope};
pub use errors::{DetectionPowerError, DetectionPowerResult};
pub use execution::CancelToken;
pub use orchestrator::{ExecutionStrategy, ScenarioColumns, ScenarioOrchestrator};
pub use power::{DetectionPowerCalculator, PowerResult, TransportSummary};
pub use results::{PowerRecord, PowerTable};
pub use scenario::{Scenario, ScenarioParams};
pub use series::ConcentrationSeries;

// Transport exports
pub use transport::{
    build_true_series, BinaryEpfm, BinaryEpfmDiagnostics, BinaryPathways, Sampling,
    SourceHistory, TransportKind, TransportSpec, TrueSeries,
};

// Significance test exports
pub use multipart::{CheckStep, EfficientSearch, MultiPartResult, MultiPartSearch, TrendSign};
pub use significance::{SignificanceMode, SignificanceTest, TestOutcome};
pub use trend_stats::{mann_kendall, pettitt, MannKendallResult, PettittResult};
