//! # arhd-online
//!
//! Online autoregressive forecasting with test-time training.
//!
//! A small model reads a sliding window of the last `seq_len` observations
//! and predicts the next one. Forecasts of length `pred_len` are produced by
//! rolling the window forward over the model's own predictions, and the
//! model is updated after every step from the observed value.
//!
//! ## Features
//!
//! - **Online loop** - per-step updates with Huber loss and an L2 penalty
//! - **Test-time training** - evaluation windows forecast first, then update
//! - **CSV datasets** - ETT-style train/val/test borders and standard scaling
//! - **Metrics** - RSE, correlation and running averages over windows
//!
//! ## Quick Start (CLI)
//!
//! ```bash
//! # Write a sample configuration
//! arhd init config.yaml --preset etth1
//!
//! # Validate it
//! arhd validate config.yaml
//!
//! # Train on the train split, then evaluate on the test split
//! arhd run config.yaml
//! ```
//!
//! ## Quick Start (Library)
//!
//! ```no_run
//! use arhd_online::{Experiment, ExperimentConfig};
//!
//! # fn main() -> arhd_online::Result<()> {
//! let config = ExperimentConfig::from_file("config.yaml")?;
//! let mut experiment = Experiment::new(config)?;
//! let report = experiment.run()?;
//! println!("rse:{}, corr:{}", report.rse, report.corr);
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the loop directly
//!
//! ```rust
//! use arhd_online::{
//!     ArModel, HuberLoss, Mode, OnlineLearner, OptimizerConfig, SequenceModel, TimeSeries,
//! };
//! use candle_core::Device;
//!
//! # fn main() -> arhd_online::Result<()> {
//! let rows: Vec<Vec<f32>> = (0..32).map(|t| vec![(t as f32 * 0.3).sin()]).collect();
//! let data = TimeSeries::from_rows(&rows, &Device::Cpu)?;
//!
//! let model = ArModel::new(8, 1, None, &Device::Cpu)?;
//! let optimizer = OptimizerConfig::default().build_adamw(model.parameters())?;
//! let mut learner = OnlineLearner::new(model, optimizer, HuberLoss::default(), 2e-3, 4)?;
//!
//! learner.process_step(&data, 8, Mode::Train)?;
//! let out = learner.process_step(&data, 12, Mode::Test)?.expect("test mode forecasts");
//! assert_eq!(out.predictions.dims(), &[4, 1]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod online;
pub mod optimizer;
pub mod window;

pub use config::{ExperimentConfig, FeatureMode};
pub use dataset::{CsvDataset, DataProvider, Split, StandardScaler, TimeSeries};
pub use error::{ArhdError, Result};
pub use experiment::{Experiment, TestReport, TrainSummary};
pub use loss::{l2_penalty, HuberLoss};
pub use metrics::{cumavg, metric, MetricReport};
pub use model::{ArModel, SequenceModel};
pub use online::{Mode, OnlineLearner, StepLoss, StepOutput};
pub use optimizer::{AdamWOptimizer, OptimizerConfig};
pub use window::RolloutWindow;
