//! Experiment driver: train sweep, test sweep, reporting.

use std::path::Path;

use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::config::ExperimentConfig;
use crate::dataset::{CsvDataset, DataProvider, Split, TimeSeries};
use crate::error::{ArhdError, Result};
use crate::loss::HuberLoss;
use crate::metrics::{cumavg, metric, MetricReport};
use crate::model::{ArModel, SequenceModel};
use crate::online::{Mode, OnlineLearner};
use crate::optimizer::OptimizerConfig;

/// Summary of a training sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    /// Anchors visited
    pub anchors: usize,
    /// Optimizer steps taken
    pub updates: usize,
    /// Mean total loss over all updates
    pub mean_loss: f64,
}

/// Outcome of a test sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    /// Final cumulative-average RSE
    pub rse: f64,
    /// Final cumulative-average correlation
    pub corr: f64,
    /// Running average of the per-window RSE
    pub rse_curve: Vec<f64>,
    /// Running average of the per-window correlation
    pub corr_curve: Vec<f64>,
    /// Number of evaluation windows
    pub windows: usize,
    /// Error summary over the concatenated predictions
    pub metrics: MetricReport,
    /// Concatenated predictions, `(windows * pred_len, D)`
    #[serde(skip)]
    pub preds: Vec<Vec<f32>>,
    /// Concatenated ground truth, `(windows * pred_len, D)`
    #[serde(skip)]
    pub trues: Vec<Vec<f32>>,
}

/// Online forecasting experiment.
///
/// The learner is built on first use, once the channel count of the data
/// is known, and persists between [`Experiment::train`] and
/// [`Experiment::test`] so test-time training continues from the trained
/// parameters.
pub struct Experiment {
    config: ExperimentConfig,
    device: Device,
    learner: Option<OnlineLearner<ArModel>>,
}

impl Experiment {
    /// Create an experiment. Validates the configuration and picks a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let device = select_device();
        Ok(Self {
            config,
            device,
            learner: None,
        })
    }

    /// Create an experiment on an explicit device.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_device(config: ExperimentConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            learner: None,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Device the model runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The learner, once a sweep has built it.
    pub fn learner(&self) -> Option<&OnlineLearner<ArModel>> {
        self.learner.as_ref()
    }

    /// Load one split of the configured CSV file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed, or the split is empty.
    pub fn get_data(&self, split: Split) -> Result<CsvDataset> {
        CsvDataset::load(&self.config, split, &self.device)
    }

    fn learner_for(&mut self, channels: usize) -> Result<&mut OnlineLearner<ArModel>> {
        if let Some(learner) = &self.learner {
            if learner.model().channels() != channels {
                return Err(ArhdError::shape_mismatch(
                    format!("{} channels", learner.model().channels()),
                    format!("{channels} channels"),
                ));
            }
        } else {
            let model = ArModel::new(
                self.config.seq_len,
                channels,
                self.config.hidden_size,
                &self.device,
            )?;
            let optimizer = OptimizerConfig {
                learning_rate: self.config.learning_rate,
                ..OptimizerConfig::default()
            }
            .build_adamw(model.parameters())?;
            tracing::info!(
                "Initialized AdamW optimizer with lr={}, {} trainable params",
                optimizer.learning_rate(),
                model.parameter_count()
            );

            let criterion = HuberLoss::new(self.config.huber_delta);
            self.learner = Some(OnlineLearner::new(
                model,
                optimizer,
                criterion,
                self.config.l2_lambda,
                self.config.pred_len,
            )?);
        }

        self.learner
            .as_mut()
            .ok_or_else(|| ArhdError::Training("learner not initialized".into()))
    }

    /// Train at every anchor from `seq_len` to `len - pred_len`, stride 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the series is too short for one anchor, its channel
    /// count differs from the learner's, or an update produces a non-finite loss.
    pub fn train<P: DataProvider + ?Sized>(&mut self, provider: &P) -> Result<TrainSummary> {
        let data = provider.data_x();
        let learner = self.learner_for(data.channels())?;
        let (first, last) = anchor_range(learner, data)?;
        let anchors = last - first + 1;

        tracing::info!(
            "Training on {} rows x {} channels, anchors {}..={}",
            data.len(),
            data.channels(),
            first,
            last
        );

        let pb = progress_bar(anchors as u64)?;
        let (mut loss_sum, mut updates) = (0f64, 0usize);
        for idx in first..=last {
            learner.process_step(data, idx, Mode::Train)?;
            for loss in learner.take_losses() {
                loss_sum += loss.total as f64;
                updates += 1;
            }
            pb.inc(1);
            if idx % 100 == 0 && updates > 0 {
                pb.set_message(format!("{:.4}", loss_sum / updates as f64));
            }
        }
        pb.finish_with_message("train done");

        let mean_loss = if updates > 0 { loss_sum / updates as f64 } else { 0.0 };
        tracing::info!(
            "Train sweep: {} anchors, {} updates, mean loss {:.6}",
            anchors,
            updates,
            mean_loss
        );

        Ok(TrainSummary {
            anchors,
            updates,
            mean_loss,
        })
    }

    /// Evaluate at anchors `seq_len, seq_len + pred_len, ...`, updating after
    /// each forecast.
    ///
    /// # Errors
    ///
    /// Returns [`ArhdError::Dataset`] when the series yields no window, and the
    /// same errors as [`Experiment::train`] otherwise.
    pub fn test<P: DataProvider + ?Sized>(&mut self, provider: &P) -> Result<TestReport> {
        let data = provider.data_x();
        let pred_len = self.config.pred_len;
        let learner = self.learner_for(data.channels())?;
        let (first, last) = anchor_range(learner, data)?;
        let windows = (last - first) / pred_len + 1;

        let pb = progress_bar(windows as u64)?;
        let mut preds: Vec<Tensor> = Vec::with_capacity(windows);
        let mut trues: Vec<Tensor> = Vec::with_capacity(windows);
        let (mut rses, mut corrs) = (Vec::with_capacity(windows), Vec::with_capacity(windows));

        for idx in (first..=last).step_by(pred_len) {
            let output = learner
                .process_step(data, idx, Mode::Test)?
                .ok_or_else(|| ArhdError::Training("test step returned no forecast".into()))?;

            let (rse, corr) = metric(
                &output.predictions.to_vec2::<f32>()?,
                &output.truths.to_vec2::<f32>()?,
            );
            rses.push(rse);
            corrs.push(corr);
            preds.push(output.predictions);
            trues.push(output.truths);

            pb.inc(1);
        }
        pb.finish_with_message("test done");

        let preds = Tensor::cat(&preds, 0)?;
        let trues = Tensor::cat(&trues, 0)?;
        tracing::info!("test shape: {:?} {:?}", preds.dims(), trues.dims());

        let preds = preds.to_vec2::<f32>()?;
        let trues = trues.to_vec2::<f32>()?;

        let rse_curve = cumavg(&rses);
        let corr_curve = cumavg(&corrs);
        let rse = *rse_curve.last().unwrap_or(&f64::NAN);
        let corr = *corr_curve.last().unwrap_or(&f64::NAN);
        tracing::info!("rse:{}, corr:{}", rse, corr);

        Ok(TestReport {
            rse,
            corr,
            rse_curve,
            corr_curve,
            windows,
            metrics: MetricReport::compute(&preds, &trues),
            preds,
            trues,
        })
    }

    /// Load both splits, train, test and write results to `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns the first error from loading, either sweep, or saving.
    pub fn run(&mut self) -> Result<TestReport> {
        tracing::info!("Experiment parameters: {:?}", self.config);

        let train_data = self.get_data(Split::Train)?;
        self.train(&train_data)?;

        let test_data = self.get_data(Split::Test)?;
        let report = self.test(&test_data)?;

        self.save(&report, &self.config.output_dir.clone())?;
        Ok(report)
    }

    /// Write `results.json`, `preds.csv`, `trues.csv` and the model weights.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or any output file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, report: &TestReport, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let results = serde_json::json!({
            "config": self.config,
            "report": report,
        });
        std::fs::write(dir.join("results.json"), serde_json::to_string_pretty(&results)?)?;
        write_rows(&dir.join("preds.csv"), &report.preds)?;
        write_rows(&dir.join("trues.csv"), &report.trues)?;

        if let Some(learner) = &self.learner {
            learner.model().save(dir.join("model.safetensors"))?;
        }

        tracing::info!("Saved results to: {}", dir.display());
        Ok(())
    }
}

fn anchor_range(learner: &OnlineLearner<ArModel>, data: &TimeSeries) -> Result<(usize, usize)> {
    learner.anchor_range(data).ok_or_else(|| {
        ArhdError::Dataset(format!(
            "series of {} rows is too short for seq_len {} + pred_len {}",
            data.len(),
            learner.seq_len(),
            learner.pred_len()
        ))
    })
}

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>7}/{len:7} {msg}";

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn write_rows(path: &Path, rows: &[Vec<f32>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// CUDA when built with the `cuda` feature and `ARHD_FORCE_CPU` is unset.
fn select_device() -> Device {
    let force_cpu = std::env::var("ARHD_FORCE_CPU")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    if force_cpu || !cfg!(feature = "cuda") {
        return Device::Cpu;
    }

    match Device::cuda_if_available(0) {
        Ok(device @ Device::Cuda(_)) => {
            tracing::info!("Device: CUDA (device 0)");
            device
        }
        Ok(_) => {
            tracing::warn!("CUDA not available; falling back to CPU");
            Device::Cpu
        }
        Err(err) => {
            tracing::warn!("CUDA init failed ({err}); falling back to CPU");
            Device::Cpu
        }
    }
}
