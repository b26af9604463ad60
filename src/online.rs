//! Online training and evaluation over a sliding anchor index.
//!
//! Each call to [`OnlineLearner::process_step`] handles one anchor `idx`:
//! the ground-truth window `data[idx - T .. idx]` seeds a closed-loop
//! rollout of `tau` horizon steps, where every prediction is fed back as the
//! next input row.
//!
//! - **Train** runs one update pass: at every horizon step the Huber loss
//!   plus the L2 penalty is backpropagated and AdamW takes one step.
//! - **Test** first runs a prediction pass that records `tau` forecasts
//!   without touching the parameters, then an update pass identical to
//!   train. The returned forecasts therefore predate that anchor's updates.

use std::str::FromStr;

use candle_core::{DType, Tensor};

use crate::dataset::TimeSeries;
use crate::error::{ArhdError, Result};
use crate::loss::{l2_penalty, HuberLoss};
use crate::model::SequenceModel;
use crate::optimizer::AdamWOptimizer;
use crate::window::RolloutWindow;

/// What a step does at an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One update pass.
    Train,
    /// Prediction pass, then update pass.
    Test,
}

impl FromStr for Mode {
    type Err = ArhdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(ArhdError::InvalidMode(other.to_string())),
        }
    }
}

/// Forecasts and ground truth of one test step, each `(tau, D)`.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Closed-loop predictions recorded before any update at this anchor
    pub predictions: Tensor,
    /// Ground-truth rows `data[idx .. idx + tau]`
    pub truths: Tensor,
}

/// Loss components of one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLoss {
    /// Huber loss of the prediction
    pub data: f32,
    /// Unscaled squared-norm penalty
    pub penalty: f32,
    /// `data + l2_lambda * penalty`, the value that was backpropagated
    pub total: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Predict,
    Update,
}

/// The online learner: model, optimizer and criterion for one run.
pub struct OnlineLearner<M: SequenceModel> {
    model: M,
    optimizer: AdamWOptimizer,
    criterion: HuberLoss,
    l2_lambda: f64,
    pred_len: usize,
    losses: Vec<StepLoss>,
}

impl<M: SequenceModel> OnlineLearner<M> {
    /// Bind a model to its optimizer and criterion.
    ///
    /// The optimizer must have been built over `model.parameters()`.
    pub fn new(
        model: M,
        optimizer: AdamWOptimizer,
        criterion: HuberLoss,
        l2_lambda: f64,
        pred_len: usize,
    ) -> Result<Self> {
        if pred_len == 0 {
            return Err(ArhdError::Config("pred_len must be > 0".into()));
        }
        Ok(Self {
            model,
            optimizer,
            criterion,
            l2_lambda,
            pred_len,
            losses: Vec::new(),
        })
    }

    /// Window length T.
    pub fn seq_len(&self) -> usize {
        self.model.seq_len()
    }

    /// Horizon tau.
    pub fn pred_len(&self) -> usize {
        self.pred_len
    }

    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Optimizer state (learning rate, step count).
    pub fn optimizer(&self) -> &AdamWOptimizer {
        &self.optimizer
    }

    /// Mutable optimizer access, e.g. to change the learning rate.
    pub fn optimizer_mut(&mut self) -> &mut AdamWOptimizer {
        &mut self.optimizer
    }

    /// Losses of the most recent update pass, one per horizon step.
    ///
    /// Each update pass replaces the previous anchor's entries, so the
    /// history never holds more than `pred_len` values.
    pub fn losses(&self) -> &[StepLoss] {
        &self.losses
    }

    /// Drain the losses of the most recent update pass.
    pub fn take_losses(&mut self) -> Vec<StepLoss> {
        std::mem::take(&mut self.losses)
    }

    /// Consume the learner and return the trained model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Range of valid anchors `(min, max)`, both inclusive.
    pub fn anchor_range(&self, data: &TimeSeries) -> Option<(usize, usize)> {
        let min = self.seq_len();
        let max = data.len().checked_sub(self.pred_len)?;
        (min <= max).then_some((min, max))
    }

    /// Process one anchor in `mode`.
    ///
    /// Returns `Some` in test mode and `None` in train mode. Fails before
    /// touching any parameter when `idx` cannot provide a full window and a
    /// full horizon, or when `data` has the wrong channel count.
    pub fn process_step(
        &mut self,
        data: &TimeSeries,
        idx: usize,
        mode: Mode,
    ) -> Result<Option<StepOutput>> {
        self.check_anchor(data, idx)?;

        match mode {
            Mode::Train => {
                self.run_horizon(data, idx, Pass::Update)?;
                Ok(None)
            }
            Mode::Test => {
                let output = self.run_horizon(data, idx, Pass::Predict)?;
                self.run_horizon(data, idx, Pass::Update)?;
                Ok(output)
            }
        }
    }

    /// [`OnlineLearner::process_step`] with the mode given by name.
    pub fn process_named(
        &mut self,
        data: &TimeSeries,
        idx: usize,
        mode: &str,
    ) -> Result<Option<StepOutput>> {
        let mode: Mode = mode.parse()?;
        self.process_step(data, idx, mode)
    }

    fn check_anchor(&self, data: &TimeSeries, idx: usize) -> Result<()> {
        if data.channels() != self.model.channels() {
            return Err(ArhdError::shape_mismatch(
                format!("{} channels", self.model.channels()),
                format!("{} channels", data.channels()),
            ));
        }

        let min = self.seq_len();
        let max = data.len().saturating_sub(self.pred_len);
        let past_end = idx
            .checked_add(self.pred_len)
            .map_or(true, |end| end > data.len());
        if idx < min || past_end {
            return Err(ArhdError::IndexOutOfBounds { idx, min, max });
        }
        Ok(())
    }

    /// One closed-loop rollout of `tau` steps from the ground-truth window.
    ///
    /// `Predict` records forecasts and never updates; `Update` steps the
    /// optimizer once per horizon step and records nothing.
    fn run_horizon(
        &mut self,
        data: &TimeSeries,
        idx: usize,
        pass: Pass,
    ) -> Result<Option<StepOutput>> {
        let seq_len = self.seq_len();
        if pass == Pass::Update {
            self.losses.clear();
        }
        let mut window = RolloutWindow::from_slice(&data.slice_rows(idx - seq_len, idx)?)?;

        let mut preds = Vec::with_capacity(self.pred_len);
        let mut truths = Vec::with_capacity(self.pred_len);

        for j in 0..self.pred_len {
            let y = data.row(idx + j)?;
            let y_hat = self.model.forward(&window.as_tensor()?)?;
            window.push(&y_hat)?;

            match pass {
                Pass::Predict => {
                    preds.push(y_hat.detach());
                    truths.push(y);
                }
                Pass::Update => {
                    let loss = self.update(&y_hat, &y, idx, j)?;
                    tracing::trace!(idx, horizon = j, loss = loss.total, "update");
                    self.losses.push(loss);
                }
            }
        }

        if pass == Pass::Update {
            return Ok(None);
        }
        Ok(Some(StepOutput {
            predictions: Tensor::stack(&preds, 0)?,
            truths: Tensor::stack(&truths, 0)?,
        }))
    }

    fn update(
        &mut self,
        y_hat: &Tensor,
        y: &Tensor,
        idx: usize,
        horizon: usize,
    ) -> Result<StepLoss> {
        let data_loss = self.criterion.forward(y_hat, y)?;
        let penalty = l2_penalty(&self.model.parameters())?;
        let total = (&data_loss + (&penalty * self.l2_lambda)?)?;

        let total_value = total.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        if !total_value.is_finite() {
            return Err(ArhdError::NonFinite {
                idx,
                horizon,
                loss: total_value,
            });
        }

        self.optimizer.step(&total)?;

        Ok(StepLoss {
            data: data_loss.to_scalar::<f32>()?,
            penalty: penalty.to_scalar::<f32>()?,
            total: total_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArModel;
    use crate::optimizer::OptimizerConfig;
    use candle_core::Device;

    fn series(rows: usize, channels: usize) -> TimeSeries {
        let values: Vec<Vec<f32>> = (0..rows)
            .map(|t| (0..channels).map(|c| ((t + c) as f32 * 0.3).sin()).collect())
            .collect();
        TimeSeries::from_rows(&values, &Device::Cpu).unwrap()
    }

    fn learner(
        seq_len: usize,
        channels: usize,
        pred_len: usize,
        l2_lambda: f64,
    ) -> OnlineLearner<ArModel> {
        let model = ArModel::new(seq_len, channels, None, &Device::Cpu).unwrap();
        let optimizer = OptimizerConfig {
            learning_rate: 1e-2,
            ..OptimizerConfig::default()
        }
        .build_adamw(model.parameters())
        .unwrap();
        OnlineLearner::new(model, optimizer, HuberLoss::default(), l2_lambda, pred_len).unwrap()
    }

    fn snapshot(learner: &OnlineLearner<ArModel>) -> Vec<Vec<f32>> {
        learner
            .model()
            .parameters()
            .iter()
            .map(|v| v.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap())
            .collect()
    }

    fn zero_parameters(learner: &OnlineLearner<ArModel>) {
        for var in learner.model().parameters() {
            var.set(&var.as_tensor().zeros_like().unwrap()).unwrap();
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert!(matches!(
            "invalid".parse::<Mode>(),
            Err(ArhdError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_train_step_updates_tau_times() {
        let data = series(30, 3);
        let mut learner = learner(6, 3, 4, 1e-3);
        let before = snapshot(&learner);

        let out = learner.process_step(&data, 10, Mode::Train).unwrap();
        assert!(out.is_none());
        assert_eq!(learner.optimizer().steps(), 4);
        assert_eq!(learner.losses().len(), 4);
        assert_ne!(snapshot(&learner), before);
    }

    #[test]
    fn test_test_step_shapes_and_truths() {
        let data = series(30, 2);
        let mut learner = learner(5, 2, 3, 1e-3);

        let out = learner.process_step(&data, 12, Mode::Test).unwrap().unwrap();
        assert_eq!(out.predictions.dims(), &[3, 2]);
        assert_eq!(out.truths.dims(), &[3, 2]);
        assert_eq!(
            out.truths.to_vec2::<f32>().unwrap(),
            data.slice_rows(12, 15).unwrap().to_vec2::<f32>().unwrap()
        );
        // only the update pass steps the optimizer
        assert_eq!(learner.optimizer().steps(), 3);
    }

    #[test]
    fn test_predictions_precede_updates() {
        let data = series(30, 2);
        let mut learner = learner(4, 2, 3, 0.0);
        zero_parameters(&learner);

        let out = learner.process_step(&data, 8, Mode::Test).unwrap().unwrap();
        let preds = out.predictions.to_vec2::<f32>().unwrap();
        assert!(preds.iter().flatten().all(|&v| v == 0.0));

        // the same window now forecasts something else
        let window = data.slice_rows(4, 8).unwrap();
        let after = learner.model().forward(&window).unwrap().to_vec1::<f32>().unwrap();
        assert!(after.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_first_and_last_anchor_are_valid() {
        let data = series(20, 1);
        let mut learner = learner(5, 1, 3, 1e-3);
        assert_eq!(learner.anchor_range(&data), Some((5, 17)));
        assert!(learner.process_step(&data, 5, Mode::Train).is_ok());
        assert!(learner.process_step(&data, 17, Mode::Test).is_ok());
    }

    #[test]
    fn test_out_of_bounds_anchor_does_not_mutate() {
        let data = series(20, 1);
        let mut learner = learner(5, 1, 3, 1e-3);
        let before = snapshot(&learner);

        for idx in [0, 4, 18, 25] {
            let err = learner.process_step(&data, idx, Mode::Train).unwrap_err();
            assert!(matches!(
                err,
                ArhdError::IndexOutOfBounds { min: 5, max: 17, .. }
            ));
        }
        assert_eq!(learner.optimizer().steps(), 0);
        assert_eq!(snapshot(&learner), before);
    }

    #[test]
    fn test_invalid_mode_does_not_mutate() {
        let data = series(20, 2);
        let mut learner = learner(5, 2, 2, 1e-3);
        let before = snapshot(&learner);

        let err = learner.process_named(&data, 8, "invalid").unwrap_err();
        assert!(matches!(err, ArhdError::InvalidMode(_)));
        assert_eq!(learner.optimizer().steps(), 0);
        assert_eq!(snapshot(&learner), before);
    }

    #[test]
    fn test_channel_mismatch() {
        let data = series(20, 3);
        let mut learner = learner(5, 2, 2, 1e-3);
        assert!(matches!(
            learner.process_step(&data, 8, Mode::Train),
            Err(ArhdError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_penalty_raises_loss() {
        let data = series(20, 2);
        let mut learner = learner(4, 2, 1, 0.5);
        learner.process_step(&data, 6, Mode::Train).unwrap();

        let loss = learner.losses()[0];
        assert!(loss.penalty > 0.0);
        assert!(loss.total > loss.data);
        assert!((loss.total - (loss.data + 0.5 * loss.penalty)).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_loss_is_reported() {
        let mut rows: Vec<Vec<f32>> = (0..12).map(|t| vec![t as f32 * 0.1]).collect();
        rows[6] = vec![f32::NAN];
        let data = TimeSeries::from_rows(&rows, &Device::Cpu).unwrap();
        let mut learner = learner(4, 1, 2, 1e-3);

        let err = learner.process_step(&data, 6, Mode::Train).unwrap_err();
        assert!(matches!(
            err,
            ArhdError::NonFinite { idx: 6, horizon: 0, .. }
        ));
        assert_eq!(learner.optimizer().steps(), 0);
    }

    #[test]
    fn test_take_losses_drains() {
        let data = series(20, 1);
        let mut learner = learner(4, 1, 2, 1e-3);
        learner.process_step(&data, 4, Mode::Train).unwrap();
        assert_eq!(learner.take_losses().len(), 2);
        assert!(learner.losses().is_empty());
    }

    #[test]
    fn test_loss_history_is_bounded_by_horizon() {
        let data = series(60, 2);
        let mut learner = learner(4, 2, 3, 1e-3);
        let (first, last) = learner.anchor_range(&data).unwrap();

        for idx in first..=last {
            learner.process_step(&data, idx, Mode::Train).unwrap();
            assert_eq!(learner.losses().len(), 3);
        }
        assert_eq!(learner.optimizer().steps(), (last - first + 1) * 3);

        learner.process_step(&data, first, Mode::Test).unwrap();
        assert_eq!(learner.losses().len(), 3);
    }
}
