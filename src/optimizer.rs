//! AdamW optimizer bound to the model's parameters.

use candle_core::{Tensor, Var};
use candle_nn::{Optimizer, ParamsAdamW};

use crate::error::{ArhdError, Result};

/// Optimizer configuration.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Beta1 for Adam
    pub beta1: f64,
    /// Beta2 for Adam
    pub beta2: f64,
    /// Decoupled weight decay
    pub weight_decay: f64,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.01,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    /// Create an AdamW optimizer over `vars`.
    ///
    /// # Errors
    ///
    /// Returns an error if the optimizer cannot be created.
    pub fn build_adamw(&self, vars: Vec<Var>) -> Result<AdamWOptimizer> {
        let params = ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
        };

        let opt = candle_nn::AdamW::new(vars, params)
            .map_err(|e| ArhdError::Training(format!("Failed to create AdamW: {}", e)))?;

        Ok(AdamWOptimizer {
            inner: opt,
            steps: 0,
        })
    }
}

/// AdamW optimizer wrapper that counts applied steps.
pub struct AdamWOptimizer {
    inner: candle_nn::AdamW,
    steps: usize,
}

impl AdamWOptimizer {
    /// Backpropagate `loss` and apply one update.
    ///
    /// Gradients are recomputed from scratch on every call, so there is no
    /// separate zero-grad step.
    ///
    /// # Errors
    ///
    /// Returns an error if backpropagation or the update fails.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner
            .backward_step(loss)
            .map_err(|e| ArhdError::Training(format!("Optimizer step failed: {}", e)))?;
        self.steps += 1;
        Ok(())
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Get current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// Set learning rate.
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}
