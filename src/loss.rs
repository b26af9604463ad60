//! Training criterion: Huber loss plus a squared-norm penalty.

use candle_core::{Tensor, Var};

use crate::error::{ArhdError, Result};

/// Huber loss with mean reduction.
///
/// For a residual `r` and threshold `delta`:
/// `0.5 r^2` when `|r| < delta`, else `delta (|r| - 0.5 delta)`.
#[derive(Debug, Clone, Copy)]
pub struct HuberLoss {
    delta: f64,
}

impl Default for HuberLoss {
    fn default() -> Self {
        Self { delta: 1.0 }
    }
}

impl HuberLoss {
    /// Create a criterion with the given transition point.
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }

    /// Transition point between the quadratic and linear regimes.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Scalar loss over the flattened prediction and target.
    pub fn forward(&self, pred: &Tensor, target: &Tensor) -> Result<Tensor> {
        let pred = pred.flatten_all()?;
        let target = target.flatten_all()?;
        if pred.dims() != target.dims() {
            return Err(ArhdError::shape_mismatch(
                format!("{:?}", target.dims()),
                format!("{:?}", pred.dims()),
            ));
        }

        // q = min(|r|, delta); loss = 0.5 q^2 + delta (|r| - q)
        let abs = (pred - target)?.abs()?;
        let delta = Tensor::full(self.delta, abs.shape(), abs.device())?.to_dtype(abs.dtype())?;
        let quad = abs.minimum(&delta)?;
        let linear = (&abs - &quad)?;
        let loss = ((quad.sqr()? * 0.5)? + (linear * self.delta)?)?;
        Ok(loss.mean_all()?)
    }
}

/// Sum of squared L2 norms of every parameter tensor.
///
/// Not averaged over parameter count, so its weight grows with model width.
pub fn l2_penalty(params: &[Var]) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for param in params {
        let sq = param.as_tensor().sqr()?.sum_all()?;
        total = Some(match total {
            Some(acc) => (acc + sq)?,
            None => sq,
        });
    }
    total.ok_or_else(|| ArhdError::Training("model has no parameters".into()))
}
