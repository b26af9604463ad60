//! Closed-loop rollout buffer.
//!
//! During a multi-step rollout the model's own prediction is appended to the
//! input window and the oldest row is dropped. [`RolloutWindow`] keeps that
//! feedback state as a bounded buffer of detached rows, so the autodiff graph
//! of one horizon step never reaches into the previous one.

use std::collections::VecDeque;

use candle_core::Tensor;

use crate::error::{ArhdError, Result};

/// Bounded push-evict-oldest buffer of `(D,)` rows.
#[derive(Debug, Clone)]
pub struct RolloutWindow {
    rows: VecDeque<Tensor>,
    capacity: usize,
    channels: usize,
}

impl RolloutWindow {
    /// Seed the buffer from a ground-truth `(T, D)` slice.
    pub fn from_slice(slice: &Tensor) -> Result<Self> {
        let (capacity, channels) = slice.dims2()?;
        if capacity == 0 {
            return Err(ArhdError::shape_mismatch("(T > 0, D)", format!("{:?}", slice.dims())));
        }

        let mut rows = VecDeque::with_capacity(capacity + 1);
        for i in 0..capacity {
            rows.push_back(slice.get(i)?.detach());
        }

        Ok(Self {
            rows,
            capacity,
            channels,
        })
    }

    /// Append a row and evict the oldest one.
    ///
    /// Accepts `(D,)` or `(1, D)`. The stored copy is detached.
    pub fn push(&mut self, row: &Tensor) -> Result<()> {
        let row = row.flatten_all()?;
        let got = row.dim(0)?;
        if got != self.channels {
            return Err(ArhdError::shape_mismatch(
                format!("({},)", self.channels),
                format!("({got},)"),
            ));
        }

        self.rows.push_back(row.detach());
        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
        Ok(())
    }

    /// Current contents as a `(T, D)` tensor, oldest row first.
    pub fn as_tensor(&self) -> Result<Tensor> {
        let rows: Vec<&Tensor> = self.rows.iter().collect();
        Ok(Tensor::stack(&rows, 0)?)
    }

    /// Number of rows currently held (always T).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Never true for a constructed window.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Window length T.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
