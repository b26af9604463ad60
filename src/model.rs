//! Multivariate autoregressive sequence model.
//!
//! The online loop only needs something that maps a `(T, D)` window to a
//! `(D,)` next-step prediction and exposes its parameters. [`SequenceModel`]
//! is that seam; [`ArModel`] is the concrete model used by the experiment.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};

use crate::error::{ArhdError, Result};

/// A model that predicts the next row of a series from a fixed window.
pub trait SequenceModel {
    /// Predict the next `(D,)` row from a `(T, D)` window.
    fn forward(&self, window: &Tensor) -> Result<Tensor>;

    /// Every trainable parameter tensor.
    fn parameters(&self) -> Vec<Var>;

    /// Number of channels D.
    fn channels(&self) -> usize;

    /// Window length T.
    fn seq_len(&self) -> usize;
}

/// Linear AR model over the flattened window, with an optional tanh
/// hidden projection.
pub struct ArModel {
    var_map: VarMap,
    hidden: Option<Linear>,
    head: Linear,
    seq_len: usize,
    channels: usize,
    device: Device,
}

impl ArModel {
    /// Build a model on `device` with freshly initialized weights.
    pub fn new(
        seq_len: usize,
        channels: usize,
        hidden_size: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        if seq_len == 0 || channels == 0 {
            return Err(ArhdError::Config(format!(
                "model needs seq_len > 0 and channels > 0, got {seq_len} and {channels}"
            )));
        }

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let in_dim = seq_len * channels;

        let (hidden, head) = match hidden_size {
            Some(h) => {
                let hidden = candle_nn::linear(in_dim, h, vb.pp("hidden"))?;
                let head = candle_nn::linear(h, channels, vb.pp("head"))?;
                (Some(hidden), head)
            }
            None => (None, candle_nn::linear(in_dim, channels, vb.pp("head"))?),
        };

        tracing::debug!(
            seq_len,
            channels,
            ?hidden_size,
            params = var_map.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            "built AR model"
        );

        Ok(Self {
            var_map,
            hidden,
            head,
            seq_len,
            channels,
            device: device.clone(),
        })
    }

    /// Backing variable store.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Total number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.var_map.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Save weights in safetensors format.
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        self.var_map.save(path)?;
        Ok(())
    }

    /// Load weights saved by [`ArModel::save`] into this model.
    pub fn load<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        self.var_map.load(path)?;
        Ok(())
    }
}

impl SequenceModel for ArModel {
    fn forward(&self, window: &Tensor) -> Result<Tensor> {
        let dims = window.dims();
        if dims != [self.seq_len, self.channels] {
            return Err(ArhdError::shape_mismatch(
                format!("[{}, {}]", self.seq_len, self.channels),
                format!("{dims:?}"),
            ));
        }

        let x = window.reshape((1, self.seq_len * self.channels))?;
        let x = match &self.hidden {
            Some(hidden) => hidden.forward(&x)?.tanh()?,
            None => x,
        };
        let y = self.head.forward(&x)?;
        Ok(y.squeeze(0)?)
    }

    fn parameters(&self) -> Vec<Var> {
        self.var_map.all_vars()
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn seq_len(&self) -> usize {
        self.seq_len
    }
}
