//! Error types for arhd-online.
//!
//! Every fallible operation in the crate returns [`Result`]. Nothing is
//! retried: the first error aborts the current sweep.
//!
//! # Example
//!
//! ```rust
//! use arhd_online::{ArhdError, Mode};
//!
//! match "predict".parse::<Mode>() {
//!     Err(ArhdError::InvalidMode(mode)) => assert_eq!(mode, "predict"),
//!     _ => unreachable!(),
//! }
//! ```

use thiserror::Error;

/// Result type alias for arhd-online operations.
pub type Result<T> = std::result::Result<T, ArhdError>;

/// Errors that can occur in arhd-online.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ArhdError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// CSV read or write failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Anchor index cannot provide a full window and horizon.
    #[error("index {idx} out of bounds: valid anchors are {min}..={max}")]
    IndexOutOfBounds {
        /// Requested anchor index
        idx: usize,
        /// Smallest valid anchor (the window length)
        min: usize,
        /// Largest valid anchor (series length minus horizon)
        max: usize,
    },

    /// Unrecognized step mode.
    #[error("mode should belong to ['train', 'test'], got '{0}'")]
    InvalidMode(String),

    /// Tensor shape does not match what the model expects.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape description
        got: String,
    },

    /// Loss became NaN or infinite.
    #[error("non-finite loss {loss} at index {idx}, horizon step {horizon}")]
    NonFinite {
        /// Anchor index of the failing step
        idx: usize,
        /// Horizon step within the anchor
        horizon: usize,
        /// The offending loss value
        loss: f32,
    },

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl ArhdError {
    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<indicatif::style::TemplateError> for ArhdError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        ArhdError::Template(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_creation() {
        let error = ArhdError::Config("seq_len must be > 0".to_string());
        assert_eq!(error.to_string(), "configuration error: seq_len must be > 0");
    }

    #[test]
    fn test_bounds_error_display() {
        let error = ArhdError::IndexOutOfBounds {
            idx: 3,
            min: 8,
            max: 40,
        };
        assert_eq!(
            error.to_string(),
            "index 3 out of bounds: valid anchors are 8..=40"
        );
    }

    #[test]
    fn test_invalid_mode_display() {
        let error = ArhdError::InvalidMode("invalid".into());
        assert!(error.to_string().contains("['train', 'test']"));
        assert!(error.to_string().contains("invalid"));
    }

    #[test]
    fn test_non_finite_display() {
        let error = ArhdError::NonFinite {
            idx: 12,
            horizon: 2,
            loss: f32::NAN,
        };
        let msg = error.to_string();
        assert!(msg.contains("index 12"));
        assert!(msg.contains("horizon step 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ArhdError = io_error.into();
        assert!(matches!(error, ArhdError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_config_parse_error_conversion() {
        let yaml_error =
            serde_yaml::from_str::<serde_yaml::Value>("invalid: yaml: :::").unwrap_err();
        let error: ArhdError = yaml_error.into();
        assert!(error.to_string().contains("invalid config file"));
    }

    #[test]
    fn test_candle_error_conversion() {
        use candle_core::{DType, Device, Tensor};

        let tensor1 = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let tensor2 = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();

        let candle_error = tensor1.broadcast_add(&tensor2).unwrap_err();
        let error: ArhdError = candle_error.into();
        assert!(error.to_string().contains("candle error"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = io::Error::new(io::ErrorKind::NotFound, "data.csv not found");
        let error: ArhdError = io_error.into();
        assert!(error.source().is_some());
    }

    #[test]
    fn test_shape_mismatch_helper() {
        let error = ArhdError::shape_mismatch("(12, 3)", "(12, 4)");
        assert_eq!(
            error.to_string(),
            "shape mismatch: expected (12, 3), got (12, 4)"
        );
    }
}
