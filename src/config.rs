//! Configuration parsing and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArhdError, Result};

/// Main configuration for an online forecasting experiment.
///
/// # Example
///
/// ```rust
/// use arhd_online::ExperimentConfig;
///
/// # fn main() -> arhd_online::Result<()> {
/// let mut config = ExperimentConfig::from_preset("etth1")?;
/// config.pred_len = 12;
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Dataset name (`ETTh1`, `ETTm1`, `ohio540`, `custom`, ...).
    #[serde(default = "default_data")]
    pub data: String,

    /// Directory holding the data file.
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Data file name, relative to `root_path`.
    pub data_path: String,

    /// Which columns feed the model.
    #[serde(default)]
    pub features: FeatureMode,

    /// Target column name.
    #[serde(default = "default_target")]
    pub target: String,

    /// Sampling frequency string. Carried for the data provider.
    #[serde(default = "default_freq")]
    pub freq: String,

    /// Optional explicit column list (target is always appended).
    #[serde(default)]
    pub cols: Option<Vec<String>>,

    /// Input window length (T).
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,

    /// Label length. Consumed by the data provider only.
    #[serde(default = "default_label_len")]
    pub label_len: usize,

    /// Forecast horizon (tau).
    #[serde(default = "default_pred_len")]
    pub pred_len: usize,

    /// Hidden projection width of the AR model (None = purely linear).
    #[serde(default)]
    pub hidden_size: Option<usize>,

    /// Coefficient of the squared-norm penalty added to every loss.
    #[serde(default = "default_l2_lambda")]
    pub l2_lambda: f64,

    /// AdamW learning rate.
    #[serde(default = "default_lr")]
    pub learning_rate: f64,

    /// Huber loss transition point.
    #[serde(default = "default_huber_delta")]
    pub huber_delta: f64,

    /// Standardize columns with statistics of the train split.
    #[serde(default = "default_true")]
    pub scale: bool,

    /// Output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_data() -> String {
    "custom".into()
}
fn default_root_path() -> String {
    "./data".into()
}
fn default_target() -> String {
    "OT".into()
}
fn default_freq() -> String {
    "h".into()
}
fn default_seq_len() -> usize {
    96
}
fn default_label_len() -> usize {
    48
}
fn default_pred_len() -> usize {
    24
}
fn default_l2_lambda() -> f64 {
    2e-3
}
fn default_lr() -> f64 {
    1e-3
}
fn default_huber_delta() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_output_dir() -> String {
    "./outputs".into()
}

/// Feature selection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureMode {
    /// Multivariate in, multivariate out.
    #[default]
    M,
    /// Univariate: the target column only.
    S,
    /// Multivariate in, univariate target.
    MS,
}

impl ExperimentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create a configuration from a preset.
    ///
    /// Available presets:
    /// - `"ohio540"` - glucose series, 6-step horizon
    /// - `"etth1"` - hourly ETT, 96/24 windows
    /// - `"ettm1"` - 15-minute ETT, 96/24 windows
    ///
    /// # Errors
    ///
    /// Returns [`ArhdError::Config`] for an unknown preset name.
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "ohio540" => Ok(Self::ohio540_preset()),
            "etth1" => Ok(Self::etth1_preset()),
            "ettm1" => Ok(Self::ettm1_preset()),
            _ => Err(ArhdError::Config(format!("Unknown preset: {preset}"))),
        }
    }

    /// OhioT1DM patient 540 with a 6-step horizon.
    #[must_use]
    pub fn ohio540_preset() -> Self {
        Self {
            data: "ohio540".into(),
            root_path: "./data/ohio".into(),
            data_path: "540.csv".into(),
            features: FeatureMode::M,
            target: "CGM".into(),
            freq: "t".into(),
            cols: None,
            seq_len: 12,
            label_len: 6,
            pred_len: 6,
            hidden_size: None,
            l2_lambda: default_l2_lambda(),
            learning_rate: default_lr(),
            huber_delta: default_huber_delta(),
            scale: true,
            output_dir: "./outputs/ohio540".into(),
        }
    }

    /// Hourly ETT transformer-1 data.
    #[must_use]
    pub fn etth1_preset() -> Self {
        Self {
            data: "ETTh1".into(),
            root_path: "./data/ETT".into(),
            data_path: "ETTh1.csv".into(),
            features: FeatureMode::M,
            target: default_target(),
            freq: "h".into(),
            cols: None,
            seq_len: 96,
            label_len: 24,
            pred_len: 24,
            hidden_size: None,
            l2_lambda: default_l2_lambda(),
            learning_rate: default_lr(),
            huber_delta: default_huber_delta(),
            scale: true,
            output_dir: "./outputs/etth1".into(),
        }
    }

    /// 15-minute ETT transformer-1 data.
    #[must_use]
    pub fn ettm1_preset() -> Self {
        Self {
            data: "ETTm1".into(),
            data_path: "ETTm1.csv".into(),
            freq: "t".into(),
            output_dir: "./outputs/ettm1".into(),
            ..Self::etth1_preset()
        }
    }

    /// Full path of the data file.
    pub fn data_file(&self) -> PathBuf {
        Path::new(&self.root_path).join(&self.data_path)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ArhdError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.data_path.is_empty() {
            return Err(ArhdError::Config("data_path is required".into()));
        }

        if self.seq_len == 0 {
            return Err(ArhdError::Config("seq_len must be > 0".into()));
        }

        if self.pred_len == 0 {
            return Err(ArhdError::Config("pred_len must be > 0".into()));
        }

        if self.label_len > self.seq_len {
            return Err(ArhdError::Config(format!(
                "label_len ({}) must not exceed seq_len ({})",
                self.label_len, self.seq_len
            )));
        }

        if self.hidden_size == Some(0) {
            return Err(ArhdError::Config("hidden_size must be > 0".into()));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ArhdError::Config("learning_rate must be > 0".into()));
        }

        if !(self.l2_lambda.is_finite() && self.l2_lambda >= 0.0) {
            return Err(ArhdError::Config("l2_lambda must be >= 0".into()));
        }

        if !(self.huber_delta.is_finite() && self.huber_delta > 0.0) {
            return Err(ArhdError::Config("huber_delta must be > 0".into()));
        }

        if self.features != FeatureMode::M && self.target.is_empty() {
            return Err(ArhdError::Config(
                "target is required for S and MS features".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_serialization() {
        let config = ExperimentConfig::etth1_preset();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: ExperimentConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.data_path, restored.data_path);
        assert_eq!(config.seq_len, restored.seq_len);
        assert_eq!(config.features, restored.features);
    }

    #[test]
    fn test_presets() {
        assert!(ExperimentConfig::from_preset("ohio540").is_ok());
        assert!(ExperimentConfig::from_preset("etth1").is_ok());
        assert!(ExperimentConfig::from_preset("ettm1").is_ok());
        assert!(ExperimentConfig::from_preset("invalid").is_err());
    }

    #[test]
    fn test_ohio_preset_horizon() {
        let config = ExperimentConfig::ohio540_preset();
        assert_eq!(config.pred_len, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: ExperimentConfig = serde_yaml::from_str("data_path: series.csv\n").unwrap();
        assert_eq!(config.seq_len, 96);
        assert_eq!(config.pred_len, 24);
        assert_eq!(config.features, FeatureMode::M);
        assert!(config.scale);
        assert!(config.cols.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_feature_mode_parsing() {
        let config: ExperimentConfig =
            serde_yaml::from_str("data_path: a.csv\nfeatures: MS\ntarget: load\n").unwrap();
        assert_eq!(config.features, FeatureMode::MS);
        assert_eq!(config.target, "load");
    }

    #[test]
    fn test_validation_rejects_bad_windows() {
        let mut config = ExperimentConfig::etth1_preset();
        config.seq_len = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::etth1_preset();
        config.pred_len = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::etth1_preset();
        config.label_len = config.seq_len + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_hyperparameters() {
        let mut config = ExperimentConfig::etth1_preset();
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::etth1_preset();
        config.l2_lambda = -1e-3;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::etth1_preset();
        config.l2_lambda = 0.0;
        assert!(config.validate().is_ok());

        let mut config = ExperimentConfig::etth1_preset();
        config.hidden_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let config = ExperimentConfig::ohio540_preset();
        config.to_file(file.path()).unwrap();

        let loaded = ExperimentConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.data, "ohio540");
        assert_eq!(loaded.target, "CGM");
    }

    #[test]
    fn test_data_file_join() {
        let config = ExperimentConfig::etth1_preset();
        assert_eq!(config.data_file(), Path::new("./data/ETT").join("ETTh1.csv"));
    }
}
