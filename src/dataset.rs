//! Time series storage and CSV data provider.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::config::{ExperimentConfig, FeatureMode};
use crate::error::{ArhdError, Result};

/// Immutable `(N, D)` series of `f32` rows on a device.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    values: Tensor,
}

impl TimeSeries {
    /// Wrap a rank-2 tensor. Values are converted to `f32`.
    pub fn new(values: Tensor) -> Result<Self> {
        if values.rank() != 2 {
            return Err(ArhdError::shape_mismatch(
                "(N, D)",
                format!("{:?}", values.dims()),
            ));
        }
        let values = values.to_dtype(DType::F32)?;
        Ok(Self { values })
    }

    /// Build from row-major rows. Every row must have the same width.
    pub fn from_rows(rows: &[Vec<f32>], device: &Device) -> Result<Self> {
        let channels = rows.first().map_or(0, Vec::len);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != channels) {
            return Err(ArhdError::Dataset(format!(
                "row {i} has {} values, expected {channels}",
                row.len()
            )));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self::new(Tensor::from_vec(flat, (rows.len(), channels), device)?)
    }

    /// Number of time steps N.
    pub fn len(&self) -> usize {
        self.values.dims()[0]
    }

    /// True when the series has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels D.
    pub fn channels(&self) -> usize {
        self.values.dims()[1]
    }

    /// Device the values live on.
    pub fn device(&self) -> &Device {
        self.values.device()
    }

    /// Row `i` as a `(D,)` tensor.
    pub fn row(&self, i: usize) -> Result<Tensor> {
        if i >= self.len() {
            return Err(ArhdError::IndexOutOfBounds {
                idx: i,
                min: 0,
                max: self.len().saturating_sub(1),
            });
        }
        Ok(self.values.get(i)?)
    }

    /// Rows `start..end` as a `(end - start, D)` tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Tensor> {
        if start > end || end > self.len() {
            return Err(ArhdError::Dataset(format!(
                "row range {start}..{end} outside series of length {}",
                self.len()
            )));
        }
        Ok(self.values.narrow(0, start, end - start)?)
    }

    /// The underlying `(N, D)` tensor.
    pub fn as_tensor(&self) -> &Tensor {
        &self.values
    }

    /// Copy the values back to host rows.
    pub fn to_rows(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.values.to_vec2::<f32>()?)
    }
}

/// Anything that exposes a series for the online loop.
pub trait DataProvider {
    /// The `(N, D)` array the loop slides over.
    fn data_x(&self) -> &TimeSeries;
}

impl DataProvider for TimeSeries {
    fn data_x(&self) -> &TimeSeries {
        self
    }
}

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Training rows
    Train,
    /// Validation rows
    Val,
    /// Held-out test rows
    Test,
}

impl Split {
    fn index(self) -> usize {
        match self {
            Split::Train => 0,
            Split::Val => 1,
            Split::Test => 2,
        }
    }
}

/// Per-column standardization.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    ///
    /// Constant columns get a unit scale.
    pub fn fit(rows: &[Vec<f32>]) -> Result<Self> {
        let n = rows.len();
        let channels = rows.first().map_or(0, Vec::len);
        if n == 0 || channels == 0 {
            return Err(ArhdError::Dataset("cannot fit scaler on empty data".into()));
        }

        let mut mean = vec![0f64; channels];
        for row in rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n as f64);

        let mut var = vec![0f64; channels];
        for row in rows {
            for ((s, &v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v as f64 - m).powi(2);
            }
        }

        let std = var
            .iter()
            .map(|s| {
                let sd = (s / n as f64).sqrt();
                if sd > 0.0 {
                    sd as f32
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        })
    }

    /// Standardize rows.
    pub fn transform(&self, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(self.mean.iter().zip(&self.std))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect()
    }

    /// Undo [`StandardScaler::transform`].
    pub fn inverse_transform(&self, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(self.mean.iter().zip(&self.std))
                    .map(|(v, (m, s))| v * s + m)
                    .collect()
            })
            .collect()
    }

    /// Column means.
    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// Column standard deviations.
    pub fn std(&self) -> &[f32] {
        &self.std
    }
}

/// How the rows of a file are divided into train/val/test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BorderScheme {
    /// 12/4/4 months of hourly data
    Hourly,
    /// 12/4/4 months of 15-minute data
    QuarterHourly,
    /// 70/10/20 percent of the rows
    Ratio,
}

impl BorderScheme {
    fn for_data(name: &str) -> Self {
        if name.starts_with("ETTh") {
            Self::Hourly
        } else if name.starts_with("ETTm") {
            Self::QuarterHourly
        } else {
            Self::Ratio
        }
    }

    /// Start and end rows of each split. Val and test start `seq_len`
    /// rows early so their first anchor has a full window.
    fn borders(self, n: usize, seq_len: usize) -> ([usize; 3], [usize; 3]) {
        let (train_end, val_end, test_end) = match self {
            Self::Hourly | Self::QuarterHourly => {
                let month = if self == Self::Hourly { 30 * 24 } else { 30 * 24 * 4 };
                (12 * month, 16 * month, 20 * month)
            }
            Self::Ratio => {
                let num_train = (n as f64 * 0.7) as usize;
                let num_test = (n as f64 * 0.2) as usize;
                let num_val = n - num_train - num_test;
                (num_train, num_train + num_val, n)
            }
        };
        let clip = |v: usize| v.min(n);
        let starts = [
            0,
            clip(train_end.saturating_sub(seq_len)),
            clip(val_end.saturating_sub(seq_len)),
        ];
        let ends = [clip(train_end), clip(val_end), clip(test_end)];
        (starts, ends)
    }
}

/// A split of a CSV file with a leading timestamp column.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    data: TimeSeries,
    columns: Vec<String>,
    split: Split,
    scaler: Option<StandardScaler>,
    rows: (usize, usize),
}

impl CsvDataset {
    /// Load one split of `config.data_file()` onto `device`.
    pub fn load(config: &ExperimentConfig, split: Split, device: &Device) -> Result<Self> {
        let path = config.data_file();
        let (header, records) = read_csv(&path)?;
        let columns = select_columns(config, &header)?;
        let indices: Vec<usize> = columns
            .iter()
            .map(|name| header.iter().position(|h| h == name))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ArhdError::Dataset("selected column missing from header".into()))?;

        let all_rows: Vec<Vec<f32>> = records
            .iter()
            .map(|record| indices.iter().map(|&i| record[i]).collect())
            .collect();

        let n = all_rows.len();
        let scheme = BorderScheme::for_data(&config.data);
        let (starts, ends) = scheme.borders(n, config.seq_len);
        let (start, end) = (starts[split.index()], ends[split.index()]);
        if start >= end {
            return Err(ArhdError::Dataset(format!(
                "{split:?} split of {} is empty ({n} rows)",
                path.display()
            )));
        }

        let scaler = if config.scale {
            Some(StandardScaler::fit(&all_rows[starts[0]..ends[0]])?)
        } else {
            None
        };

        let selected = &all_rows[start..end];
        let values = match &scaler {
            Some(scaler) => scaler.transform(selected),
            None => selected.to_vec(),
        };

        tracing::info!(
            "Loaded {:?} split of {}: rows {}..{} x {} columns",
            split,
            path.display(),
            start,
            end,
            columns.len()
        );

        Ok(Self {
            data: TimeSeries::from_rows(&values, device)?,
            columns,
            split,
            scaler,
            rows: (start, end),
        })
    }

    /// Column names, in model channel order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Which split this is.
    pub fn split(&self) -> Split {
        self.split
    }

    /// Row range of the file covered by this split.
    pub fn row_range(&self) -> (usize, usize) {
        self.rows
    }

    /// Scaler fitted on the train split, if scaling is enabled.
    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    /// Map model-space rows back to the original units.
    pub fn inverse_transform(&self, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        match &self.scaler {
            Some(scaler) => scaler.inverse_transform(rows),
            None => rows.to_vec(),
        }
    }
}

impl DataProvider for CsvDataset {
    fn data_x(&self) -> &TimeSeries {
        &self.data
    }
}

/// Columns fed to the model: explicit `cols` (or every non-date column
/// except the target) followed by the target.
fn select_columns(config: &ExperimentConfig, header: &[String]) -> Result<Vec<String>> {
    let data_columns: Vec<&String> = header.iter().skip(1).collect();
    let has_target = data_columns.iter().any(|c| **c == config.target);

    if config.features == FeatureMode::S {
        if !has_target {
            return Err(ArhdError::Dataset(format!(
                "target column '{}' not found",
                config.target
            )));
        }
        return Ok(vec![config.target.clone()]);
    }

    let mut columns: Vec<String> = match &config.cols {
        Some(cols) => {
            if let Some(missing) = cols.iter().find(|c| !data_columns.contains(c)) {
                return Err(ArhdError::Dataset(format!("column '{missing}' not found")));
            }
            cols.iter().filter(|c| **c != config.target).cloned().collect()
        }
        None => data_columns
            .iter()
            .filter(|c| ***c != config.target)
            .map(|c| (*c).clone())
            .collect(),
    };

    if has_target {
        columns.push(config.target.clone());
    } else if config.features == FeatureMode::MS {
        return Err(ArhdError::Dataset(format!(
            "target column '{}' not found",
            config.target
        )));
    }

    if columns.is_empty() {
        return Err(ArhdError::Dataset("no data columns selected".into()));
    }
    Ok(columns)
}

/// Read the header and numeric records. The first column is skipped.
fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<f32>>)> {
    let file = File::open(path).map_err(|e| {
        ArhdError::Dataset(format!("cannot open {}: {}", path.display(), e))
    })?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if header.len() < 2 {
        return Err(ArhdError::Dataset(format!(
            "{} needs a timestamp column and at least one value column",
            path.display()
        )));
    }

    let mut records = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut values = vec![f32::NAN];
        for (col, field) in record.iter().enumerate().skip(1) {
            let value = field.trim().parse::<f32>().map_err(|_| {
                ArhdError::Dataset(format!(
                    "row {} column '{}': cannot parse '{}' as a number",
                    line + 1,
                    header[col],
                    field
                ))
            })?;
            values.push(value);
        }
        records.push(values);
    }

    if records.is_empty() {
        return Err(ArhdError::Dataset(format!("{} has no rows", path.display())));
    }
    Ok((header, records))
}
