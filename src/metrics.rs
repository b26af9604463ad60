//! Forecast metrics and running averages.
//!
//! All functions take row-major `(rows, channels)` data as `&[Vec<f32>]`,
//! the layout produced by `Tensor::to_vec2`, and accumulate in `f64`.

use serde::{Deserialize, Serialize};

/// Guard added to correlation denominators.
const CORR_EPS: f64 = 1e-12;

/// Values that can be summed elementwise and divided by a count.
pub trait Accumulate: Clone {
    /// Elementwise sum.
    fn add(&self, other: &Self) -> Self;
    /// Division of every element by `n`.
    fn div_count(&self, n: usize) -> Self;
}

impl Accumulate for f64 {
    fn add(&self, other: &Self) -> Self {
        self + other
    }
    fn div_count(&self, n: usize) -> Self {
        self / n as f64
    }
}

impl Accumulate for f32 {
    fn add(&self, other: &Self) -> Self {
        self + other
    }
    fn div_count(&self, n: usize) -> Self {
        self / n as f32
    }
}

impl Accumulate for Vec<f64> {
    fn add(&self, other: &Self) -> Self {
        self.iter().zip(other).map(|(a, b)| a + b).collect()
    }
    fn div_count(&self, n: usize) -> Self {
        self.iter().map(|v| v / n as f64).collect()
    }
}

/// Running average: element `k` is the mean of `values[0..=k]`.
///
/// ```rust
/// use arhd_online::metrics::cumavg;
///
/// assert_eq!(cumavg(&[2.0, 4.0, 6.0]), vec![2.0, 3.0, 4.0]);
/// ```
pub fn cumavg<T: Accumulate>(values: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum: Option<T> = None;
    for (k, value) in values.iter().enumerate() {
        let next = match &sum {
            Some(acc) => acc.add(value),
            None => value.clone(),
        };
        out.push(next.div_count(k + 1));
        sum = Some(next);
    }
    out
}

fn flat(rows: &[Vec<f32>]) -> impl Iterator<Item = f64> + '_ {
    rows.iter().flatten().map(|&v| v as f64)
}

fn pairs<'a>(
    pred: &'a [Vec<f32>],
    truth: &'a [Vec<f32>],
) -> impl Iterator<Item = (f64, f64)> + 'a {
    flat(pred).zip(flat(truth))
}

fn count(rows: &[Vec<f32>]) -> usize {
    rows.iter().map(Vec::len).sum()
}

/// Root relative squared error against the global mean of `truth`.
pub fn rse(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    let n = count(truth);
    if n == 0 {
        return 0.0;
    }
    let mean = flat(truth).sum::<f64>() / n as f64;
    let num: f64 = pairs(pred, truth).map(|(p, t)| (t - p).powi(2)).sum();
    let den: f64 = flat(truth).map(|t| (t - mean).powi(2)).sum();
    num.sqrt() / den.sqrt().max(CORR_EPS)
}

/// Per-channel Pearson correlation over rows, averaged across channels.
pub fn corr(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    let rows = truth.len().min(pred.len());
    let channels = truth.first().map_or(0, Vec::len);
    if rows == 0 || channels == 0 {
        return 0.0;
    }

    let mut total = 0.0;
    for c in 0..channels {
        let p_mean = (0..rows).map(|r| pred[r][c] as f64).sum::<f64>() / rows as f64;
        let t_mean = (0..rows).map(|r| truth[r][c] as f64).sum::<f64>() / rows as f64;

        let (mut cov, mut p_var, mut t_var) = (0.0, 0.0, 0.0);
        for r in 0..rows {
            let dp = pred[r][c] as f64 - p_mean;
            let dt = truth[r][c] as f64 - t_mean;
            cov += dp * dt;
            p_var += dp * dp;
            t_var += dt * dt;
        }
        total += cov / ((p_var * t_var).sqrt() + CORR_EPS);
    }
    total / channels as f64
}

/// The per-window metric pair reported by the test sweep.
pub fn metric(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> (f64, f64) {
    (rse(pred, truth), corr(pred, truth))
}

/// Mean absolute error.
pub fn mae(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    mean_of(pairs(pred, truth).map(|(p, t)| (p - t).abs()))
}

/// Mean squared error.
pub fn mse(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    mean_of(pairs(pred, truth).map(|(p, t)| (p - t).powi(2)))
}

/// Root mean squared error.
pub fn rmse(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    mse(pred, truth).sqrt()
}

/// Mean absolute percentage error. Zero targets are skipped.
pub fn mape(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    mean_of(
        pairs(pred, truth)
            .filter(|(_, t)| *t != 0.0)
            .map(|(p, t)| ((p - t) / t).abs()),
    )
}

/// Mean squared percentage error. Zero targets are skipped.
pub fn mspe(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> f64 {
    mean_of(
        pairs(pred, truth)
            .filter(|(_, t)| *t != 0.0)
            .map(|(p, t)| ((p - t) / t).powi(2)),
    )
}

fn mean_of(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Error summary over a full set of predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    /// Mean absolute error
    pub mae: f64,
    /// Mean squared error
    pub mse: f64,
    /// Root mean squared error
    pub rmse: f64,
    /// Mean absolute percentage error
    pub mape: f64,
    /// Mean squared percentage error
    pub mspe: f64,
    /// Root relative squared error
    pub rse: f64,
    /// Mean per-channel correlation
    pub corr: f64,
}

impl MetricReport {
    /// Compute every metric over `pred` and `truth`.
    pub fn compute(pred: &[Vec<f32>], truth: &[Vec<f32>]) -> Self {
        Self {
            mae: mae(pred, truth),
            mse: mse(pred, truth),
            rmse: rmse(pred, truth),
            mape: mape(pred, truth),
            mspe: mspe(pred, truth),
            rse: rse(pred, truth),
            corr: corr(pred, truth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cumavg_literal() {
        assert_eq!(cumavg(&[2.0f64, 4.0, 6.0]), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_cumavg_prefix_means() {
        let values = [1.0f64, 5.0, -3.0, 9.0, 0.5];
        let avg = cumavg(&values);
        assert_eq!(avg.len(), values.len());
        for j in 0..values.len() {
            let expected = values[..=j].iter().sum::<f64>() / (j + 1) as f64;
            assert!(close(avg[j], expected));
        }
    }

    #[test]
    fn test_cumavg_single_and_empty() {
        assert_eq!(cumavg(&[7.5f32]), vec![7.5]);
        assert!(cumavg::<f64>(&[]).is_empty());
    }

    #[test]
    fn test_cumavg_vectors() {
        let values = vec![vec![1.0, 10.0], vec![3.0, 20.0]];
        assert_eq!(cumavg(&values), vec![vec![1.0, 10.0], vec![2.0, 15.0]]);
    }

    #[test]
    fn test_perfect_prediction() {
        let truth = vec![vec![1.0f32, 4.0], vec![2.0, 5.0], vec![3.0, 7.0]];
        let (r, c) = metric(&truth, &truth);
        assert!(close(r, 0.0));
        assert!((c - 1.0).abs() < 1e-6);
        assert!(close(mae(&truth, &truth), 0.0));
    }

    #[test]
    fn test_anti_correlated_prediction() {
        let truth = vec![vec![1.0f32], vec![2.0], vec![3.0]];
        let pred = vec![vec![3.0f32], vec![2.0], vec![1.0]];
        assert!((corr(&pred, &truth) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rse_of_mean_prediction_is_one() {
        let truth = vec![vec![1.0f32], vec![3.0]];
        let pred = vec![vec![2.0f32], vec![2.0]];
        assert!(close(rse(&pred, &truth), 1.0));
    }

    #[test]
    fn test_constant_series_corr_is_zero() {
        let truth = vec![vec![1.0f32]];
        let pred = vec![vec![2.0f32]];
        assert!(close(corr(&pred, &truth), 0.0));
    }

    #[test]
    fn test_error_metrics() {
        let truth = vec![vec![1.0f32, 2.0], vec![4.0, 0.0]];
        let pred = vec![vec![2.0f32, 2.0], vec![2.0, 1.0]];
        // residuals 1, 0, -2, 1
        assert!(close(mae(&pred, &truth), 1.0));
        assert!(close(mse(&pred, &truth), 1.5));
        assert!(close(rmse(&pred, &truth), 1.5f64.sqrt()));
        // zero target skipped: |1/1|, 0, |-2/4|
        assert!(close(mape(&pred, &truth), 0.5));
        assert!(close(mspe(&pred, &truth), (1.0 + 0.0 + 0.25) / 3.0));
    }

    #[test]
    fn test_report_matches_functions() {
        let truth = vec![vec![1.0f32, 2.0], vec![2.0, 3.5], vec![0.5, 1.0]];
        let pred = vec![vec![1.5f32, 1.0], vec![2.5, 3.0], vec![0.0, 1.5]];
        let report = MetricReport::compute(&pred, &truth);
        assert!(close(report.mae, mae(&pred, &truth)));
        assert!(close(report.rse, rse(&pred, &truth)));
        assert!(close(report.corr, corr(&pred, &truth)));
    }
}
