//! # Median Imputation
//!
//! $$
//! \tilde x_{ij}=\begin{cases}x_{ij}&x_{ij}\ \text{observed}\\ \operatorname{median}_k x_{kj}&\text{otherwise}\end{cases}
//! $$
//!

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::QuantileExt;
use noisy_float::types::n64;
use tracing::warn;

use crate::error::PipelineError;
use crate::error::Result;

/// Per-column medians fit once and reused on any matrix of the same width.
#[derive(Clone, Debug, PartialEq)]
pub struct MedianImputer {
  medians: Vec<f64>,
}

impl MedianImputer {
  /// Medians of the observed (non-NaN) cells of each column. A column with no
  /// observed cell gets 0.0.
  pub fn fit(data: &Array2<f64>) -> Self {
    let medians = data
      .axis_iter(Axis(1))
      .enumerate()
      .map(|(j, col)| {
        median(col.to_vec()).unwrap_or_else(|| {
          warn!("feature column {j} has no observed value, imputing 0.0");
          0.0
        })
      })
      .collect();
    Self { medians }
  }

  pub fn from_medians(medians: Vec<f64>) -> Self {
    Self { medians }
  }

  pub fn medians(&self) -> &[f64] {
    &self.medians
  }

  pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
    if data.ncols() != self.medians.len() {
      return Err(PipelineError::InvalidInput(format!(
        "imputer fit on {} columns, got {}",
        self.medians.len(),
        data.ncols()
      )));
    }
    let mut out = data.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
      for (v, m) in row.iter_mut().zip(&self.medians) {
        if v.is_nan() {
          *v = *m;
        }
      }
    }
    Ok(out)
  }
}

/// Median of the non-NaN values, `None` when there is none.
pub(crate) fn median(xs: Vec<f64>) -> Option<f64> {
  Array1::from(xs)
    .quantile_axis_skipnan_mut(Axis(0), n64(0.5), &Midpoint)
    .ok()
    .map(|m| m.into_scalar())
    .filter(|m| !m.is_nan())
}

#[cfg(test)]
mod tests {
  use ndarray::array;

  use super::*;

  #[test]
  fn median_of_odd_and_even_samples() {
    assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
    assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), Some(2.5));
    assert_eq!(median(vec![f64::NAN, 4.0, 1.0, f64::NAN]), Some(2.5));
    assert_eq!(median(vec![f64::NAN]), None);
    assert_eq!(median(Vec::new()), None);
  }

  #[test]
  fn fit_ignores_missing_cells() {
    let x = array![[1.0, f64::NAN], [f64::NAN, f64::NAN], [5.0, f64::NAN], [3.0, f64::NAN]];
    let imputer = MedianImputer::fit(&x);
    assert_eq!(imputer.medians(), &[3.0, 0.0]);

    let filled = imputer.transform(&x).unwrap();
    assert_eq!(filled[[1, 0]], 3.0);
    assert_eq!(filled[[0, 0]], 1.0);
    assert!(filled.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn statistics_are_reused_not_refit() {
    let train = array![[1.0], [2.0], [3.0]];
    let imputer = MedianImputer::fit(&train);
    let unseen = array![[f64::NAN], [100.0], [f64::NAN]];
    let filled = imputer.transform(&unseen).unwrap();
    assert_eq!(filled.column(0).to_vec(), vec![2.0, 100.0, 2.0]);
  }

  #[test]
  fn transform_rejects_width_mismatch() {
    let imputer = MedianImputer::from_medians(vec![0.0, 1.0]);
    assert!(imputer.transform(&array![[1.0]]).is_err());
  }
}
