//! # Reconciliation
//!
//! $$
//! S = S_{\hat r}\cap S_\Sigma
//! $$
//!
//! Restricts predicted returns and the covariance matrix to one common,
//! ordered symbol set before the solve.

use ndarray::Array1;
use ndarray::Array2;
use tracing::info;
use tracing::warn;

use super::types::CovarianceMatrix;
use super::types::PredictedReturns;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Optimizer inputs over the common symbol set.
#[derive(Clone, Debug)]
pub struct Reconciled {
  /// Alphabetical, and the index order of `expected` and `covariance`.
  pub symbols: Vec<String>,
  pub expected: Array1<f64>,
  pub covariance: Array2<f64>,
  /// Symbols with a prediction but no covariance row.
  pub dropped_from_predictions: Vec<String>,
  /// Symbols with a covariance row but no prediction.
  pub dropped_from_covariance: Vec<String>,
}

pub fn reconcile(predicted: &PredictedReturns, covariance: &CovarianceMatrix) -> Result<Reconciled> {
  let mut symbols = Vec::new();
  let mut dropped_from_predictions = Vec::new();
  for s in predicted.symbols() {
    if covariance.index_of(&s).is_some() {
      symbols.push(s);
    } else {
      dropped_from_predictions.push(s);
    }
  }
  let dropped_from_covariance: Vec<String> = covariance
    .symbols
    .iter()
    .filter(|s| predicted.get(s).is_none())
    .cloned()
    .collect();

  if !dropped_from_predictions.is_empty() || !dropped_from_covariance.is_empty() {
    warn!(
      "Reconciliation dropped {:?} (no covariance) and {:?} (no prediction)",
      dropped_from_predictions, dropped_from_covariance
    );
  }

  if symbols.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Reconcile,
      "predicted returns and covariance share no symbol",
      0,
      covariance.observations,
    ));
  }

  let idx: Vec<usize> = symbols
    .iter()
    .filter_map(|s| covariance.index_of(s))
    .collect();
  let expected: Array1<f64> = symbols.iter().filter_map(|s| predicted.get(s)).collect();
  let covariance = Array2::from_shape_fn((idx.len(), idx.len()), |(i, j)| covariance.values[[idx[i], idx[j]]]);

  info!(symbols = symbols.len(), "Reconciled predictions with covariance");

  Ok(Reconciled {
    symbols,
    expected,
    covariance,
    dropped_from_predictions,
    dropped_from_covariance,
  })
}
