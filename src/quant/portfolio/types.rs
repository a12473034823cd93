//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta} \ \hat{\mathbf r}^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! $$
//!
//! Value objects exchanged between the predictor, the risk model, the
//! optimizer and the backtest.

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Expected daily return per symbol.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredictedReturns {
  by_symbol: BTreeMap<String, f64>,
}

impl PredictedReturns {
  pub fn new(by_symbol: BTreeMap<String, f64>) -> Self {
    Self { by_symbol }
  }

  /// Average row-level predictions per symbol.
  pub fn from_rows(symbols: &[&str], predictions: &[f64]) -> Result<Self> {
    if symbols.len() != predictions.len() {
      return Err(PipelineError::InvalidInput(format!(
        "{} symbols for {} predictions",
        symbols.len(),
        predictions.len()
      )));
    }
    let mut acc: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for (s, p) in symbols.iter().zip(predictions) {
      let e = acc.entry(*s).or_insert((0.0, 0));
      e.0 += p;
      e.1 += 1;
    }
    Ok(Self {
      by_symbol: acc
        .into_iter()
        .map(|(s, (sum, n))| (s.to_string(), sum / n as f64))
        .collect(),
    })
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    self.by_symbol.get(symbol).copied()
  }

  pub fn len(&self) -> usize {
    self.by_symbol.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_symbol.is_empty()
  }

  pub fn symbols(&self) -> Vec<String> {
    self.by_symbol.keys().cloned().collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.by_symbol.iter().map(|(s, v)| (s.as_str(), *v))
  }
}

/// Sample covariance of daily returns, indexed symbol × symbol.
#[derive(Clone, Debug)]
pub struct CovarianceMatrix {
  pub symbols: Vec<String>,
  pub values: Array2<f64>,
  /// Dates in the estimation window.
  pub observations: usize,
  /// Symbols left out for having gaps in the window.
  pub excluded: Vec<String>,
}

impl CovarianceMatrix {
  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  pub fn index_of(&self, symbol: &str) -> Option<usize> {
    self.symbols.iter().position(|s| s == symbol)
  }

  pub fn get(&self, a: &str, b: &str) -> Option<f64> {
    Some(self.values[[self.index_of(a)?, self.index_of(b)?]])
  }
}

/// Long-only weights summing to one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioWeights {
  by_symbol: BTreeMap<String, f64>,
}

impl PortfolioWeights {
  pub fn from_pairs(symbols: &[String], weights: &[f64]) -> Self {
    Self {
      by_symbol: symbols.iter().cloned().zip(weights.iter().copied()).collect(),
    }
  }

  /// Equal weight over `symbols`, the unoptimized baseline.
  pub fn equal(symbols: &[String]) -> Result<Self> {
    if symbols.is_empty() {
      return Err(PipelineError::alignment(
        Stage::Allocate,
        "equal-weight baseline over an empty universe",
        0,
        0,
      ));
    }
    let w = 1.0 / symbols.len() as f64;
    Ok(Self {
      by_symbol: symbols.iter().map(|s| (s.clone(), w)).collect(),
    })
  }

  pub fn get(&self, symbol: &str) -> Option<f64> {
    self.by_symbol.get(symbol).copied()
  }

  pub fn len(&self) -> usize {
    self.by_symbol.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_symbol.is_empty()
  }

  pub fn sum(&self) -> f64 {
    self.by_symbol.values().sum()
  }

  pub fn symbols(&self) -> Vec<String> {
    self.by_symbol.keys().cloned().collect()
  }

  /// Symbols in alphabetical order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.by_symbol.iter().map(|(s, w)| (s.as_str(), *w))
  }

  /// Heaviest first, ties broken by symbol.
  pub fn sorted_desc(&self) -> Vec<(&str, f64)> {
    let mut out: Vec<(&str, f64)> = self.iter().collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
    out
  }
}

/// Output of one mean-variance solve.
#[derive(Clone, Debug, Default)]
pub struct AllocationResult {
  pub weights: PortfolioWeights,
  /// `rᵀw` in daily return units.
  pub expected_return: f64,
  /// `wᵀΣw`.
  pub variance: f64,
  pub volatility: f64,
  /// `rᵀw − λ·wᵀΣw` at the solution.
  pub objective: f64,
  pub iterations: usize,
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn predictions_are_averaged_per_symbol() {
    let p = PredictedReturns::from_rows(&["B", "A", "B", "A", "A"], &[0.02, 0.01, 0.04, 0.02, 0.03]).unwrap();
    assert_eq!(p.symbols(), vec!["A", "B"]);
    assert_abs_diff_eq!(p.get("A").unwrap(), 0.02, epsilon = 1e-12);
    assert_abs_diff_eq!(p.get("B").unwrap(), 0.03, epsilon = 1e-12);
    assert!(PredictedReturns::from_rows(&["A"], &[]).is_err());
  }

  #[test]
  fn weights_sort_descending_with_stable_ties() {
    let w = PortfolioWeights::from_pairs(
      &["C".into(), "A".into(), "B".into()],
      &[0.25, 0.25, 0.5],
    );
    let order: Vec<&str> = w.sorted_desc().into_iter().map(|(s, _)| s).collect();
    assert_eq!(order, vec!["B", "A", "C"]);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn equal_weights_cover_the_universe() {
    let w = PortfolioWeights::equal(&["X".into(), "Y".into(), "Z".into(), "W".into()]).unwrap();
    assert_eq!(w.len(), 4);
    assert!(w.iter().all(|(_, v)| v == 0.25));
    assert!(matches!(
      PortfolioWeights::equal(&[]),
      Err(PipelineError::DataAlignment { .. })
    ));
  }
}
