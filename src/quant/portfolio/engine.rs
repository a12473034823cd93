//! # Allocation Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}\big(\operatorname{Reconcile}(\hat{\mathbf r}, \Sigma)\big)
//! $$
//!
//! Entry point that reconciles the two optimizer inputs, enforces the
//! minimum universe and runs the solve.

use super::optimizer::optimize_mean_variance;
use super::reconcile::reconcile;
use super::reconcile::Reconciled;
use super::types::AllocationResult;
use super::types::CovarianceMatrix;
use super::types::PredictedReturns;
use crate::config::AllocationConfig;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Reconciled inputs together with the solve that consumed them.
#[derive(Clone, Debug)]
pub struct Allocation {
  pub reconciled: Reconciled,
  pub result: AllocationResult,
}

#[derive(Clone, Debug, Default)]
pub struct AllocationEngine {
  config: AllocationConfig,
}

impl AllocationEngine {
  pub fn new(config: AllocationConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &AllocationConfig {
    &self.config
  }

  /// Reconcile, check the universe size, then solve.
  pub fn allocate(&self, predicted: &PredictedReturns, covariance: &CovarianceMatrix) -> Result<Allocation> {
    let reconciled = reconcile(predicted, covariance)?;
    if reconciled.symbols.len() < self.config.min_universe {
      return Err(PipelineError::degenerate(
        Stage::Allocate,
        format!(
          "reconciled universe smaller than the minimum of {}",
          self.config.min_universe
        ),
        reconciled.symbols.len(),
        covariance.observations,
      ));
    }
    let result = optimize_mean_variance(
      &reconciled.symbols,
      &reconciled.expected,
      &reconciled.covariance,
      &self.config,
    )?;
    Ok(Allocation { reconciled, result })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn covariance() -> CovarianceMatrix {
    CovarianceMatrix {
      symbols: vec!["AAA".into(), "BBB".into(), "CCC".into()],
      values: array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]],
      observations: 250,
      excluded: Vec::new(),
    }
  }

  fn predicted(pairs: &[(&str, f64)]) -> PredictedReturns {
    PredictedReturns::new(pairs.iter().map(|(s, v)| (s.to_string(), *v)).collect::<BTreeMap<_, _>>())
  }

  #[test]
  fn allocates_over_the_reconciled_universe() {
    let engine = AllocationEngine::default();
    let out = engine
      .allocate(
        &predicted(&[("AAA", 0.01), ("BBB", 0.02), ("DDD", 0.5)]),
        &covariance(),
      )
      .unwrap();
    assert_eq!(out.reconciled.symbols, vec!["AAA", "BBB"]);
    assert_eq!(out.result.weights.len(), 2);
    assert!(out.result.weights.get("DDD").is_none());
    assert_abs_diff_eq!(out.result.weights.sum(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn universe_below_minimum_is_degenerate() {
    let engine = AllocationEngine::new(AllocationConfig::default());
    let err = engine
      .allocate(&predicted(&[("CCC", 0.01)]), &covariance())
      .unwrap_err();
    assert!(matches!(
      err,
      PipelineError::NumericDegeneracy {
        stage: Stage::Allocate,
        symbols: 1,
        ..
      }
    ));

    let relaxed = AllocationEngine::new(AllocationConfig {
      min_universe: 1,
      ..AllocationConfig::default()
    });
    let out = relaxed.allocate(&predicted(&[("CCC", 0.01)]), &covariance()).unwrap();
    assert_eq!(out.result.weights.get("CCC"), Some(1.0));
  }
}
