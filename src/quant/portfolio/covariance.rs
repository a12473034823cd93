//! # Covariance Estimator
//!
//! $$
//! \hat\Sigma_{ij}=\frac{1}{T-1}\sum_{t=1}^{T}(r_{t,i}-\bar r_i)(r_{t,j}-\bar r_j)
//! $$
//!
//! Sample covariance over the symbols observed on every date of the window.
//! Symbols with gaps are excluded, never imputed.

use ndarray_stats::CorrelationExt;
use tracing::info;
use tracing::warn;

use super::types::CovarianceMatrix;
use crate::config::CovarianceConfig;
use crate::data::ReturnHistory;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Estimate the symbol × symbol covariance of daily returns.
///
/// Fails with [`PipelineError::DataAlignment`] when the window is empty and
/// with [`PipelineError::NumericDegeneracy`] when fewer than two complete
/// symbols or fewer than two dates remain.
pub fn estimate_covariance(returns: &ReturnHistory, cfg: &CovarianceConfig) -> Result<CovarianceMatrix> {
  let panel = returns.pivot(None)?.within(cfg.start, cfg.end);
  if panel.dates.is_empty() || panel.symbols.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Covariance,
      "no returns inside the estimation window",
      panel.symbols.len(),
      panel.dates.len(),
    ));
  }

  let complete = panel.complete_columns();
  let excluded: Vec<String> = panel
    .symbols
    .iter()
    .filter(|s| !complete.symbols.contains(s))
    .cloned()
    .collect();
  if !excluded.is_empty() {
    warn!(
      excluded = excluded.len(),
      kept = complete.symbols.len(),
      "Dropped symbols with missing returns in the covariance window: {:?}",
      excluded
    );
  }

  let (n_dates, n_symbols) = complete.values.dim();
  if n_symbols < 2 || n_dates < 2 {
    return Err(PipelineError::degenerate(
      Stage::Covariance,
      "need at least two complete symbols over at least two dates",
      n_symbols,
      n_dates,
    ));
  }

  let values = complete
    .values
    .t()
    .cov(1.0)
    .map_err(|e| PipelineError::degenerate(Stage::Covariance, e.to_string(), n_symbols, n_dates))?;
  if values.iter().any(|v| !v.is_finite()) {
    return Err(PipelineError::degenerate(
      Stage::Covariance,
      "non-finite covariance entry",
      n_symbols,
      n_dates,
    ));
  }

  info!(
    symbols = n_symbols,
    dates = n_dates,
    "Estimated sample covariance"
  );

  Ok(CovarianceMatrix {
    symbols: complete.symbols,
    values,
    observations: n_dates,
    excluded,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;

  use super::*;
  use crate::data::ReturnObservation;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 2, day).unwrap()
  }

  fn history(series: &[(&str, &[(u32, f64)])]) -> ReturnHistory {
    ReturnHistory::new(
      series
        .iter()
        .flat_map(|(s, points)| {
          points.iter().map(move |(day, r)| ReturnObservation {
            symbol: s.to_string(),
            date: d(*day),
            close: 1.0,
            daily_return: *r,
          })
        })
        .collect(),
    )
  }

  #[test]
  fn sample_covariance_uses_unbiased_denominator() {
    let h = history(&[
      ("AAA", &[(1, 0.01), (2, 0.03), (3, -0.01)]),
      ("BBB", &[(1, 0.02), (2, 0.06), (3, -0.02)]),
    ]);
    let cov = estimate_covariance(&h, &CovarianceConfig::default()).unwrap();
    // var(AAA) = ((0)^2 + 0.02^2 + 0.02^2) / 2
    assert_abs_diff_eq!(cov.get("AAA", "AAA").unwrap(), 0.0004, epsilon = 1e-12);
    assert_abs_diff_eq!(cov.get("BBB", "BBB").unwrap(), 0.0016, epsilon = 1e-12);
    assert_abs_diff_eq!(cov.get("AAA", "BBB").unwrap(), 0.0008, epsilon = 1e-12);
    assert_abs_diff_eq!(cov.values[[0, 1]], cov.values[[1, 0]], epsilon = 0.0);
    assert_eq!(cov.observations, 3);
  }

  #[test]
  fn symbols_with_gaps_are_excluded() {
    let h = history(&[
      ("AAA", &[(1, 0.01), (2, 0.02), (3, 0.00), (4, -0.01)]),
      ("BBB", &[(1, 0.02), (2, -0.01), (3, 0.01), (4, 0.00)]),
      ("GAP", &[(1, 0.05), (3, 0.01), (4, 0.02)]),
      ("CCC", &[(1, -0.02), (2, 0.01), (3, 0.03), (4, 0.01)]),
    ]);
    let cov = estimate_covariance(&h, &CovarianceConfig::default()).unwrap();
    assert_eq!(cov.symbols, vec!["AAA", "BBB", "CCC"]);
    assert_eq!(cov.excluded, vec!["GAP"]);
    assert_eq!(cov.values.dim(), (3, 3));
  }

  #[test]
  fn window_restricts_dates_before_completeness() {
    let h = history(&[
      ("AAA", &[(1, 0.01), (2, 0.02), (3, 0.00), (4, -0.01)]),
      ("LATE", &[(3, 0.02), (4, 0.01)]),
      ("BBB", &[(1, 0.02), (2, -0.01), (3, 0.01), (4, 0.00)]),
    ]);
    let cfg = CovarianceConfig {
      start: Some(d(3)),
      end: None,
    };
    let cov = estimate_covariance(&h, &cfg).unwrap();
    assert_eq!(cov.symbols, vec!["AAA", "BBB", "LATE"]);
    assert_eq!(cov.observations, 2);
  }

  #[test]
  fn single_complete_symbol_is_degenerate() {
    let h = history(&[
      ("AAA", &[(1, 0.01), (2, 0.02)]),
      ("GAP", &[(2, 0.03)]),
    ]);
    let err = estimate_covariance(&h, &CovarianceConfig::default()).unwrap_err();
    assert!(matches!(
      err,
      PipelineError::NumericDegeneracy {
        stage: Stage::Covariance,
        symbols: 1,
        dates: 2,
        ..
      }
    ));
  }

  #[test]
  fn empty_window_is_alignment_error() {
    let h = history(&[("AAA", &[(1, 0.01), (2, 0.02)])]);
    let cfg = CovarianceConfig {
      start: Some(d(20)),
      end: None,
    };
    assert!(matches!(
      estimate_covariance(&h, &cfg),
      Err(PipelineError::DataAlignment { .. })
    ));
  }
}
