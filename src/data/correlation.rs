//! # Feature Correlation
//!
//! $$
//! \rho_{xy}=\frac{\sum_i (x_i-\bar x)(y_i-\bar y)}{\sqrt{\sum_i (x_i-\bar x)^2\sum_i (y_i-\bar y)^2}}
//! $$
//!
//! Correlation of every fundamentals column with the ESG target columns,
//! computed over pairwise-complete observations.

use std::cmp::Ordering;

use super::table::FundamentalsTable;
use crate::error::PipelineError;
use crate::error::Result;

/// Correlations of one feature with each requested target, in target order.
#[derive(Clone, Debug)]
pub struct FeatureCorrelation {
  pub feature: String,
  pub correlations: Vec<f64>,
}

/// Pearson correlation over the pairs where both values are observed.
/// `NaN` when fewer than two pairs remain or either side is constant.
pub fn pearson_complete(x: &[f64], y: &[f64]) -> f64 {
  let pairs: Vec<(f64, f64)> = x
    .iter()
    .zip(y.iter())
    .filter(|(a, b)| !a.is_nan() && !b.is_nan())
    .map(|(a, b)| (*a, *b))
    .collect();
  let n = pairs.len();
  if n < 2 {
    return f64::NAN;
  }

  let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
  let my = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;

  let mut cov = 0.0;
  let mut sx = 0.0;
  let mut sy = 0.0;
  for (a, b) in &pairs {
    let dx = a - mx;
    let dy = b - my;
    cov += dx * dy;
    sx += dx * dx;
    sy += dy * dy;
  }

  let denom = (sx * sy).sqrt();
  if denom < 1e-15 {
    f64::NAN
  } else {
    (cov / denom).clamp(-1.0, 1.0)
  }
}

/// Correlate every column with each of `targets`, sorted descending by the
/// first target (undefined correlations last).
pub fn target_correlations(table: &FundamentalsTable, targets: &[&str]) -> Result<Vec<FeatureCorrelation>> {
  if targets.is_empty() {
    return Err(PipelineError::InvalidInput("no correlation target given".into()));
  }
  let target_values = targets
    .iter()
    .map(|t| {
      table
        .column(t)
        .ok_or_else(|| PipelineError::InvalidInput(format!("missing target column '{t}'")))
    })
    .collect::<Result<Vec<Vec<f64>>>>()?;

  let mut out: Vec<FeatureCorrelation> = table
    .columns()
    .iter()
    .enumerate()
    .map(|(j, name)| {
      let x: Vec<f64> = table.rows().iter().map(|r| r.values[j]).collect();
      FeatureCorrelation {
        feature: name.clone(),
        correlations: target_values.iter().map(|y| pearson_complete(&x, y)).collect(),
      }
    })
    .collect();

  out.sort_by(|a, b| match (a.correlations[0].is_nan(), b.correlations[0].is_nan()) {
    (true, true) => Ordering::Equal,
    (true, false) => Ordering::Greater,
    (false, true) => Ordering::Less,
    (false, false) => b.correlations[0].total_cmp(&a.correlations[0]),
  });
  Ok(out)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::data::table::FundamentalsRow;

  fn table() -> FundamentalsTable {
    let rows = [
      ("A", [10.0, 1.0, 5.0, 2.0]),
      ("B", [20.0, 2.0, 4.0, f64::NAN]),
      ("C", [30.0, 3.0, 3.0, 4.0]),
      ("D", [40.0, 4.0, 2.0, 3.0]),
    ];
    FundamentalsTable::new(
      vec![
        "totalEsg".into(),
        "same".into(),
        "opposite".into(),
        "gappy".into(),
      ],
      rows
        .iter()
        .map(|(s, v)| FundamentalsRow {
          symbol: s.to_string(),
          sector: None,
          values: v.to_vec(),
        })
        .collect(),
    )
    .unwrap()
  }

  #[test]
  fn pearson_skips_incomplete_pairs() {
    let r = pearson_complete(&[1.0, 2.0, f64::NAN, 4.0], &[2.0, 4.0, 100.0, 8.0]);
    assert_abs_diff_eq!(r, 1.0, epsilon = 1e-12);
    assert!(pearson_complete(&[1.0, f64::NAN], &[1.0, 2.0]).is_nan());
    assert!(pearson_complete(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
  }

  #[test]
  fn correlations_are_sorted_by_first_target() {
    let out = target_correlations(&table(), &["totalEsg"]).unwrap();
    let names: Vec<&str> = out.iter().map(|c| c.feature.as_str()).collect();
    assert!(names[..2].contains(&"totalEsg") && names[..2].contains(&"same"));
    assert_eq!(names[2], "gappy");
    assert_eq!(*names.last().unwrap(), "opposite");
    assert_abs_diff_eq!(out.last().unwrap().correlations[0], -1.0, epsilon = 1e-12);
  }

  #[test]
  fn missing_target_is_invalid_input() {
    let err = target_correlations(&table(), &["highestControversy"]).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
  }
}
