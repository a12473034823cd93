//! # ESG Screen
//!
//! $$
//! U^\*=\{s : \mathrm{ESG}_s \ge Q_q(\mathrm{ESG}),\ \mathrm{Controversy}_s \le c_{\max}\}
//! $$
//!
//! Universe filter on `totalEsg` and `highestControversy`. The screened
//! universe also defines the equal-weight baseline portfolio.

use std::collections::BTreeSet;

use ndarray::Array1;
use ndarray::Axis;
use ndarray_stats::interpolate::Linear;
use ndarray_stats::QuantileExt;
use noisy_float::types::n64;
use tracing::info;

use crate::config::ScreenConfig;
use crate::data::FundamentalsTable;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

pub const ESG_COLUMN: &str = "totalEsg";
pub const CONTROVERSY_COLUMN: &str = "highestControversy";

/// Linearly interpolated quantile of the non-NaN values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
  if !(0.0..=1.0).contains(&q) {
    return None;
  }
  Array1::from(values.to_vec())
    .quantile_axis_skipnan_mut(Axis(0), n64(q), &Linear)
    .ok()
    .map(|v| v.into_scalar())
    .filter(|v| !v.is_nan())
}

/// Keep the symbols that pass both thresholds. Missing scores fail the screen.
pub fn esg_screen(fundamentals: &FundamentalsTable, cfg: &ScreenConfig) -> Result<FundamentalsTable> {
  let esg = fundamentals
    .column(ESG_COLUMN)
    .ok_or_else(|| PipelineError::InvalidInput(format!("screen needs a '{ESG_COLUMN}' column")))?;
  let controversy = fundamentals
    .column(CONTROVERSY_COLUMN)
    .ok_or_else(|| PipelineError::InvalidInput(format!("screen needs a '{CONTROVERSY_COLUMN}' column")))?;

  let threshold = quantile(&esg, cfg.min_esg_quantile).ok_or_else(|| {
    PipelineError::degenerate(
      Stage::Screen,
      format!("no observed '{ESG_COLUMN}' value"),
      fundamentals.len(),
      0,
    )
  })?;

  let keep: BTreeSet<String> = fundamentals
    .rows()
    .iter()
    .zip(esg.iter().zip(&controversy))
    .filter(|(_, (e, c))| **e >= threshold && **c <= cfg.max_controversy)
    .map(|(row, _)| row.symbol.clone())
    .collect();

  if keep.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Screen,
      "no symbol passes the ESG screen",
      0,
      0,
    ));
  }

  info!(
    kept = keep.len(),
    universe = fundamentals.len(),
    esg_threshold = threshold,
    max_controversy = cfg.max_controversy,
    "Applied ESG screen"
  );
  Ok(fundamentals.retain_symbols(&keep))
}
