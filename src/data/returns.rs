//! # Daily Returns
//!
//! $$
//! r_t=\frac{P_t}{P_{t-1}}-1
//! $$
//!
//! Returns are computed inside each symbol's own chronological sequence;
//! the first observation of every symbol has no return and is dropped.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;
use tracing::warn;

use super::table::PriceHistory;
use super::table::ReturnHistory;
use super::table::ReturnObservation;
use crate::error::PipelineError;
use crate::error::Result;

/// Simple returns of a price series. The output is one shorter than the input.
pub fn pct_change(prices: &[f64]) -> Vec<f64> {
  prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Per-symbol daily returns of a long price history.
///
/// Non-positive or non-finite prices are skipped before differencing, so a
/// return always spans two valid consecutive observations of one symbol.
pub fn daily_returns(prices: &PriceHistory) -> Result<ReturnHistory> {
  let mut by_symbol: BTreeMap<&str, Vec<(NaiveDate, f64)>> = BTreeMap::new();
  let mut skipped = 0usize;
  for o in prices.observations() {
    if !(o.close.is_finite() && o.close > 0.0) {
      skipped += 1;
      continue;
    }
    by_symbol.entry(o.symbol.as_str()).or_default().push((o.date, o.close));
  }
  if skipped > 0 {
    warn!("Skipped {skipped} non-positive or non-finite prices");
  }

  let mut out = Vec::with_capacity(prices.len());
  for (symbol, mut series) in by_symbol {
    series.sort_by_key(|(date, _)| *date);
    if let Some(w) = series.windows(2).find(|w| w[0].0 == w[1].0) {
      return Err(PipelineError::InvalidInput(format!(
        "duplicate price for '{symbol}' on {}",
        w[0].0
      )));
    }
    let closes: Vec<f64> = series.iter().map(|(_, p)| *p).collect();
    for ((date, close), r) in series.iter().skip(1).zip(pct_change(&closes)) {
      out.push(ReturnObservation {
        symbol: symbol.to_string(),
        date: *date,
        close: *close,
        daily_return: r,
      });
    }
  }

  debug!("Computed {} daily returns from {} prices", out.len(), prices.len());
  Ok(ReturnHistory::new(out))
}
