//! # Dataset Merger
//!
//! $$
//! \mathcal M=\{(s,t,\mathbf f_s,P_{s,t},r_{s,t})\ :\ s\in S_{\text{fund}}\cap S_{\text{price}}\}
//! $$
//!
//! Long price/return rows inner-joined with static per-symbol features.

use std::collections::BTreeSet;
use std::collections::HashMap;

use tracing::info;

use super::returns::daily_returns;
use super::table::FundamentalsRow;
use super::table::FundamentalsTable;
use super::table::MergedTable;
use super::table::PriceHistory;
use super::table::ReturnHistory;
use super::table::SymbolRecord;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Compute daily returns from `prices` and join them with `fundamentals`.
pub fn merge_datasets(fundamentals: &FundamentalsTable, prices: &PriceHistory) -> Result<MergedTable> {
  let returns = daily_returns(prices)?;
  merge_returns(fundamentals, &returns)
}

/// Inner join of precomputed daily returns with `fundamentals` on symbol.
///
/// Output rows are ordered by `(symbol, date)`. Missing feature values are
/// left as `NaN`; see [`MergedTable::impute_medians`].
pub fn merge_returns(fundamentals: &FundamentalsTable, returns: &ReturnHistory) -> Result<MergedTable> {
  let by_symbol: HashMap<&str, &FundamentalsRow> = fundamentals
    .rows()
    .iter()
    .map(|r| (r.symbol.as_str(), r))
    .collect();

  let records: Vec<SymbolRecord> = returns
    .observations()
    .iter()
    .filter_map(|o| {
      by_symbol.get(o.symbol.as_str()).map(|row| SymbolRecord {
        symbol: o.symbol.clone(),
        date: o.date,
        features: row.values.clone(),
        closing_price: o.close,
        daily_return: o.daily_return,
      })
    })
    .collect();

  let price_symbols: BTreeSet<&str> = returns.observations().iter().map(|o| o.symbol.as_str()).collect();
  let merged_symbols: BTreeSet<&str> = records.iter().map(|r| r.symbol.as_str()).collect();

  if records.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Merge,
      "no symbol has both fundamentals and returns",
      0,
      0,
    ));
  }

  info!(
    rows = records.len(),
    symbols = merged_symbols.len(),
    price_only = price_symbols.len() - merged_symbols.len(),
    fundamentals_only = fundamentals.len() - merged_symbols.len(),
    "Merged fundamentals with daily returns"
  );

  Ok(MergedTable::new(fundamentals.columns().to_vec(), records))
}
