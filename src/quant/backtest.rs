//! # Backtest Engine
//!
//! $$
//! V_t=\prod_{s\le t}\left(1+\mathbf w^\top\mathbf r_s\right),\qquad
//! \mathrm{CAGR}=\left(V_T^{\,365.25/D}-1\right)\cdot 100
//! $$
//!
//! Static-weight backtest against a benchmark index. Portfolio and benchmark
//! are each compounded over their own full series, then read off on their
//! common dates and rebased to the level just before the first of them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use ndarray::Array1;
use tracing::info;
use tracing::warn;

use super::portfolio::PortfolioWeights;
use crate::config::BacktestConfig;
use crate::data::pct_change;
use crate::data::ReturnHistory;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

const DAYS_PER_YEAR: f64 = 365.25;

/// Benchmark index closes.
#[derive(Clone, Debug, Default)]
pub struct BenchmarkSeries {
  points: Vec<(NaiveDate, f64)>,
}

impl BenchmarkSeries {
  pub fn new(mut points: Vec<(NaiveDate, f64)>) -> Self {
    points.sort_by_key(|(d, _)| *d);
    Self { points }
  }

  pub fn points(&self) -> &[(NaiveDate, f64)] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Daily returns of the index, dated by the later close.
  pub fn daily_returns(&self) -> Result<Vec<(NaiveDate, f64)>> {
    let valid: Vec<(NaiveDate, f64)> = self
      .points
      .iter()
      .copied()
      .filter(|(_, p)| p.is_finite() && *p > 0.0)
      .collect();
    if valid.len() < self.points.len() {
      warn!(
        "Skipped {} non-positive benchmark closes",
        self.points.len() - valid.len()
      );
    }
    if let Some(w) = valid.windows(2).find(|w| w[0].0 == w[1].0) {
      return Err(PipelineError::InvalidInput(format!(
        "duplicate benchmark close on {}",
        w[0].0
      )));
    }
    let closes: Vec<f64> = valid.iter().map(|(_, p)| *p).collect();
    Ok(
      valid
        .iter()
        .skip(1)
        .map(|(d, _)| *d)
        .zip(pct_change(&closes))
        .collect(),
    )
  }
}

/// Compound annual growth rate in percent over `elapsed_days` calendar days.
pub fn cagr(final_value: f64, elapsed_days: f64) -> f64 {
  (final_value.powf(DAYS_PER_YEAR / elapsed_days) - 1.0) * 100.0
}

/// Date-ordered compounding factors `∏(1 + r)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CumulativeReturnSeries {
  pub dates: Vec<NaiveDate>,
  pub values: Vec<f64>,
}

impl CumulativeReturnSeries {
  pub fn from_returns(dates: Vec<NaiveDate>, returns: &[f64]) -> Self {
    let values = returns
      .iter()
      .scan(1.0, |acc, r| {
        *acc *= 1.0 + r;
        Some(*acc)
      })
      .collect();
    Self { dates, values }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn final_value(&self) -> Option<f64> {
    self.values.last().copied()
  }

  /// Calendar days between the first and the last date.
  pub fn elapsed_days(&self) -> i64 {
    match (self.dates.first(), self.dates.last()) {
      (Some(a), Some(b)) => (*b - *a).num_days(),
      _ => 0,
    }
  }

  pub fn cagr(&self) -> Result<f64> {
    let days = self.elapsed_days();
    let final_value = self.final_value().unwrap_or(f64::NAN);
    if days <= 0 || !final_value.is_finite() {
      return Err(PipelineError::degenerate(
        Stage::Backtest,
        "CAGR needs a finite final value over a positive number of days",
        0,
        self.dates.len(),
      ));
    }
    Ok(cagr(final_value, days as f64))
  }
}

#[derive(Clone, Debug)]
pub struct BacktestReport {
  pub portfolio: CumulativeReturnSeries,
  pub benchmark: CumulativeReturnSeries,
  pub portfolio_cagr: f64,
  pub benchmark_cagr: f64,
  /// Portfolio dates dropped for a missing return of a held symbol.
  pub incomplete_dates: usize,
}

/// Daily returns of a static portfolio, over the dates on which every held
/// symbol has a return. Also returns how many dates were dropped.
pub fn portfolio_daily_returns(
  weights: &PortfolioWeights,
  returns: &ReturnHistory,
) -> Result<(Vec<(NaiveDate, f64)>, usize)> {
  if weights.is_empty() {
    return Err(PipelineError::alignment(Stage::Backtest, "no weighted symbol", 0, 0));
  }
  let held: BTreeSet<String> = weights.symbols().into_iter().collect();
  let panel = returns.pivot(Some(&held))?;

  let missing: Vec<&String> = held.iter().filter(|s| !panel.symbols.contains(s)).collect();
  if !missing.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Backtest,
      format!("weighted symbols without return history: {missing:?}"),
      missing.len(),
      panel.dates.len(),
    ));
  }

  let complete = panel.complete_rows();
  let dropped = panel.dates.len() - complete.dates.len();
  if dropped > 0 {
    warn!(dropped, "Dropped portfolio dates with a missing return");
  }

  let w: Array1<f64> = complete
    .symbols
    .iter()
    .map(|s| weights.get(s).unwrap_or(0.0))
    .collect();
  let daily = complete.values.dot(&w);
  Ok((complete.dates.into_iter().zip(daily.iter().copied()).collect(), dropped))
}

/// Level of a compounded return series before and after each date.
fn compound_by_date(returns: &[(NaiveDate, f64)]) -> BTreeMap<NaiveDate, (f64, f64)> {
  let mut level = 1.0;
  returns
    .iter()
    .map(|(d, r)| {
      let before = level;
      level *= 1.0 + r;
      (*d, (before, level))
    })
    .collect()
}

/// Levels on `dates`, relative to the level before the first of them.
fn rebased(levels: &BTreeMap<NaiveDate, (f64, f64)>, dates: &[NaiveDate]) -> Vec<f64> {
  let base = dates
    .first()
    .and_then(|d| levels.get(d))
    .map_or(1.0, |(before, _)| *before);
  dates
    .iter()
    .filter_map(|d| levels.get(d))
    .map(|(_, after)| after / base)
    .collect()
}

/// Compound the static portfolio and the benchmark, then compare them on
/// their common dates.
pub fn run_backtest(
  weights: &PortfolioWeights,
  returns: &ReturnHistory,
  benchmark: &BenchmarkSeries,
  cfg: &BacktestConfig,
) -> Result<BacktestReport> {
  let (portfolio, incomplete_dates) = portfolio_daily_returns(weights, returns)?;
  let portfolio_levels = compound_by_date(&portfolio);
  let benchmark_levels = compound_by_date(&benchmark.daily_returns()?);

  let in_window = |d: &NaiveDate| cfg.start.map_or(true, |s| *d >= s) && cfg.end.map_or(true, |e| *d <= e);
  let dates: Vec<NaiveDate> = portfolio_levels
    .keys()
    .filter(|d| in_window(d) && benchmark_levels.contains_key(d))
    .copied()
    .collect();

  if dates.is_empty() {
    return Err(PipelineError::alignment(
      Stage::Backtest,
      "portfolio and benchmark share no date",
      weights.len(),
      0,
    ));
  }

  let portfolio = CumulativeReturnSeries {
    values: rebased(&portfolio_levels, &dates),
    dates: dates.clone(),
  };
  let benchmark = CumulativeReturnSeries {
    values: rebased(&benchmark_levels, &dates),
    dates,
  };

  let portfolio_cagr = portfolio.cagr()?;
  let benchmark_cagr = benchmark.cagr()?;

  info!(
    dates = portfolio.len(),
    from = %portfolio.dates[0],
    to = %portfolio.dates[portfolio.len() - 1],
    portfolio_cagr,
    benchmark_cagr,
    "Backtest complete"
  );

  Ok(BacktestReport {
    portfolio,
    benchmark,
    portfolio_cagr,
    benchmark_cagr,
    incomplete_dates,
  })
}
