//! # Report
//!
//! Terminal tables for weights, backtest results and feature correlations.

use prettytable::format;
use prettytable::row;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;

use crate::data::FeatureCorrelation;
use crate::quant::backtest::BacktestReport;
use crate::quant::portfolio::PortfolioWeights;

fn new_table() -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
  table
}

fn final_value(report: &BacktestReport) -> (f64, f64) {
  (
    report.portfolio.final_value().unwrap_or(f64::NAN),
    report.benchmark.final_value().unwrap_or(f64::NAN),
  )
}

/// Heaviest `top` weights, in percent.
pub fn weights_table(weights: &PortfolioWeights, top: usize) -> Table {
  let mut table = new_table();
  table.set_titles(row!["#", "Symbol", "Weight %"]);
  for (rank, (symbol, w)) in weights.sorted_desc().into_iter().take(top).enumerate() {
    table.add_row(row![r->rank + 1, symbol, r->format!("{:.2}", w * 100.0)]);
  }
  table
}

/// CAGR and final growth of the optimized portfolio, the benchmark and,
/// when given, the equal-weight baseline.
pub fn backtest_table(report: &BacktestReport, baseline: Option<&BacktestReport>) -> Table {
  let mut table = new_table();
  table.set_titles(row!["Series", "CAGR %", "Final value", "Days"]);
  let (portfolio_final, benchmark_final) = final_value(report);
  let days = report.portfolio.elapsed_days();
  table.add_row(row![
    "Optimized",
    r->format!("{:.2}", report.portfolio_cagr),
    r->format!("{portfolio_final:.4}"),
    r->days
  ]);
  if let Some(base) = baseline {
    let (base_final, _) = final_value(base);
    table.add_row(row![
      "Equal weight",
      r->format!("{:.2}", base.portfolio_cagr),
      r->format!("{base_final:.4}"),
      r->base.portfolio.elapsed_days()
    ]);
  }
  table.add_row(row![
    "Benchmark",
    r->format!("{:.2}", report.benchmark_cagr),
    r->format!("{benchmark_final:.4}"),
    r->days
  ]);
  table
}

/// First `top` correlation rows, one column per target.
pub fn correlation_table(correlations: &[FeatureCorrelation], targets: &[&str], top: usize) -> Table {
  let mut table = new_table();
  let mut titles = vec![Cell::new("Feature")];
  titles.extend(targets.iter().map(|t| Cell::new(t)));
  table.set_titles(Row::new(titles));

  for c in correlations.iter().take(top) {
    let mut cells = vec![Cell::new(&c.feature)];
    cells.extend(c.correlations.iter().map(|v| {
      if v.is_nan() {
        Cell::new("-")
      } else {
        Cell::new(&format!("{v:.3}"))
      }
    }));
    table.add_row(Row::new(cells));
  }
  table
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::quant::backtest::CumulativeReturnSeries;

  fn report() -> BacktestReport {
    let d0 = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let dates = vec![d0, d0 + chrono::Duration::days(365)];
    BacktestReport {
      portfolio: CumulativeReturnSeries::from_returns(dates.clone(), &[0.0, 0.1]),
      benchmark: CumulativeReturnSeries::from_returns(dates, &[0.0, 0.05]),
      portfolio_cagr: 10.0,
      benchmark_cagr: 5.0,
      incomplete_dates: 0,
    }
  }

  #[test]
  fn weights_table_lists_heaviest_first() {
    let w = PortfolioWeights::from_pairs(&["AAA".into(), "BBB".into(), "CCC".into()], &[0.2, 0.5, 0.3]);
    let table = weights_table(&w, 2);
    assert_eq!(table.len(), 2);
    let text = table.to_string();
    let bbb = text.find("BBB").unwrap();
    let ccc = text.find("CCC").unwrap();
    assert!(bbb < ccc);
    assert!(!text.contains("AAA"));
    assert!(text.contains("50.00"));
  }

  #[test]
  fn backtest_table_adds_baseline_row() {
    let r = report();
    assert_eq!(backtest_table(&r, None).len(), 2);
    let text = backtest_table(&r, Some(&r)).to_string();
    assert!(text.contains("Equal weight"));
    assert!(text.contains("10.00"));
    assert!(text.contains("1.1000"));
  }

  #[test]
  fn correlation_table_marks_undefined_values() {
    let rows = vec![
      FeatureCorrelation {
        feature: "beta".into(),
        correlations: vec![0.5, f64::NAN],
      },
      FeatureCorrelation {
        feature: "size".into(),
        correlations: vec![0.1, -0.2],
      },
    ];
    let table = correlation_table(&rows, &["totalEsg", "highestControversy"], 25);
    assert_eq!(table.len(), 2);
    let text = table.to_string();
    assert!(text.contains("0.500"));
    assert!(text.contains("-0.200"));
    assert!(text.contains(" - "));
  }
}
