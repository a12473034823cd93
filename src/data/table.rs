//! # Tables
//!
//! Value objects passed between stages. Missing numeric values are stored
//! as `NaN`; nothing here is mutated after construction.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

use super::impute::MedianImputer;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

/// Static per-symbol fundamentals/ESG features.
#[derive(Clone, Debug, PartialEq)]
pub struct FundamentalsRow {
  pub symbol: String,
  pub sector: Option<String>,
  /// One value per table column, `NaN` when missing.
  pub values: Vec<f64>,
}

/// Cross-sectional feature table keyed by symbol.
#[derive(Clone, Debug, Default)]
pub struct FundamentalsTable {
  columns: Vec<String>,
  rows: Vec<FundamentalsRow>,
}

impl FundamentalsTable {
  pub fn new(columns: Vec<String>, rows: Vec<FundamentalsRow>) -> Result<Self> {
    let mut seen = HashSet::new();
    for c in &columns {
      if !seen.insert(c.as_str()) {
        return Err(PipelineError::InvalidInput(format!("duplicate column '{c}'")));
      }
    }
    let mut symbols = HashSet::new();
    for row in &rows {
      if row.values.len() != columns.len() {
        return Err(PipelineError::InvalidInput(format!(
          "row '{}' has {} values, expected {}",
          row.symbol,
          row.values.len(),
          columns.len()
        )));
      }
      if !symbols.insert(row.symbol.as_str()) {
        return Err(PipelineError::InvalidInput(format!(
          "duplicate symbol '{}' in fundamentals",
          row.symbol
        )));
      }
    }
    Ok(Self { columns, rows })
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn rows(&self) -> &[FundamentalsRow] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn column_index(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|c| c == name)
  }

  /// Values of one column in row order.
  pub fn column(&self, name: &str) -> Option<Vec<f64>> {
    let j = self.column_index(name)?;
    Some(self.rows.iter().map(|r| r.values[j]).collect())
  }

  pub fn symbols(&self) -> Vec<String> {
    self.rows.iter().map(|r| r.symbol.clone()).collect()
  }

  pub fn row(&self, symbol: &str) -> Option<&FundamentalsRow> {
    self.rows.iter().find(|r| r.symbol == symbol)
  }

  /// Keep only the listed symbols, preserving row order.
  pub fn retain_symbols(&self, keep: &BTreeSet<String>) -> Self {
    Self {
      columns: self.columns.clone(),
      rows: self
        .rows
        .iter()
        .filter(|r| keep.contains(&r.symbol))
        .cloned()
        .collect(),
    }
  }

  /// Inner join on symbol. Columns of `other` already present here are skipped.
  pub fn inner_join(&self, other: &Self) -> Result<Self> {
    let right_cols: Vec<usize> = other
      .columns
      .iter()
      .enumerate()
      .filter(|(_, c)| !self.columns.contains(c))
      .map(|(j, _)| j)
      .collect();

    let mut columns = self.columns.clone();
    columns.extend(right_cols.iter().map(|&j| other.columns[j].clone()));

    let by_symbol: HashMap<&str, &FundamentalsRow> =
      other.rows.iter().map(|r| (r.symbol.as_str(), r)).collect();

    let mut rows = Vec::new();
    for left in &self.rows {
      let Some(right) = by_symbol.get(left.symbol.as_str()) else {
        continue;
      };
      let mut values = left.values.clone();
      values.extend(right_cols.iter().map(|&j| right.values[j]));
      rows.push(FundamentalsRow {
        symbol: left.symbol.clone(),
        sector: left.sector.clone().or_else(|| right.sector.clone()),
        values,
      });
    }

    if rows.is_empty() {
      return Err(PipelineError::alignment(
        Stage::Merge,
        "fundamentals tables share no symbol",
        0,
        0,
      ));
    }

    Self::new(columns, rows)
  }
}

/// One closing price.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceObservation {
  pub symbol: String,
  pub date: NaiveDate,
  pub close: f64,
}

/// Long-format daily price history.
#[derive(Clone, Debug, Default)]
pub struct PriceHistory {
  observations: Vec<PriceObservation>,
}

impl PriceHistory {
  pub fn from_long(observations: Vec<PriceObservation>) -> Self {
    Self { observations }
  }

  /// Melt a wide table with one row per symbol and one column per date.
  /// Non-finite cells are dropped.
  pub fn from_symbol_rows(dates: &[NaiveDate], rows: &[(String, Vec<f64>)]) -> Result<Self> {
    let mut observations = Vec::with_capacity(dates.len() * rows.len());
    for (symbol, prices) in rows {
      if prices.len() != dates.len() {
        return Err(PipelineError::InvalidInput(format!(
          "symbol '{symbol}' has {} prices for {} dates",
          prices.len(),
          dates.len()
        )));
      }
      for (date, &close) in dates.iter().zip(prices) {
        if close.is_finite() {
          observations.push(PriceObservation {
            symbol: symbol.clone(),
            date: *date,
            close,
          });
        }
      }
    }
    Ok(Self { observations })
  }

  /// Melt a wide table with one row per date and one column per symbol.
  /// Non-finite cells are dropped.
  pub fn from_date_rows(symbols: &[String], rows: &[(NaiveDate, Vec<f64>)]) -> Result<Self> {
    let mut observations = Vec::with_capacity(symbols.len() * rows.len());
    for (date, prices) in rows {
      if prices.len() != symbols.len() {
        return Err(PipelineError::InvalidInput(format!(
          "date {date} has {} prices for {} symbols",
          prices.len(),
          symbols.len()
        )));
      }
      for (symbol, &close) in symbols.iter().zip(prices) {
        if close.is_finite() {
          observations.push(PriceObservation {
            symbol: symbol.clone(),
            date: *date,
            close,
          });
        }
      }
    }
    Ok(Self { observations })
  }

  pub fn observations(&self) -> &[PriceObservation] {
    &self.observations
  }

  pub fn len(&self) -> usize {
    self.observations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }
}

/// A price with its return over the previous observation of the same symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnObservation {
  pub symbol: String,
  pub date: NaiveDate,
  pub close: f64,
  pub daily_return: f64,
}

/// Daily returns in long format, sorted by `(symbol, date)`.
#[derive(Clone, Debug, Default)]
pub struct ReturnHistory {
  observations: Vec<ReturnObservation>,
}

impl ReturnHistory {
  pub fn new(mut observations: Vec<ReturnObservation>) -> Self {
    observations.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
    Self { observations }
  }

  pub fn observations(&self) -> &[ReturnObservation] {
    &self.observations
  }

  pub fn len(&self) -> usize {
    self.observations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }

  pub fn symbols(&self) -> Vec<String> {
    let set: BTreeSet<&str> = self.observations.iter().map(|o| o.symbol.as_str()).collect();
    set.into_iter().map(str::to_string).collect()
  }

  /// Pivot to a date × symbol panel. Dates are the union of the included
  /// symbols' dates; absent cells are `NaN`. `None` includes every symbol.
  pub fn pivot(&self, include: Option<&BTreeSet<String>>) -> Result<ReturnPanel> {
    let mut cells: BTreeMap<(NaiveDate, &str), f64> = BTreeMap::new();
    let mut symbols = BTreeSet::new();
    let mut dates = BTreeSet::new();

    for o in &self.observations {
      if include.is_some_and(|set| !set.contains(&o.symbol)) {
        continue;
      }
      if cells.insert((o.date, o.symbol.as_str()), o.daily_return).is_some() {
        return Err(PipelineError::InvalidInput(format!(
          "duplicate return for '{}' on {}",
          o.symbol, o.date
        )));
      }
      symbols.insert(o.symbol.as_str());
      dates.insert(o.date);
    }

    let symbols: Vec<String> = symbols.into_iter().map(str::to_string).collect();
    let dates: Vec<NaiveDate> = dates.into_iter().collect();
    let col: HashMap<&str, usize> = symbols
      .iter()
      .enumerate()
      .map(|(j, s)| (s.as_str(), j))
      .collect();
    let row: HashMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut values = Array2::from_elem((dates.len(), symbols.len()), f64::NAN);
    for ((date, symbol), r) in cells {
      values[[row[&date], col[symbol]]] = r;
    }

    Ok(ReturnPanel {
      dates,
      symbols,
      values,
    })
  }
}

/// Date × symbol matrix of daily returns.
#[derive(Clone, Debug)]
pub struct ReturnPanel {
  pub dates: Vec<NaiveDate>,
  pub symbols: Vec<String>,
  pub values: Array2<f64>,
}

impl ReturnPanel {
  /// Rows whose date lies inside `[start, end]`.
  pub fn within(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
    let keep: Vec<usize> = self
      .dates
      .iter()
      .enumerate()
      .filter(|(_, d)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
      .map(|(i, _)| i)
      .collect();
    self.select_rows(&keep)
  }

  /// Missing cells per symbol column.
  pub fn missing_per_symbol(&self) -> Vec<usize> {
    self
      .values
      .axis_iter(Axis(1))
      .map(|col| col.iter().filter(|v| v.is_nan()).count())
      .collect()
  }

  /// Drop every symbol with at least one missing observation.
  pub fn complete_columns(&self) -> Self {
    let keep: Vec<usize> = self
      .missing_per_symbol()
      .into_iter()
      .enumerate()
      .filter(|(_, m)| *m == 0)
      .map(|(j, _)| j)
      .collect();
    Self {
      dates: self.dates.clone(),
      symbols: keep.iter().map(|&j| self.symbols[j].clone()).collect(),
      values: self.values.select(Axis(1), &keep),
    }
  }

  /// Drop every date with at least one missing observation.
  pub fn complete_rows(&self) -> Self {
    let keep: Vec<usize> = self
      .values
      .axis_iter(Axis(0))
      .enumerate()
      .filter(|(_, row)| row.iter().all(|v| !v.is_nan()))
      .map(|(i, _)| i)
      .collect();
    self.select_rows(&keep)
  }

  fn select_rows(&self, keep: &[usize]) -> Self {
    Self {
      dates: keep.iter().map(|&i| self.dates[i]).collect(),
      symbols: self.symbols.clone(),
      values: self.values.select(Axis(0), keep),
    }
  }
}

/// One merged `(symbol, date)` row.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolRecord {
  pub symbol: String,
  pub date: NaiveDate,
  pub features: Vec<f64>,
  pub closing_price: f64,
  pub daily_return: f64,
}

/// Numeric model inputs, one row per merged record.
#[derive(Clone, Debug)]
pub struct FeatureMatrix {
  pub columns: Vec<String>,
  pub values: Array2<f64>,
}

impl FeatureMatrix {
  pub fn nrows(&self) -> usize {
    self.values.nrows()
  }

  pub fn ncols(&self) -> usize {
    self.values.ncols()
  }
}

/// Output of the dataset merger, sorted by `(symbol, date)`.
#[derive(Clone, Debug)]
pub struct MergedTable {
  feature_columns: Vec<String>,
  records: Vec<SymbolRecord>,
}

impl MergedTable {
  pub(crate) fn new(feature_columns: Vec<String>, records: Vec<SymbolRecord>) -> Self {
    Self {
      feature_columns,
      records,
    }
  }

  pub fn feature_columns(&self) -> &[String] {
    &self.feature_columns
  }

  pub fn records(&self) -> &[SymbolRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn symbols(&self) -> Vec<String> {
    let set: BTreeSet<&str> = self.records.iter().map(|r| r.symbol.as_str()).collect();
    set.into_iter().map(str::to_string).collect()
  }

  /// Symbol of every row, aligned with [`Self::feature_matrix`].
  pub fn row_symbols(&self) -> Vec<&str> {
    self.records.iter().map(|r| r.symbol.as_str()).collect()
  }

  pub fn feature_matrix(&self) -> FeatureMatrix {
    let k = self.feature_columns.len();
    let values = Array2::from_shape_fn((self.records.len(), k), |(i, j)| {
      self.records[i].features[j]
    });
    FeatureMatrix {
      columns: self.feature_columns.clone(),
      values,
    }
  }

  pub fn targets(&self) -> Array1<f64> {
    self.records.iter().map(|r| r.daily_return).collect()
  }

  pub fn return_history(&self) -> ReturnHistory {
    ReturnHistory::new(
      self
        .records
        .iter()
        .map(|r| ReturnObservation {
          symbol: r.symbol.clone(),
          date: r.date,
          close: r.closing_price,
          daily_return: r.daily_return,
        })
        .collect(),
    )
  }

  /// Fill missing features with per-column medians of this table.
  pub fn impute_medians(&self) -> Result<Self> {
    let matrix = self.feature_matrix();
    let imputer = MedianImputer::fit(&matrix.values);
    let filled = imputer.transform(&matrix.values)?;
    let records = self
      .records
      .iter()
      .zip(filled.axis_iter(Axis(0)))
      .map(|(r, row)| SymbolRecord {
        features: row.to_vec(),
        ..r.clone()
      })
      .collect();
    Ok(Self::new(self.feature_columns.clone(), records))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 3, day).unwrap()
  }

  fn obs(symbol: &str, day: u32, r: f64) -> ReturnObservation {
    ReturnObservation {
      symbol: symbol.into(),
      date: d(day),
      close: 100.0,
      daily_return: r,
    }
  }

  #[test]
  fn fundamentals_rejects_duplicate_symbols() {
    let row = FundamentalsRow {
      symbol: "AAA".into(),
      sector: None,
      values: vec![1.0],
    };
    let err = FundamentalsTable::new(vec!["x".into()], vec![row.clone(), row]).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
  }

  #[test]
  fn inner_join_keeps_common_symbols_and_skips_duplicate_columns() {
    let left = FundamentalsTable::new(
      vec!["totalEsg".into(), "beta".into()],
      vec![
        FundamentalsRow {
          symbol: "AAA".into(),
          sector: Some("Tech".into()),
          values: vec![20.0, 1.1],
        },
        FundamentalsRow {
          symbol: "BBB".into(),
          sector: None,
          values: vec![30.0, 0.9],
        },
      ],
    )
    .unwrap();
    let right = FundamentalsTable::new(
      vec!["beta".into(), "pe".into()],
      vec![FundamentalsRow {
        symbol: "BBB".into(),
        sector: Some("Energy".into()),
        values: vec![5.0, 12.0],
      }],
    )
    .unwrap();

    let joined = left.inner_join(&right).unwrap();
    assert_eq!(joined.columns(), &["totalEsg", "beta", "pe"]);
    assert_eq!(joined.len(), 1);
    let row = &joined.rows()[0];
    assert_eq!(row.symbol, "BBB");
    assert_eq!(row.values, vec![30.0, 0.9, 12.0]);
    assert_eq!(row.sector.as_deref(), Some("Energy"));
  }

  #[test]
  fn inner_join_without_overlap_is_alignment_error() {
    let a = FundamentalsTable::new(
      vec!["x".into()],
      vec![FundamentalsRow {
        symbol: "AAA".into(),
        sector: None,
        values: vec![1.0],
      }],
    )
    .unwrap();
    let b = FundamentalsTable::new(
      vec!["y".into()],
      vec![FundamentalsRow {
        symbol: "ZZZ".into(),
        sector: None,
        values: vec![1.0],
      }],
    )
    .unwrap();
    let err = a.inner_join(&b).unwrap_err();
    assert!(matches!(err, PipelineError::DataAlignment { stage: Stage::Merge, .. }));
  }

  #[test]
  fn wide_melt_drops_missing_cells() {
    let dates = vec![d(1), d(2), d(3)];
    let rows = vec![
      ("AAA".to_string(), vec![10.0, f64::NAN, 11.0]),
      ("BBB".to_string(), vec![20.0, 21.0, 22.0]),
    ];
    let prices = PriceHistory::from_symbol_rows(&dates, &rows).unwrap();
    assert_eq!(prices.len(), 5);

    let by_date = PriceHistory::from_date_rows(
      &["AAA".to_string(), "BBB".to_string()],
      &[(d(1), vec![10.0, 20.0]), (d(2), vec![f64::NAN, 21.0])],
    )
    .unwrap();
    assert_eq!(by_date.len(), 3);
  }

  #[test]
  fn wide_melt_rejects_ragged_rows() {
    let err = PriceHistory::from_symbol_rows(&[d(1), d(2)], &[("AAA".to_string(), vec![1.0])])
      .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
  }

  #[test]
  fn pivot_marks_gaps_and_completeness_filters() {
    let history = ReturnHistory::new(vec![
      obs("BBB", 1, 0.02),
      obs("AAA", 1, 0.01),
      obs("AAA", 2, -0.01),
      obs("BBB", 3, 0.03),
      obs("AAA", 3, 0.00),
    ]);
    let panel = history.pivot(None).unwrap();
    assert_eq!(panel.symbols, vec!["AAA", "BBB"]);
    assert_eq!(panel.dates, vec![d(1), d(2), d(3)]);
    assert!(panel.values[[1, 1]].is_nan());
    assert_eq!(panel.missing_per_symbol(), vec![0, 1]);

    let cols = panel.complete_columns();
    assert_eq!(cols.symbols, vec!["AAA"]);
    assert_eq!(cols.values.dim(), (3, 1));

    let rows = panel.complete_rows();
    assert_eq!(rows.dates, vec![d(1), d(3)]);

    let window = panel.within(Some(d(2)), None);
    assert_eq!(window.dates, vec![d(2), d(3)]);
  }

  #[test]
  fn pivot_rejects_duplicates() {
    let history = ReturnHistory::new(vec![obs("AAA", 1, 0.01), obs("AAA", 1, 0.02)]);
    assert!(history.pivot(None).is_err());
  }

  #[test]
  fn merged_table_imputes_column_medians() {
    let rec = |s: &str, day: u32, f: Vec<f64>| SymbolRecord {
      symbol: s.into(),
      date: d(day),
      features: f,
      closing_price: 10.0,
      daily_return: 0.0,
    };
    let table = MergedTable::new(
      vec!["a".into(), "b".into()],
      vec![
        rec("AAA", 2, vec![1.0, f64::NAN]),
        rec("BBB", 2, vec![f64::NAN, 4.0]),
        rec("CCC", 2, vec![3.0, 6.0]),
      ],
    );
    let filled = table.impute_medians().unwrap();
    assert_eq!(filled.records()[0].features, vec![1.0, 5.0]);
    assert_eq!(filled.records()[1].features, vec![2.0, 4.0]);
  }
}
