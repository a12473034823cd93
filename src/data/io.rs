//! # CSV Ingestion
//!
//! Thin readers/writers around the `csv` crate. Fundamentals keep only the
//! columns that are numeric on every non-empty cell; price history is
//! accepted in long form or in either wide orientation.

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use csv::StringRecord;
use csv::Trim;
use csv::Writer;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::table::FundamentalsRow;
use super::table::FundamentalsTable;
use super::table::MergedTable;
use super::table::PriceHistory;
use super::table::PriceObservation;
use crate::error::PipelineError;
use crate::error::Result;
use crate::quant::backtest::BacktestReport;
use crate::quant::backtest::BenchmarkSeries;
use crate::quant::portfolio::PortfolioWeights;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse a calendar date, ignoring any time-of-day suffix.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
  let day = s
    .trim()
    .split(|c: char| c == ' ' || c == 'T')
    .next()
    .unwrap_or_default();
  let mut last_err = None;
  for fmt in DATE_FORMATS {
    match NaiveDate::parse_from_str(day, fmt) {
      Ok(d) => return Ok(d),
      Err(e) => last_err = Some(e),
    }
  }
  match last_err {
    Some(e) => Err(e.into()),
    None => Err(PipelineError::InvalidInput(format!("empty date '{s}'"))),
  }
}

fn parse_cell(s: &str) -> Option<f64> {
  if s.is_empty() {
    Some(f64::NAN)
  } else {
    s.parse::<f64>().ok()
  }
}

fn read_all<R: Read>(reader: R) -> Result<(StringRecord, Vec<StringRecord>)> {
  let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
  let headers = rdr.headers()?.clone();
  let records = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
  Ok((headers, records))
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
  headers
    .iter()
    .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

pub fn read_fundamentals<P: AsRef<Path>>(path: P) -> Result<FundamentalsTable> {
  let path = path.as_ref();
  info!("Loading fundamentals from {}", path.display());
  fundamentals_from_reader(File::open(path)?)
}

/// Fundamentals/ESG table: a `symbol` column, an optional `sector` text
/// column and every column that parses as a number on each non-empty cell.
pub fn fundamentals_from_reader<R: Read>(reader: R) -> Result<FundamentalsTable> {
  let (headers, records) = read_all(reader)?;
  let symbol_idx = find_column(&headers, &["symbol"])
    .ok_or_else(|| PipelineError::InvalidInput("fundamentals have no 'symbol' column".into()))?;
  let sector_idx = find_column(&headers, &["sector"]);

  let numeric: Vec<usize> = (0..headers.len())
    .filter(|&j| j != symbol_idx && Some(j) != sector_idx)
    .filter(|&j| {
      let mut observed = 0usize;
      let all_numeric = records.iter().all(|r| {
        let cell = r.get(j).unwrap_or("");
        if !cell.is_empty() {
          observed += 1;
        }
        parse_cell(cell).is_some()
      });
      all_numeric && observed > 0
    })
    .collect();

  debug!(
    "Keeping {} of {} fundamentals columns",
    numeric.len(),
    headers.len()
  );

  let columns: Vec<String> = numeric.iter().map(|&j| headers[j].to_string()).collect();
  let mut rows: Vec<FundamentalsRow> = Vec::with_capacity(records.len());
  let mut duplicates = 0usize;
  for r in &records {
    let symbol = r.get(symbol_idx).unwrap_or("").to_string();
    if symbol.is_empty() {
      continue;
    }
    if rows.iter().any(|row| row.symbol == symbol) {
      duplicates += 1;
      continue;
    }
    let sector = sector_idx
      .and_then(|j| r.get(j))
      .filter(|s| !s.is_empty())
      .map(str::to_string);
    let values = numeric
      .iter()
      .map(|&j| parse_cell(r.get(j).unwrap_or("")).unwrap_or(f64::NAN))
      .collect();
    rows.push(FundamentalsRow {
      symbol,
      sector,
      values,
    });
  }
  if duplicates > 0 {
    warn!("Dropped {duplicates} duplicate fundamentals rows (first occurrence kept)");
  }

  FundamentalsTable::new(columns, rows)
}

pub fn read_prices<P: AsRef<Path>>(path: P) -> Result<PriceHistory> {
  let path = path.as_ref();
  info!("Loading price history from {}", path.display());
  prices_from_reader(File::open(path)?)
}

/// Price history in one of three layouts, detected from the header:
/// long `symbol,date,closing_price`; wide with a leading `symbol` column and
/// one column per date; wide with a leading `date` column and one column per
/// symbol.
pub fn prices_from_reader<R: Read>(reader: R) -> Result<PriceHistory> {
  let (headers, records) = read_all(reader)?;
  let first = headers.get(0).unwrap_or("");

  let symbol_col = find_column(&headers, &["symbol"]);
  let date_col = find_column(&headers, &["date"]);
  let close_col = find_column(&headers, &["closing_price", "close"]);

  if let (Some(s), Some(d), Some(c)) = (symbol_col, date_col, close_col) {
    let mut observations = Vec::with_capacity(records.len());
    for r in &records {
      let close = parse_cell(r.get(c).unwrap_or("")).unwrap_or(f64::NAN);
      if close.is_nan() {
        continue;
      }
      observations.push(PriceObservation {
        symbol: r.get(s).unwrap_or("").to_string(),
        date: parse_date(r.get(d).unwrap_or(""))?,
        close,
      });
    }
    return Ok(PriceHistory::from_long(observations));
  }

  if first.eq_ignore_ascii_case("symbol") {
    let mut date_cols = Vec::new();
    for (j, h) in headers.iter().enumerate().skip(1) {
      match parse_date(h) {
        Ok(d) => date_cols.push((j, d)),
        Err(_) => debug!("Ignoring non-date price column '{h}'"),
      }
    }
    let dates: Vec<NaiveDate> = date_cols.iter().map(|(_, d)| *d).collect();
    let rows: Vec<(String, Vec<f64>)> = records
      .iter()
      .map(|r| {
        let prices = date_cols
          .iter()
          .map(|(j, _)| parse_cell(r.get(*j).unwrap_or("")).unwrap_or(f64::NAN))
          .collect();
        (r.get(0).unwrap_or("").to_string(), prices)
      })
      .collect();
    return PriceHistory::from_symbol_rows(&dates, &rows);
  }

  if first.eq_ignore_ascii_case("date") {
    let symbols: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    let rows = records
      .iter()
      .map(|r| -> Result<(NaiveDate, Vec<f64>)> {
        let date = parse_date(r.get(0).unwrap_or(""))?;
        let prices = (1..headers.len())
          .map(|j| parse_cell(r.get(j).unwrap_or("")).unwrap_or(f64::NAN))
          .collect();
        Ok((date, prices))
      })
      .collect::<Result<Vec<(NaiveDate, Vec<f64>)>>>()?;
    return PriceHistory::from_date_rows(&symbols, &rows);
  }

  Err(PipelineError::InvalidInput(format!(
    "unrecognised price layout (first header '{first}')"
  )))
}

pub fn read_benchmark<P: AsRef<Path>>(path: P) -> Result<BenchmarkSeries> {
  let path = path.as_ref();
  info!("Loading benchmark from {}", path.display());
  benchmark_from_reader(File::open(path)?)
}

/// Benchmark index closes from `Date,Close Price` columns.
pub fn benchmark_from_reader<R: Read>(reader: R) -> Result<BenchmarkSeries> {
  let (headers, records) = read_all(reader)?;
  let d = find_column(&headers, &["date"])
    .ok_or_else(|| PipelineError::InvalidInput("benchmark has no 'Date' column".into()))?;
  let c = find_column(&headers, &["close price", "close", "closing_price"])
    .ok_or_else(|| PipelineError::InvalidInput("benchmark has no 'Close Price' column".into()))?;

  let mut points = Vec::with_capacity(records.len());
  for r in &records {
    let close = parse_cell(r.get(c).unwrap_or("")).unwrap_or(f64::NAN);
    if close.is_nan() {
      continue;
    }
    points.push((parse_date(r.get(d).unwrap_or(""))?, close));
  }
  Ok(BenchmarkSeries::new(points))
}

fn fmt_f64(v: f64) -> String {
  if v.is_nan() {
    String::new()
  } else {
    format!("{v}")
  }
}

/// `symbol,date,<features…>,closing_price,daily_return`
pub fn write_merged<W: Write>(table: &MergedTable, writer: W) -> Result<()> {
  let mut wtr = Writer::from_writer(writer);
  let mut header = vec!["symbol".to_string(), "date".to_string()];
  header.extend(table.feature_columns().iter().cloned());
  header.push("closing_price".into());
  header.push("daily_return".into());
  wtr.write_record(&header)?;

  for r in table.records() {
    let mut row = vec![r.symbol.clone(), r.date.to_string()];
    row.extend(r.features.iter().map(|v| fmt_f64(*v)));
    row.push(fmt_f64(r.closing_price));
    row.push(fmt_f64(r.daily_return));
    wtr.write_record(&row)?;
  }
  wtr.flush()?;
  Ok(())
}

/// `symbol,weight`, heaviest first.
pub fn write_weights<W: Write>(weights: &PortfolioWeights, writer: W) -> Result<()> {
  let mut wtr = Writer::from_writer(writer);
  wtr.write_record(["symbol", "weight"])?;
  for (symbol, w) in weights.sorted_desc() {
    wtr.write_record([symbol, fmt_f64(w).as_str()])?;
  }
  wtr.flush()?;
  Ok(())
}

/// `date,portfolio,benchmark` over the common backtest dates.
pub fn write_cumulative<W: Write>(report: &BacktestReport, writer: W) -> Result<()> {
  let mut wtr = Writer::from_writer(writer);
  wtr.write_record(["date", "portfolio", "benchmark"])?;
  let p = &report.portfolio;
  let b = &report.benchmark;
  for ((date, pv), bv) in p.dates.iter().zip(&p.values).zip(&b.values) {
    wtr.write_record([date.to_string(), fmt_f64(*pv), fmt_f64(*bv)])?;
  }
  wtr.flush()?;
  Ok(())
}
