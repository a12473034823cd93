//! # Visualization
//!
//! $$
//! V_t=\prod_{s\le t}(1+r_s)
//! $$
//!
//! Plotly HTML charts of the optimized weights and of the cumulative
//! returns of the backtest.

use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use plotly::Bar;
use plotly::Layout;
use plotly::Plot;
use plotly::Scatter;
use plotly::common::DashType;
use plotly::common::Line;
use plotly::common::Mode;
use plotly::common::Title;
use plotly::layout::Axis;

use crate::quant::backtest::BacktestReport;
use crate::quant::backtest::CumulativeReturnSeries;
use crate::quant::portfolio::PortfolioWeights;

fn write_plot(plot: &Plot, output_html: &Path) -> Result<()> {
  if let Some(parent) = output_html.parent() {
    fs::create_dir_all(parent)
      .with_context(|| format!("failed creating plot output directory {:?}", parent))?;
  }
  plot.write_html(output_html);
  Ok(())
}

fn date_labels(series: &CumulativeReturnSeries) -> Vec<String> {
  series.dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect()
}

/// Bar chart of the weights in percent, heaviest first. Zero weights are
/// left out.
pub fn write_weights_bar_html<P: AsRef<Path>>(output_html: P, title: &str, weights: &PortfolioWeights) -> Result<()> {
  let held: Vec<(&str, f64)> = weights
    .sorted_desc()
    .into_iter()
    .filter(|(_, w)| *w > 0.0)
    .collect();
  if held.is_empty() {
    bail!("no positive weight to plot");
  }

  let symbols: Vec<String> = held.iter().map(|(s, _)| s.to_string()).collect();
  let pct: Vec<f64> = held.iter().map(|(_, w)| w * 100.0).collect();

  let mut plot = Plot::new();
  plot.add_trace(Bar::new(symbols, pct).name("Weight %"));
  plot.set_layout(
    Layout::new()
      .height(480)
      .width((held.len() * 28).clamp(640, 1600))
      .title(Title::from(title))
      .y_axis(Axis::new().title(Title::from("Weight (%)"))),
  );
  write_plot(&plot, output_html.as_ref())
}

/// Cumulative returns of the optimized portfolio, the benchmark and the
/// optional equal-weight baseline. CAGR is shown in the legend.
pub fn write_backtest_html<P: AsRef<Path>>(
  output_html: P,
  title: &str,
  report: &BacktestReport,
  baseline: Option<&BacktestReport>,
) -> Result<()> {
  if report.portfolio.is_empty() {
    bail!("backtest has no dates to plot");
  }

  let mut plot = Plot::new();
  plot.add_trace(
    Scatter::new(date_labels(&report.portfolio), report.portfolio.values.clone())
      .name(format!("Optimized (CAGR {:.2}%)", report.portfolio_cagr))
      .mode(Mode::Lines)
      .line(Line::new().color("#1f77b4")),
  );
  if let Some(base) = baseline {
    plot.add_trace(
      Scatter::new(date_labels(&base.portfolio), base.portfolio.values.clone())
        .name(format!("Equal weight (CAGR {:.2}%)", base.portfolio_cagr))
        .mode(Mode::Lines)
        .line(Line::new().color("#2ca02c").dash(DashType::Dot)),
    );
  }
  plot.add_trace(
    Scatter::new(date_labels(&report.benchmark), report.benchmark.values.clone())
      .name(format!("Benchmark (CAGR {:.2}%)", report.benchmark_cagr))
      .mode(Mode::Lines)
      .line(Line::new().color("#d62728").dash(DashType::Dash)),
  );

  plot.set_layout(
    Layout::new()
      .height(520)
      .width(1040)
      .title(Title::from(title))
      .x_axis(Axis::new().title(Title::from("Date")))
      .y_axis(Axis::new().title(Title::from("Growth of 1"))),
  );
  write_plot(&plot, output_html.as_ref())
}
