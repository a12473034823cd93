use std::fs;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use esg_portfolio::config::PipelineConfig;
use esg_portfolio::data::io;
use esg_portfolio::data::target_correlations;
use esg_portfolio::data::FundamentalsTable;
use esg_portfolio::report;
use esg_portfolio::screen::CONTROVERSY_COLUMN;
use esg_portfolio::screen::ESG_COLUMN;
use esg_portfolio::visualization;
use esg_portfolio::Pipeline;
use esg_portfolio::PipelineArtifacts;
use esg_portfolio::PipelineInputs;
use tracing::info;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ESG-aware predictive portfolio allocation.
#[derive(Parser)]
#[command(name = "esg-portfolio")]
#[command(version)]
#[command(about = "Neural return forecasts, long-only mean-variance weights and a benchmark backtest")]
struct Cli {
  /// Verbosity level
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full pipeline and write weights, cumulative series, charts and the model
  Run {
    /// Fundamentals CSV with a `symbol` column
    #[arg(short, long)]
    fundamentals: PathBuf,

    /// Optional ESG CSV joined on `symbol` in front of the fundamentals
    #[arg(short, long)]
    esg: Option<PathBuf>,

    /// Closing prices (long, symbol-rows or date-rows layout)
    #[arg(short, long)]
    prices: PathBuf,

    /// Benchmark index CSV (`Date,Close Price`)
    #[arg(short, long)]
    benchmark: PathBuf,

    /// TOML configuration; every section is optional
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable the ESG screen regardless of the configuration
    #[arg(long)]
    screen: bool,

    /// Number of weights to print
    #[arg(long, default_value = "20")]
    top: usize,

    /// Output directory
    #[arg(short, long, default_value = "out")]
    out: PathBuf,
  },

  /// Correlate every fundamentals column with the ESG score and controversy level
  Correlate {
    #[arg(short, long)]
    fundamentals: PathBuf,

    #[arg(short, long)]
    esg: Option<PathBuf>,

    /// Number of features to print
    #[arg(long, default_value = "25")]
    top: usize,
  },
}

fn init_logging(verbose: u8) -> Result<()> {
  let level = match verbose {
    0 => Level::WARN,
    1 => Level::INFO,
    2 => Level::DEBUG,
    _ => Level::TRACE,
  };
  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .finish();
  tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

fn load_universe(fundamentals: &Path, esg: Option<&Path>) -> Result<FundamentalsTable> {
  let financials = io::read_fundamentals(fundamentals)?;
  match esg {
    Some(path) => Ok(io::read_fundamentals(path)?.inner_join(&financials)?),
    None => Ok(financials),
  }
}

#[allow(clippy::too_many_arguments)]
fn run(
  fundamentals: &Path,
  esg: Option<&Path>,
  prices: &Path,
  benchmark: &Path,
  config: Option<&Path>,
  screen: bool,
  top: usize,
  out: &Path,
) -> Result<()> {
  let mut cfg = match config {
    Some(path) => PipelineConfig::from_toml_file(path)?,
    None => PipelineConfig::default(),
  };
  cfg.screen.enabled |= screen;

  let inputs = PipelineInputs {
    fundamentals: load_universe(fundamentals, esg)?,
    prices: io::read_prices(prices)?,
    benchmark: io::read_benchmark(benchmark)?,
  };

  let mut artifacts = PipelineArtifacts::default();
  let report = Pipeline::new(cfg).run(&inputs, &mut artifacts)?;

  println!("Top {top} weights");
  report::weights_table(&report.weights, top).printstd();
  println!();
  report::backtest_table(&report.backtest, report.baseline.as_ref()).printstd();
  if !report.dropped_from_predictions.is_empty() || !report.dropped_from_covariance.is_empty() {
    println!(
      "Reconciliation dropped {} symbols without covariance and {} without prediction",
      report.dropped_from_predictions.len(),
      report.dropped_from_covariance.len()
    );
  }

  fs::create_dir_all(out).with_context(|| format!("failed creating output directory {:?}", out))?;
  io::write_weights(&report.weights, File::create(out.join("weights.csv"))?)?;
  io::write_cumulative(&report.backtest, File::create(out.join("cumulative.csv"))?)?;
  if let Some(merged) = &artifacts.merged {
    io::write_merged(merged, File::create(out.join("merged.csv"))?)?;
  }
  visualization::write_weights_bar_html(out.join("weights.html"), "Optimized weights", &report.weights)?;
  visualization::write_backtest_html(
    out.join("backtest.html"),
    "Cumulative returns",
    &report.backtest,
    report.baseline.as_ref(),
  )?;
  if let Some(predictor) = &artifacts.predictor {
    predictor.save(out.join("model"))?;
  }

  info!("Wrote results to {}", out.display());
  Ok(())
}

fn correlate(fundamentals: &Path, esg: Option<&Path>, top: usize) -> Result<()> {
  let table = load_universe(fundamentals, esg)?;
  let targets = [ESG_COLUMN, CONTROVERSY_COLUMN];
  let correlations = target_correlations(&table, &targets)?;
  report::correlation_table(&correlations, &targets, top).printstd();
  Ok(())
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose)?;

  match cli.command {
    Commands::Run {
      fundamentals,
      esg,
      prices,
      benchmark,
      config,
      screen,
      top,
      out,
    } => run(
      &fundamentals,
      esg.as_deref(),
      &prices,
      &benchmark,
      config.as_deref(),
      screen,
      top,
      &out,
    ),
    Commands::Correlate { fundamentals, esg, top } => correlate(&fundamentals, esg.as_deref(), top),
  }
}
