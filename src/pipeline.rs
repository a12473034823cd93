//! # Pipeline
//!
//! $$
//! \text{screen}\to\text{merge}\to\text{predict}\to\Sigma\to\text{reconcile}\to\mathbf w^\*\to\text{backtest}
//! $$
//!
//! Runs the stages in order. Every intermediate result is stored in
//! [`PipelineArtifacts`] as soon as it exists, so the artifacts of the stages
//! before a failure stay inspectable.

use anyhow::Result;
use candle_core::Device;
use tracing::info;
use tracing::warn;

use crate::ai::ReturnPredictor;
use crate::ai::TrainReport;
use crate::config::FitScope;
use crate::config::PipelineConfig;
use crate::data::daily_returns;
use crate::data::merge_returns;
use crate::data::FundamentalsTable;
use crate::data::MergedTable;
use crate::data::PriceHistory;
use crate::data::ReturnHistory;
use crate::quant::backtest::run_backtest;
use crate::quant::backtest::BacktestReport;
use crate::quant::backtest::BenchmarkSeries;
use crate::quant::portfolio::estimate_covariance;
use crate::quant::portfolio::Allocation;
use crate::quant::portfolio::AllocationEngine;
use crate::quant::portfolio::AllocationResult;
use crate::quant::portfolio::CovarianceMatrix;
use crate::quant::portfolio::PortfolioWeights;
use crate::quant::portfolio::PredictedReturns;
use crate::screen::esg_screen;

/// Raw inputs of one run.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
  pub fundamentals: FundamentalsTable,
  pub prices: PriceHistory,
  pub benchmark: BenchmarkSeries,
}

/// Intermediate results, filled stage by stage.
#[derive(Default)]
pub struct PipelineArtifacts {
  /// Fundamentals after the optional ESG screen.
  pub universe: Option<FundamentalsTable>,
  pub baseline: Option<PortfolioWeights>,
  pub returns: Option<ReturnHistory>,
  pub merged: Option<MergedTable>,
  pub predictor: Option<ReturnPredictor>,
  pub train_report: Option<TrainReport>,
  pub predicted: Option<PredictedReturns>,
  pub covariance: Option<CovarianceMatrix>,
  pub allocation: Option<Allocation>,
  pub backtest: Option<BacktestReport>,
  pub baseline_backtest: Option<BacktestReport>,
}

/// Final outputs of a successful run.
#[derive(Clone, Debug)]
pub struct PipelineReport {
  pub weights: PortfolioWeights,
  pub allocation: AllocationResult,
  pub backtest: BacktestReport,
  /// Equal-weight backtest of the screened universe, when screening is on.
  pub baseline: Option<BacktestReport>,
  pub dropped_from_predictions: Vec<String>,
  pub dropped_from_covariance: Vec<String>,
  pub excluded_from_covariance: Vec<String>,
}

pub struct Pipeline {
  config: PipelineConfig,
  device: Device,
}

impl Pipeline {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      device: Device::Cpu,
    }
  }

  pub fn with_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn run(&self, inputs: &PipelineInputs, artifacts: &mut PipelineArtifacts) -> Result<PipelineReport> {
    let cfg = &self.config;
    cfg.validate()?;

    let universe = if cfg.screen.enabled {
      esg_screen(&inputs.fundamentals, &cfg.screen)?
    } else {
      inputs.fundamentals.clone()
    };
    let universe = artifacts.universe.insert(universe);

    let returns = artifacts.returns.insert(daily_returns(&inputs.prices)?);
    info!(
      symbols = returns.symbols().len(),
      rows = returns.len(),
      "Computed daily returns"
    );

    if cfg.screen.enabled {
      let priced = returns.symbols();
      let held: Vec<String> = universe
        .symbols()
        .into_iter()
        .filter(|s| priced.binary_search(s).is_ok())
        .collect();
      artifacts.baseline = Some(PortfolioWeights::equal(&held)?);
    }

    let mut merged = merge_returns(universe, returns)?;
    if cfg.train.fit_scope == FitScope::Full {
      merged = merged.impute_medians()?;
    }
    let merged = artifacts.merged.insert(merged);

    let mut predictor = ReturnPredictor::new(
      merged.feature_columns().to_vec(),
      &cfg.train.hidden,
      cfg.train.random_seed,
      &self.device,
    )?;
    let train_report = predictor.fit(&merged.feature_matrix(), &merged.targets(), &cfg.train)?;
    artifacts.train_report = Some(train_report);
    let predictor = artifacts.predictor.insert(predictor);

    let predicted = artifacts.predicted.insert(predictor.predict_by_symbol(merged)?);
    let covariance = artifacts
      .covariance
      .insert(estimate_covariance(&merged.return_history(), &cfg.covariance)?);

    let engine = AllocationEngine::new(cfg.allocation.clone());
    let allocation = artifacts.allocation.insert(engine.allocate(predicted, covariance)?);
    let weights = allocation.result.weights.clone();

    let backtest = run_backtest(&weights, returns, &inputs.benchmark, &cfg.backtest)?;
    artifacts.backtest = Some(backtest.clone());

    let baseline = match &artifacts.baseline {
      Some(equal) => {
        let report = run_backtest(equal, returns, &inputs.benchmark, &cfg.backtest)?;
        info!(baseline_cagr = report.portfolio_cagr, "Backtested equal-weight baseline");
        artifacts.baseline_backtest = Some(report.clone());
        Some(report)
      }
      None => None,
    };

    if backtest.portfolio_cagr < backtest.benchmark_cagr {
      warn!(
        portfolio = backtest.portfolio_cagr,
        benchmark = backtest.benchmark_cagr,
        "Optimized portfolio trails the benchmark"
      );
    }

    Ok(PipelineReport {
      weights,
      allocation: allocation.result.clone(),
      backtest,
      baseline,
      dropped_from_predictions: allocation.reconciled.dropped_from_predictions.clone(),
      dropped_from_covariance: allocation.reconciled.dropped_from_covariance.clone(),
      excluded_from_covariance: covariance.excluded.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::Duration;
  use chrono::NaiveDate;
  use rand::Rng;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use tracing_test::traced_test;

  use super::*;
  use crate::config::TrainConfig;
  use crate::data::FundamentalsRow;
  use crate::error::PipelineError;
  use crate::error::Stage;

  const SYMBOLS: [&str; 5] = ["AAA", "BBB", "CCC", "DDD", "EEE"];

  fn day(i: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + Duration::days(i)
  }

  fn inputs(bench_offset: i64) -> PipelineInputs {
    let mut rng = StdRng::seed_from_u64(99);
    let fundamentals = FundamentalsTable::new(
      vec!["totalEsg".into(), "highestControversy".into(), "beta".into()],
      SYMBOLS
        .iter()
        .enumerate()
        .map(|(i, s)| FundamentalsRow {
          symbol: s.to_string(),
          sector: None,
          values: vec![15.0 + 3.0 * i as f64, (i % 3) as f64, 0.8 + 0.1 * i as f64],
        })
        .collect(),
    )
    .unwrap();

    let dates: Vec<NaiveDate> = (0..80).map(day).collect();
    let rows: Vec<(String, Vec<f64>)> = SYMBOLS
      .iter()
      .enumerate()
      .map(|(i, s)| {
        let mut p = 50.0 + 10.0 * i as f64;
        let series = dates
          .iter()
          .map(|_| {
            p *= 1.0 + 0.0005 * i as f64 + rng.gen_range(-0.02..0.02);
            p
          })
          .collect();
        (s.to_string(), series)
      })
      .collect();
    let prices = PriceHistory::from_symbol_rows(&dates, &rows).unwrap();

    let mut level = 3700.0;
    let benchmark = BenchmarkSeries::new(
      (0..80)
        .map(|i| {
          level *= 1.0 + rng.gen_range(-0.01..0.012);
          (day(i + bench_offset), level)
        })
        .collect(),
    );

    PipelineInputs {
      fundamentals,
      prices,
      benchmark,
    }
  }

  fn inputs_with_gap() -> PipelineInputs {
    let mut inputs = inputs(0);
    let mut rows = inputs.fundamentals.rows().to_vec();
    rows[0].values[2] = f64::NAN;
    inputs.fundamentals = FundamentalsTable::new(inputs.fundamentals.columns().to_vec(), rows).unwrap();
    inputs
  }

  fn config() -> PipelineConfig {
    PipelineConfig {
      train: TrainConfig {
        epochs: 3,
        hidden: vec![8, 4],
        ..TrainConfig::default()
      },
      ..PipelineConfig::default()
    }
  }

  #[test]
  #[traced_test]
  fn run_produces_valid_weights_and_backtest() {
    let mut artifacts = PipelineArtifacts::default();
    let report = Pipeline::new(config()).run(&inputs(0), &mut artifacts).unwrap();

    assert_abs_diff_eq!(report.weights.sum(), 1.0, epsilon = 1e-6);
    assert!(report.weights.iter().all(|(_, w)| w >= 0.0));
    assert_eq!(report.weights.len(), 5);
    assert_eq!(report.backtest.portfolio.dates, report.backtest.benchmark.dates);
    assert!(report.backtest.portfolio_cagr.is_finite());
    assert!(report.baseline.is_none());
    assert_eq!(artifacts.train_report.as_ref().unwrap().epochs.len(), 3);
    assert!(artifacts.predictor.as_ref().unwrap().is_fitted());
    assert!(logs_contain("Reconciled predictions with covariance"));
  }

  #[test]
  fn screen_narrows_universe_and_adds_baseline() {
    let mut cfg = config();
    cfg.screen.enabled = true;
    cfg.screen.max_controversy = 2.0;
    cfg.screen.min_esg_quantile = 0.0;
    let mut artifacts = PipelineArtifacts::default();
    let report = Pipeline::new(cfg).run(&inputs(0), &mut artifacts).unwrap();

    assert_eq!(artifacts.universe.as_ref().unwrap().len(), 5);
    assert_eq!(artifacts.baseline.as_ref().unwrap().len(), 5);
    assert!(report.baseline.is_some());
  }

  #[test]
  fn failure_keeps_earlier_artifacts() {
    let mut artifacts = PipelineArtifacts::default();
    let err = Pipeline::new(config())
      .run(&inputs(1000), &mut artifacts)
      .unwrap_err();
    let typed = err.downcast_ref::<PipelineError>().unwrap();
    assert_eq!(typed.stage(), Some(Stage::Backtest));
    assert!(matches!(typed, PipelineError::DataAlignment { .. }));
    assert!(artifacts.predictor.is_some());
    assert!(artifacts.allocation.is_some());
    assert!(artifacts.backtest.is_none());
  }

  #[test]
  fn full_fit_scope_imputes_merged_table() {
    let mut cfg = config();
    cfg.train.fit_scope = FitScope::Full;
    let mut artifacts = PipelineArtifacts::default();
    Pipeline::new(cfg).run(&inputs_with_gap(), &mut artifacts).unwrap();
    let merged = artifacts.merged.unwrap();
    assert!(merged.records().iter().all(|r| r.features.iter().all(|v| v.is_finite())));
  }

  #[test]
  fn train_fit_scope_keeps_validation_rows_out_of_imputation() {
    let mut artifacts = PipelineArtifacts::default();
    Pipeline::new(config()).run(&inputs_with_gap(), &mut artifacts).unwrap();

    // The merged table stays raw, the predictor imputes from its training rows.
    let merged = artifacts.merged.as_ref().unwrap();
    assert!(merged.records().iter().any(|r| r.features[2].is_nan()));
    assert!(artifacts.predictor.as_ref().unwrap().imputer().is_some());
    let predicted = artifacts.predicted.as_ref().unwrap();
    assert!(predicted.iter().all(|(_, p)| p.is_finite()));
  }
}
