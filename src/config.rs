//! # Configuration
//!
//! Per-stage settings with reference defaults, loadable from a TOML file
//! where every section is optional.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;
use crate::error::Result;

/// Which rows the median imputer and the feature scaler are fit on. One
/// setting drives both the merged-table imputation and the predictor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitScope {
  /// Fit on every merged row, validation rows included.
  Full,
  /// Split first, fit on the training partition only.
  #[default]
  Train,
}

/// Rebalancing cadence of the backtest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rebalance {
  /// Weights computed once and held for the whole window.
  #[default]
  Static,
}

/// Training hyper-parameters of the return predictor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
  pub validation_ratio: f64,
  pub batch_size: usize,
  pub epochs: usize,
  pub learning_rate: f64,
  pub random_seed: u64,
  pub shuffle: bool,
  pub hidden: Vec<usize>,
  /// Also decides whether the merged table is median-imputed over all rows.
  pub fit_scope: FitScope,
  /// Draw an indicatif progress bar over epochs.
  pub progress: bool,
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self {
      validation_ratio: 0.2,
      batch_size: 16,
      epochs: 10,
      learning_rate: 1e-3,
      random_seed: 42,
      shuffle: true,
      hidden: vec![64, 32],
      fit_scope: FitScope::Train,
      progress: false,
    }
  }
}

/// Estimation window of the covariance estimator. `None` bounds are open.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CovarianceConfig {
  pub start: Option<NaiveDate>,
  pub end: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
  /// Risk aversion λ in `rᵀw − λ·wᵀΣw`.
  pub risk_aversion: f64,
  /// Smallest reconciled universe the pipeline will optimize over.
  pub min_universe: usize,
}

impl Default for AllocationConfig {
  fn default() -> Self {
    Self {
      risk_aversion: 0.5,
      min_universe: 2,
    }
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
  pub start: Option<NaiveDate>,
  pub end: Option<NaiveDate>,
  pub rebalance: Rebalance,
}

/// ESG screen thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
  pub enabled: bool,
  /// Quantile of `totalEsg` a symbol must reach (0.5 = median).
  pub min_esg_quantile: f64,
  pub max_controversy: f64,
}

impl Default for ScreenConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      min_esg_quantile: 0.5,
      max_controversy: 2.0,
    }
  }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub screen: ScreenConfig,
  pub train: TrainConfig,
  pub covariance: CovarianceConfig,
  pub allocation: AllocationConfig,
  pub backtest: BacktestConfig,
}

impl PipelineConfig {
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let config: Self = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    info!("Loading configuration from {}", path.display());
    let content = fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn validate(&self) -> Result<()> {
    let t = &self.train;
    if !(0.0..1.0).contains(&t.validation_ratio) {
      return Err(PipelineError::InvalidInput(
        "train.validation_ratio must be in [0,1)".into(),
      ));
    }
    if t.batch_size == 0 {
      return Err(PipelineError::InvalidInput("train.batch_size must be > 0".into()));
    }
    if t.hidden.is_empty() || t.hidden.contains(&0) {
      return Err(PipelineError::InvalidInput(
        "train.hidden must list at least one non-zero width".into(),
      ));
    }
    let a = &self.allocation;
    if !a.risk_aversion.is_finite() || a.risk_aversion < 0.0 {
      return Err(PipelineError::InvalidInput(
        "allocation.risk_aversion must be finite and >= 0".into(),
      ));
    }
    if !(0.0..=1.0).contains(&self.screen.min_esg_quantile) {
      return Err(PipelineError::InvalidInput(
        "screen.min_esg_quantile must be in [0,1]".into(),
      ));
    }
    for (name, start, end) in [
      ("covariance", self.covariance.start, self.covariance.end),
      ("backtest", self.backtest.start, self.backtest.end),
    ] {
      if let (Some(s), Some(e)) = (start, end) {
        if s > e {
          return Err(PipelineError::InvalidInput(format!(
            "{name}.start {s} is after {name}.end {e}"
          )));
        }
      }
    }
    Ok(())
  }
}
