//! # Errors
//!
//! Error taxonomy for the allocation pipeline. Every numerical failure names
//! the stage it came from and the symbol/date counts it saw.

use std::fmt::Display;

use thiserror::Error;

/// Pipeline stage that raised an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  Screen,
  Merge,
  Predict,
  Covariance,
  Reconcile,
  Allocate,
  Backtest,
}

impl Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Stage::Screen => write!(f, "screen"),
      Stage::Merge => write!(f, "merge"),
      Stage::Predict => write!(f, "predict"),
      Stage::Covariance => write!(f, "covariance"),
      Stage::Reconcile => write!(f, "reconcile"),
      Stage::Allocate => write!(f, "allocate"),
      Stage::Backtest => write!(f, "backtest"),
    }
  }
}

/// Main error type of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
  /// No common symbols or dates survived a join, pivot or intersection.
  #[error("[{stage}] data alignment: {detail} (symbols={symbols}, dates={dates})")]
  DataAlignment {
    stage: Stage,
    detail: String,
    symbols: usize,
    dates: usize,
  },

  /// The data is present but numerically unusable.
  #[error("[{stage}] numeric degeneracy: {detail} (symbols={symbols}, dates={dates})")]
  NumericDegeneracy {
    stage: Stage,
    detail: String,
    symbols: usize,
    dates: usize,
  },

  /// The quadratic program did not converge or produced non-finite weights.
  #[error("[{stage}] solver failed: {detail} after {iterations} iterations")]
  SolverInfeasible {
    stage: Stage,
    detail: String,
    iterations: usize,
  },

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("CSV error: {0}")]
  Csv(#[from] csv::Error),

  #[error("TOML parsing error: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("date parsing error: {0}")]
  DateParse(#[from] chrono::ParseError),
}

impl PipelineError {
  pub fn alignment(stage: Stage, detail: impl Into<String>, symbols: usize, dates: usize) -> Self {
    Self::DataAlignment {
      stage,
      detail: detail.into(),
      symbols,
      dates,
    }
  }

  pub fn degenerate(stage: Stage, detail: impl Into<String>, symbols: usize, dates: usize) -> Self {
    Self::NumericDegeneracy {
      stage,
      detail: detail.into(),
      symbols,
      dates,
    }
  }

  /// Stage the error originated from, if it is one of the numerical kinds.
  pub fn stage(&self) -> Option<Stage> {
    match self {
      Self::DataAlignment { stage, .. }
      | Self::NumericDegeneracy { stage, .. }
      | Self::SolverInfeasible { stage, .. } => Some(*stage),
      _ => None,
    }
  }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
