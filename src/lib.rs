//! # esg-portfolio-rs
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta}\ \hat{\mathbf{r}}^\top\mathbf{w}-\lambda\,\mathbf{w}^\top\Sigma\mathbf{w}
//! $$
//!
//! Predictive allocation pipeline: fundamentals/ESG features are merged with
//! daily price history, a feed-forward network forecasts daily returns, the
//! forecasts and a sample covariance feed a long-only mean-variance program,
//! and the resulting static allocation is backtested against an index.
//!
//! | Module              | Description                                                        |
//! |---------------------|--------------------------------------------------------------------|
//! | [`data`]            | Tables, CSV ingestion, the dataset merger, imputation, correlation. |
//! | [`ai`]              | Return predictor (candle MLP) and its feature scaler.              |
//! | [`quant`]           | Covariance, reconciliation, allocation optimizer, backtest.         |
//! | [`screen`]          | ESG screen and equal-weight baseline.                               |
//! | [`pipeline`]        | Stage orchestration with inspectable intermediate artifacts.       |
//! | [`config`]          | Per-stage configuration, TOML loading.                              |
//! | [`error`]           | Typed error taxonomy.                                               |
//! | [`visualization`]   | Plotly diagnostics.                                                 |
//! | [`report`]          | Table rendering for the CLI.                                        |

pub mod ai;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod quant;
pub mod report;
pub mod screen;
pub mod visualization;

pub use error::PipelineError;
pub use error::Stage;
pub use pipeline::Pipeline;
pub use pipeline::PipelineArtifacts;
pub use pipeline::PipelineInputs;
pub use pipeline::PipelineReport;
