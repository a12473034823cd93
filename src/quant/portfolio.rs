//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Covariance estimation, symbol reconciliation and long-only mean-variance
//! allocation.

pub mod covariance;
pub mod engine;
pub mod optimizer;
pub mod reconcile;
pub mod types;

pub use covariance::estimate_covariance;
pub use engine::Allocation;
pub use engine::AllocationEngine;
pub use optimizer::optimize_mean_variance;
pub use reconcile::reconcile;
pub use reconcile::Reconciled;
pub use types::AllocationResult;
pub use types::CovarianceMatrix;
pub use types::PortfolioWeights;
pub use types::PredictedReturns;
