//! # Allocation Optimizer
//!
//! $$
//! \max_{\mathbf w}\ \mathbf r^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ \mathbf w\ge 0
//! $$
//!
//! Solved as the conic QP `min ½wᵀPw + qᵀw` with `P = 2λΣ`, `q = −r`, one
//! zero cone for the budget row and a nonnegative cone for the long-only rows.

use clarabel::algebra::CscMatrix;
use clarabel::solver::SolverStatus;
use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;
use tracing::info;

use super::types::AllocationResult;
use super::types::PortfolioWeights;
use crate::config::AllocationConfig;
use crate::error::PipelineError;
use crate::error::Result;
use crate::error::Stage;

const MAX_SOLVER_ITERATIONS: u32 = 200;

fn objective(r: &Array1<f64>, sigma: &Array2<f64>, lambda: f64, w: &Array1<f64>) -> (f64, f64, f64) {
  let ret = r.dot(w);
  let var = w.dot(&sigma.dot(w));
  (ret - lambda * var, ret, var)
}

fn infeasible(detail: String, iterations: usize) -> PipelineError {
  PipelineError::SolverInfeasible {
    stage: Stage::Allocate,
    detail,
    iterations,
  }
}

/// Anything short of a full solve is infeasible for the pipeline.
fn check_status(status: SolverStatus, iterations: u32) -> Result<()> {
  match status {
    SolverStatus::Solved => Ok(()),
    other => Err(infeasible(
      format!("solver stopped with status {other:?}"),
      iterations as usize,
    )),
  }
}

/// Upper triangle of `2λΣ` in compressed column form.
fn quadratic_term(covariance: &Array2<f64>, lambda: f64) -> CscMatrix<f64> {
  let n = covariance.nrows();
  let mut colptr = vec![0];
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();
  for j in 0..n {
    for i in 0..=j {
      let v = lambda * (covariance[[i, j]] + covariance[[j, i]]);
      if v != 0.0 {
        rowval.push(i);
        nzval.push(v);
      }
    }
    colptr.push(nzval.len());
  }
  CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// Budget row of ones on top of `−I` for the long-only rows.
fn constraint_matrix(n: usize) -> CscMatrix<f64> {
  let mut colptr = vec![0];
  let mut rowval = Vec::new();
  let mut nzval = Vec::new();
  for j in 0..n {
    rowval.push(0);
    nzval.push(1.0);
    rowval.push(1 + j);
    nzval.push(-1.0);
    colptr.push(nzval.len());
  }
  CscMatrix::new(1 + n, n, colptr, rowval, nzval)
}

fn solve_qp(expected: &Array1<f64>, covariance: &Array2<f64>, lambda: f64) -> Result<(Array1<f64>, usize)> {
  use clarabel::solver::*;

  let n = expected.len();
  let p = quadratic_term(covariance, lambda);
  let q: Vec<f64> = expected.iter().map(|r| -r).collect();
  let a = constraint_matrix(n);
  let mut b = vec![1.0];
  b.extend(vec![0.0; n]);
  let cones = [ZeroConeT(1), NonnegativeConeT(n)];

  let settings = DefaultSettingsBuilder::default()
    .max_iter(MAX_SOLVER_ITERATIONS)
    .verbose(false)
    .build()
    .map_err(|e| infeasible(format!("solver settings: {e}"), 0))?;
  let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
    .map_err(|e| infeasible(format!("solver setup: {e:?}"), 0))?;
  solver.solve();

  let iterations = solver.info.iterations;
  check_status(solver.solution.status, iterations)?;

  // Interior-point iterates can sit a hair below zero.
  let mut w: Array1<f64> = solver.solution.x.iter().map(|v| v.max(0.0)).collect();
  let total = w.sum();
  if !(total.is_finite() && total > 0.0) {
    return Err(infeasible(
      format!("solution weights sum to {total}"),
      iterations as usize,
    ));
  }
  w.mapv_inplace(|v| v / total);
  Ok((w, iterations as usize))
}

/// Solve the long-only mean-variance program.
///
/// `expected` and `covariance` must share the index order of `symbols`.
/// A single symbol gets weight exactly `1.0`. Any solver status other than
/// solved, or non-finite input, is reported as
/// [`PipelineError::SolverInfeasible`].
pub fn optimize_mean_variance(
  symbols: &[String],
  expected: &Array1<f64>,
  covariance: &Array2<f64>,
  cfg: &AllocationConfig,
) -> Result<AllocationResult> {
  let n = symbols.len();
  if n == 0 {
    return Err(PipelineError::alignment(
      Stage::Allocate,
      "empty symbol set",
      0,
      0,
    ));
  }
  if expected.len() != n || covariance.dim() != (n, n) {
    return Err(PipelineError::InvalidInput(format!(
      "{n} symbols, {} expected returns, {:?} covariance",
      expected.len(),
      covariance.dim()
    )));
  }
  if expected.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
    return Err(infeasible(
      "non-finite expected return or covariance entry".into(),
      0,
    ));
  }

  let lambda = cfg.risk_aversion;

  if n == 1 {
    let w = Array1::from_elem(1, 1.0);
    let (obj, ret, var) = objective(expected, covariance, lambda, &w);
    return Ok(AllocationResult {
      weights: PortfolioWeights::from_pairs(symbols, &[1.0]),
      expected_return: ret,
      variance: var,
      volatility: var.max(0.0).sqrt(),
      objective: obj,
      iterations: 0,
    });
  }

  let (w, iterations) = solve_qp(expected, covariance, lambda)?;
  let (obj, ret, var) = objective(expected, covariance, lambda, &w);
  debug!(iterations, objective = obj, "Interior-point solve finished");
  info!(
    symbols = n,
    expected_return = ret,
    volatility = var.max(0.0).sqrt(),
    "Solved mean-variance allocation"
  );

  Ok(AllocationResult {
    weights: PortfolioWeights::from_pairs(symbols, &w.to_vec()),
    expected_return: ret,
    variance: var,
    volatility: var.max(0.0).sqrt(),
    objective: obj,
    iterations,
  })
}
