//! # Quant
//!
//! $$
//! V_T=\prod_{t\le T}\left(1+\mathbf w^\top\mathbf r_t\right)
//! $$
//!
//! Risk model, allocation and backtest stages.

pub mod backtest;
pub mod portfolio;
