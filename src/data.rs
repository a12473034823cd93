//! # Data
//!
//! $$
//! r_{s,t}=\frac{P_{s,t}}{P_{s,t-1}}-1
//! $$
//!
//! Tabular inputs of the pipeline and the dataset merger that turns them
//! into one tidy `(symbol, date)` table.

pub mod correlation;
pub mod impute;
pub mod io;
pub mod merge;
pub mod returns;
pub mod table;

pub use correlation::target_correlations;
pub use correlation::FeatureCorrelation;
pub use impute::MedianImputer;
pub use merge::merge_datasets;
pub use merge::merge_returns;
pub use returns::daily_returns;
pub use returns::pct_change;
pub use table::FeatureMatrix;
pub use table::FundamentalsRow;
pub use table::FundamentalsTable;
pub use table::MergedTable;
pub use table::PriceHistory;
pub use table::PriceObservation;
pub use table::ReturnHistory;
pub use table::ReturnObservation;
pub use table::ReturnPanel;
pub use table::SymbolRecord;
