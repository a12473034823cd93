//! # AI
//!
//! $$
//! \mathcal L(\theta)=\frac1n\sum_{i=1}^n\big(f_\theta(\mathbf z_i)-r_i\big)^2
//! $$
//!
//! Candle-based return predictor and the feature scaler it owns.

pub mod predictor;
pub mod scaler;

pub use predictor::EpochMetrics;
pub use predictor::ReturnPredictor;
pub use predictor::TrainReport;
pub use predictor::train_validation_split;
pub use scaler::StandardScaler;
