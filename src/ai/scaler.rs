//! # Standard Scaler
//!
//! $$
//! z_{ij}=\frac{x_{ij}-\mu_j}{s_j},\qquad s_j=\begin{cases}\sigma_j&\sigma_j>0\\1&\sigma_j=0\end{cases}
//! $$
//!
//! Per-column standardization with population statistics. A constant column
//! keeps scale 1 and maps to 0.

use anyhow::Result;
use anyhow::bail;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

const MIN_SCALE: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq)]
pub struct StandardScaler {
  mean: Array1<f64>,
  scale: Array1<f64>,
}

impl StandardScaler {
  pub fn fit(data: &Array2<f64>) -> Result<Self> {
    if data.nrows() == 0 || data.ncols() == 0 {
      bail!("cannot fit StandardScaler on an empty matrix");
    }
    if data.iter().any(|v| !v.is_finite()) {
      bail!("StandardScaler needs finite inputs, impute first");
    }
    let Some(mean) = data.mean_axis(Axis(0)) else {
      bail!("cannot fit StandardScaler on an empty matrix");
    };
    let scale = data
      .std_axis(Axis(0), 0.0)
      .mapv(|s| if s > MIN_SCALE { s } else { 1.0 });
    Ok(Self { mean, scale })
  }

  pub fn from_parts(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
    if mean.len() != scale.len() {
      bail!("scaler mean has {} entries, scale {}", mean.len(), scale.len());
    }
    if scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
      bail!("scaler scale entries must be finite and positive");
    }
    Ok(Self {
      mean: Array1::from(mean),
      scale: Array1::from(scale),
    })
  }

  pub fn mean(&self) -> &Array1<f64> {
    &self.mean
  }

  pub fn scale(&self) -> &Array1<f64> {
    &self.scale
  }

  pub fn width(&self) -> usize {
    self.mean.len()
  }

  pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
    if data.ncols() != self.width() {
      bail!("input width mismatch for StandardScaler::transform");
    }
    Ok((data - &self.mean) / &self.scale)
  }

  pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
    if data.ncols() != self.width() {
      bail!("input width mismatch for StandardScaler::inverse_transform");
    }
    Ok(data * &self.scale + &self.mean)
  }
}
