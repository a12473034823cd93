//! # Return Predictor
//!
//! $$
//! \hat r = W_{L+1}\,\mathrm{ReLU}\!\big(W_L\cdots\mathrm{ReLU}(W_1 \mathbf z+b_1)\cdots+b_L\big)+b_{L+1}
//! $$
//!
//! Feed-forward regressor (64 → 32 → 1 by default) trained with MSE on the
//! realized daily return of each merged row. Imputation medians and scaler
//! statistics are part of the fitted model and persisted with it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use candle_core::DType;
use candle_core::Device;
use candle_core::Tensor;
use candle_nn::AdamW;
use candle_nn::Linear;
use candle_nn::Module;
use candle_nn::Optimizer;
use candle_nn::ParamsAdamW;
use candle_nn::VarBuilder;
use candle_nn::VarMap;
use candle_nn::linear;
use indicatif::ProgressBar;
use indicatif::ProgressStyle;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;
use tracing::info;

use super::scaler::StandardScaler;
use crate::config::FitScope;
use crate::config::TrainConfig;
use crate::data::FeatureMatrix;
use crate::data::MedianImputer;
use crate::data::MergedTable;
use crate::error::PipelineError;
use crate::error::Stage;
use crate::quant::portfolio::PredictedReturns;

pub const MODEL_ID: &str = "esg-return-mlp";

const META_FILE: &str = "metadata.txt";
const WEIGHTS_FILE: &str = "weights.safetensors";
const LIST_SEP: &str = "|";

#[derive(Clone, Debug)]
pub struct EpochMetrics {
  pub epoch: usize,
  pub train_mse: f32,
  pub train_mae: f32,
  /// `None` when the validation partition is empty.
  pub val_mse: Option<f32>,
  pub val_mae: Option<f32>,
}

#[derive(Clone, Debug, Default)]
pub struct TrainReport {
  pub epochs: Vec<EpochMetrics>,
  pub train_rows: usize,
  pub validation_rows: usize,
}

impl TrainReport {
  pub fn last(&self) -> Option<&EpochMetrics> {
    self.epochs.last()
  }
}

struct Mlp {
  hidden: Vec<Linear>,
  out: Linear,
}

impl Mlp {
  fn new(vs: VarBuilder, input_dim: usize, widths: &[usize]) -> Result<Self> {
    let mut hidden = Vec::with_capacity(widths.len());
    let mut fan_in = input_dim;
    for (i, &w) in widths.iter().enumerate() {
      hidden.push(linear(fan_in, w, vs.pp(layer_name(i)))?);
      fan_in = w;
    }
    let out = linear(fan_in, 1, vs.pp(layer_name(widths.len())))?;
    Ok(Self { hidden, out })
  }
}

impl Module for Mlp {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let mut x = xs.clone();
    for layer in &self.hidden {
      x = layer.forward(&x)?.relu()?;
    }
    self.out.forward(&x)
  }
}

fn layer_name(i: usize) -> String {
  format!("dense_{}", i + 1)
}

pub struct ReturnPredictor {
  device: Device,
  varmap: VarMap,
  model: Mlp,
  columns: Vec<String>,
  widths: Vec<usize>,
  imputer: Option<MedianImputer>,
  scaler: Option<StandardScaler>,
}

impl ReturnPredictor {
  /// Untrained network over `columns`, initialized from `seed`.
  pub fn new(columns: Vec<String>, widths: &[usize], seed: u64, device: &Device) -> Result<Self> {
    if columns.is_empty() {
      bail!("the predictor needs at least one feature column");
    }
    if widths.is_empty() || widths.contains(&0) {
      bail!("hidden widths must be non-empty and non-zero");
    }
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = Mlp::new(vs, columns.len(), widths)?;
    let mut predictor = Self {
      device: device.clone(),
      varmap,
      model,
      columns,
      widths: widths.to_vec(),
      imputer: None,
      scaler: None,
    };
    predictor.reseed(seed)?;
    Ok(predictor)
  }

  /// Overwrite every parameter with `U(-1/√fan_in, 1/√fan_in)` draws.
  fn reseed(&mut self, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fan_in = self.columns.len();
    let mut dims: Vec<(usize, usize)> = Vec::with_capacity(self.widths.len() + 1);
    for &w in &self.widths {
      dims.push((w, fan_in));
      fan_in = w;
    }
    dims.push((1, fan_in));

    for (i, (out_dim, in_dim)) in dims.into_iter().enumerate() {
      let bound = 1.0 / (in_dim as f32).sqrt();
      let weight: Vec<f32> = (0..out_dim * in_dim)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();
      let bias: Vec<f32> = (0..out_dim).map(|_| rng.gen_range(-bound..bound)).collect();
      let name = layer_name(i);
      self.varmap.set_one(
        format!("{name}.weight"),
        Tensor::from_vec(weight, (out_dim, in_dim), &self.device)?,
      )?;
      self
        .varmap
        .set_one(format!("{name}.bias"), Tensor::from_vec(bias, out_dim, &self.device)?)?;
    }
    Ok(())
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn widths(&self) -> &[usize] {
    &self.widths
  }

  pub fn is_fitted(&self) -> bool {
    self.imputer.is_some() && self.scaler.is_some()
  }

  pub fn imputer(&self) -> Option<&MedianImputer> {
    self.imputer.as_ref()
  }

  pub fn scaler(&self) -> Option<&StandardScaler> {
    self.scaler.as_ref()
  }

  fn check_columns(&self, features: &FeatureMatrix) -> Result<()> {
    if features.columns != self.columns {
      bail!(
        "feature columns {:?} do not match the model's {:?}",
        features.columns,
        self.columns
      );
    }
    Ok(())
  }

  /// Train on `features` → `targets`. The imputer and scaler are fit on the
  /// training partition, or on every row under [`FitScope::Full`].
  pub fn fit(&mut self, features: &FeatureMatrix, targets: &Array1<f64>, cfg: &TrainConfig) -> Result<TrainReport> {
    self.check_columns(features)?;
    let n = features.nrows();
    if n != targets.len() {
      bail!("{n} feature rows for {} targets", targets.len());
    }
    if n == 0 {
      return Err(PipelineError::alignment(Stage::Predict, "no training rows", 0, 0).into());
    }
    if cfg.batch_size == 0 {
      bail!("batch_size must be > 0");
    }
    if !(0.0..1.0).contains(&cfg.validation_ratio) {
      bail!("validation_ratio must be in [0,1)");
    }

    let (train_idx, val_idx) = train_validation_split(n, cfg.validation_ratio, cfg.random_seed);
    let fit_rows = match cfg.fit_scope {
      FitScope::Full => features.values.clone(),
      FitScope::Train => features.values.select(Axis(0), &train_idx),
    };
    let imputer = MedianImputer::fit(&fit_rows);
    let scaler = StandardScaler::fit(&imputer.transform(&fit_rows)?)?;

    let z = scaler.transform(&imputer.transform(&features.values)?)?;
    let x_train = z.select(Axis(0), &train_idx).mapv(|v| v as f32);
    let x_val = z.select(Axis(0), &val_idx).mapv(|v| v as f32);
    let y = targets.mapv(|v| v as f32).insert_axis(Axis(1));
    let y_train = y.select(Axis(0), &train_idx);
    let y_val = y.select(Axis(0), &val_idx);

    self.imputer = Some(imputer);
    self.scaler = Some(scaler);

    let optimizer_params = ParamsAdamW {
      lr: cfg.learning_rate,
      beta1: 0.9,
      beta2: 0.999,
      eps: 1e-7,
      weight_decay: 0.0,
    };
    let mut opt = AdamW::new(self.varmap.all_vars(), optimizer_params)?;

    let progress = if cfg.progress {
      let pb = ProgressBar::new(cfg.epochs as u64);
      pb.set_style(
        ProgressStyle::default_bar()
          .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] epoch {pos}/{len} {msg}")?
          .progress_chars("#>-"),
      );
      Some(pb)
    } else {
      None
    };

    let mut report = TrainReport {
      epochs: Vec::with_capacity(cfg.epochs),
      train_rows: train_idx.len(),
      validation_rows: val_idx.len(),
    };
    let mut order: Vec<usize> = (0..x_train.nrows()).collect();
    let mut rng = StdRng::seed_from_u64(cfg.random_seed ^ 0xABCD_1234_EF98_7654);

    for epoch in 1..=cfg.epochs {
      if cfg.shuffle {
        order.shuffle(&mut rng);
      }

      for batch_idx in order.chunks(cfg.batch_size) {
        let xb = array2_to_tensor(&x_train.select(Axis(0), batch_idx), &self.device)?;
        let yb = array2_to_tensor(&y_train.select(Axis(0), batch_idx), &self.device)?;
        let pred = self.model.forward(&xb)?;
        let loss = candle_nn::loss::mse(&pred, &yb)?;
        opt.backward_step(&loss)?;
      }

      let (train_mse, train_mae) = evaluate(&self.model, &x_train, &y_train, &self.device)?;
      let (val_mse, val_mae) = if x_val.nrows() > 0 {
        let (mse, mae) = evaluate(&self.model, &x_val, &y_val, &self.device)?;
        (Some(mse), Some(mae))
      } else {
        (None, None)
      };
      debug!(epoch, train_mse, train_mae, ?val_mse, ?val_mae, "Epoch finished");
      if let Some(pb) = &progress {
        pb.set_message(format!("loss {train_mse:.3e}"));
        pb.inc(1);
      }
      report.epochs.push(EpochMetrics {
        epoch,
        train_mse,
        train_mae,
        val_mse,
        val_mae,
      });
    }

    if let Some(pb) = progress {
      pb.finish_and_clear();
    }
    if let Some(last) = report.last() {
      info!(
        epochs = cfg.epochs,
        train_rows = report.train_rows,
        validation_rows = report.validation_rows,
        train_mse = last.train_mse,
        val_mse = ?last.val_mse,
        "Trained return predictor"
      );
    }
    Ok(report)
  }

  /// One prediction per feature row.
  pub fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
    let (imputer, scaler) = match (&self.imputer, &self.scaler) {
      (Some(i), Some(s)) => (i, s),
      _ => bail!("model is not trained or loaded (missing imputer/scaler)"),
    };
    self.check_columns(features)?;
    if features.nrows() == 0 {
      return Ok(Vec::new());
    }
    let z = scaler.transform(&imputer.transform(&features.values)?)?;
    let xt = array2_to_tensor(&z.mapv(|v| v as f32), &self.device)?;
    let yt = self.model.forward(&xt)?;
    Ok(
      yt.to_vec2::<f32>()?
        .into_iter()
        .flatten()
        .map(f64::from)
        .collect(),
    )
  }

  /// Mean prediction per symbol over the merged rows.
  pub fn predict_by_symbol(&self, merged: &MergedTable) -> Result<PredictedReturns> {
    let predictions = self.predict(&merged.feature_matrix())?;
    Ok(PredictedReturns::from_rows(&merged.row_symbols(), &predictions)?)
  }

  pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
    let (imputer, scaler) = match (&self.imputer, &self.scaler) {
      (Some(i), Some(s)) => (i, s),
      _ => bail!("cannot save an untrained model (missing imputer/scaler)"),
    };
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create directory {dir:?}"))?;

    self
      .varmap
      .save(dir.join(WEIGHTS_FILE))
      .with_context(|| format!("failed to save weights to {:?}", dir.join(WEIGHTS_FILE)))?;

    let meta = serialize_metadata(&self.columns, &self.widths, imputer, scaler);
    fs::write(dir.join(META_FILE), meta)
      .with_context(|| format!("failed to write metadata to {:?}", dir.join(META_FILE)))?;
    info!("Saved return predictor to {}", dir.display());
    Ok(())
  }

  pub fn load<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
    let dir = dir.as_ref();
    let meta_path = dir.join(META_FILE);
    let content = fs::read_to_string(&meta_path)
      .with_context(|| format!("failed to read metadata from {meta_path:?}"))?;
    let parsed = parse_metadata(&content)?;

    let model_id = field(&parsed, "model_id")?;
    if model_id != MODEL_ID {
      bail!("metadata model_id '{model_id}' does not match expected '{MODEL_ID}'");
    }
    let input_dim: usize = field(&parsed, "input_dim")?
      .parse()
      .context("failed to parse metadata field 'input_dim'")?;
    let widths = field(&parsed, "hidden")?
      .split(',')
      .map(|v| v.parse::<usize>().context("failed to parse metadata field 'hidden'"))
      .collect::<Result<Vec<usize>>>()?;
    let columns: Vec<String> = field(&parsed, "columns")?
      .split(LIST_SEP)
      .map(str::to_string)
      .collect();
    let medians = parse_f64_list(&parsed, "medians")?;
    let mean = parse_f64_list(&parsed, "scaler_mean")?;
    let scale = parse_f64_list(&parsed, "scaler_scale")?;

    if columns.len() != input_dim || medians.len() != input_dim || mean.len() != input_dim {
      bail!("metadata widths disagree with input_dim={input_dim}");
    }

    let mut model = Self::new(columns, &widths, 0, device)?;
    model.imputer = Some(MedianImputer::from_medians(medians));
    model.scaler = Some(StandardScaler::from_parts(mean, scale)?);
    model
      .varmap
      .load(dir.join(WEIGHTS_FILE))
      .with_context(|| format!("failed to load weights from {:?}", dir.join(WEIGHTS_FILE)))?;
    Ok(model)
  }
}

/// Seeded shuffle, the first `round(n·ratio)` indices become validation rows.
/// At least one training row is always kept.
pub fn train_validation_split(n: usize, validation_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
  let mut idx: Vec<usize> = (0..n).collect();
  let mut rng = StdRng::seed_from_u64(seed);
  idx.shuffle(&mut rng);

  let n_val = ((n as f64) * validation_ratio).round() as usize;
  let n_val = n_val.min(n.saturating_sub(1));
  let val = idx[..n_val].to_vec();
  let train = idx[n_val..].to_vec();
  (train, val)
}

fn evaluate(model: &Mlp, x: &Array2<f32>, y: &Array2<f32>, device: &Device) -> Result<(f32, f32)> {
  let xt = array2_to_tensor(x, device)?;
  let yt = array2_to_tensor(y, device)?;
  let pred = model.forward(&xt)?;
  let mse = candle_nn::loss::mse(&pred, &yt)?.to_scalar::<f32>()?;
  let mae = pred.sub(&yt)?.abs()?.mean_all()?.to_scalar::<f32>()?;
  Ok((mse, mae))
}

fn array2_to_tensor(arr: &Array2<f32>, device: &Device) -> Result<Tensor> {
  let slice = arr
    .as_slice()
    .ok_or_else(|| anyhow!("Array2 must be contiguous"))?;
  Ok(Tensor::from_slice(slice, (arr.nrows(), arr.ncols()), device)?)
}

fn serialize_metadata(
  columns: &[String],
  widths: &[usize],
  imputer: &MedianImputer,
  scaler: &StandardScaler,
) -> String {
  let mut out = String::new();
  out.push_str("version=1\n");
  out.push_str(&format!("model_id={MODEL_ID}\n"));
  out.push_str(&format!("input_dim={}\n", columns.len()));
  out.push_str(&format!(
    "hidden={}\n",
    widths.iter().map(usize::to_string).collect::<Vec<_>>().join(",")
  ));
  out.push_str(&format!("columns={}\n", columns.join(LIST_SEP)));
  out.push_str(&format!("medians={}\n", join_f64(imputer.medians())));
  out.push_str(&format!("scaler_mean={}\n", join_f64(&scaler.mean().to_vec())));
  out.push_str(&format!("scaler_scale={}\n", join_f64(&scaler.scale().to_vec())));
  out
}

fn parse_metadata(s: &str) -> Result<HashMap<String, String>> {
  let mut out = HashMap::new();
  for line in s.lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let (k, v) = line
      .split_once('=')
      .ok_or_else(|| anyhow!("invalid metadata line: {line}"))?;
    out.insert(k.trim().to_string(), v.trim().to_string());
  }
  Ok(out)
}

fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
  map
    .get(key)
    .map(String::as_str)
    .ok_or_else(|| anyhow!("missing '{key}' in metadata"))
}

fn parse_f64_list(map: &HashMap<String, String>, key: &str) -> Result<Vec<f64>> {
  let raw = field(map, key)?;
  if raw.is_empty() {
    return Ok(Vec::new());
  }
  raw
    .split(',')
    .map(|v| {
      v.parse::<f64>()
        .with_context(|| format!("failed to parse a float in metadata field '{key}'"))
    })
    .collect()
}

/// Shortest round-trip representation, so a reload reproduces the statistics exactly.
fn join_f64(values: &[f64]) -> String {
  values
    .iter()
    .map(|v| format!("{v:?}"))
    .collect::<Vec<String>>()
    .join(",")
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn synthetic(n: usize, seed: u64) -> (FeatureMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Array2::<f64>::zeros((n, 3));
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
      let a: f64 = rng.gen_range(-1.0..1.0);
      let b: f64 = rng.gen_range(10.0..30.0);
      values[[i, 0]] = a;
      values[[i, 1]] = b;
      values[[i, 2]] = 7.0;
      y[i] = 0.01 * a - 0.0005 * (b - 20.0);
    }
    (
      FeatureMatrix {
        columns: vec!["beta".into(), "totalEsg".into(), "constant".into()],
        values,
      },
      y,
    )
  }

  fn small_config() -> TrainConfig {
    TrainConfig {
      epochs: 30,
      hidden: vec![8, 4],
      learning_rate: 5e-3,
      ..TrainConfig::default()
    }
  }

  #[test]
  fn split_is_deterministic_and_disjoint() {
    let (t1, v1) = train_validation_split(50, 0.2, 7);
    let (t2, v2) = train_validation_split(50, 0.2, 7);
    assert_eq!((t1.clone(), v1.clone()), (t2, v2));
    assert_eq!(v1.len(), 10);
    assert_eq!(t1.len(), 40);
    assert!(v1.iter().all(|i| !t1.contains(i)));
    let (t, v) = train_validation_split(1, 0.5, 7);
    assert_eq!((t.len(), v.len()), (1, 0));
  }

  #[test]
  fn training_is_reproducible_and_reduces_loss() {
    let (x, y) = synthetic(120, 3);
    let cfg = small_config();
    let mut a = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, cfg.random_seed, &Device::Cpu).unwrap();
    let mut b = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, cfg.random_seed, &Device::Cpu).unwrap();
    let ra = a.fit(&x, &y, &cfg).unwrap();
    let rb = b.fit(&x, &y, &cfg).unwrap();

    assert_eq!(ra.epochs.len(), 30);
    assert_eq!((ra.train_rows, ra.validation_rows), (96, 24));
    assert!(ra.epochs.iter().all(|e| e.val_mse.is_some()));
    for (pa, pb) in a.predict(&x).unwrap().iter().zip(b.predict(&x).unwrap()) {
      assert_abs_diff_eq!(*pa, pb, epsilon = 1e-6);
    }
    let first = ra.epochs[0].train_mse;
    let last = ra.last().unwrap().train_mse;
    assert!(last.is_finite() && first.is_finite());
    assert!(last < first, "train mse went from {first} to {last}");
    assert_abs_diff_eq!(first, rb.epochs[0].train_mse, epsilon = 1e-6);
  }

  #[test]
  fn constant_column_does_not_poison_predictions() {
    let (x, y) = synthetic(40, 5);
    let cfg = small_config();
    let mut model = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, 1, &Device::Cpu).unwrap();
    model.fit(&x, &y, &cfg).unwrap();
    assert_eq!(model.scaler().unwrap().scale()[2], 1.0);
    assert!(model.predict(&x).unwrap().iter().all(|p| p.is_finite()));
  }

  #[test]
  fn missing_features_are_imputed_with_fitted_medians() {
    let (mut x, y) = synthetic(40, 9);
    x.values[[0, 0]] = f64::NAN;
    let cfg = TrainConfig {
      fit_scope: FitScope::Full,
      ..small_config()
    };
    let mut model = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, 1, &Device::Cpu).unwrap();
    model.fit(&x, &y, &cfg).unwrap();
    let unseen = FeatureMatrix {
      columns: x.columns.clone(),
      values: array![[f64::NAN, f64::NAN, f64::NAN]],
    };
    let p = model.predict(&unseen).unwrap();
    assert_eq!(p.len(), 1);
    assert!(p[0].is_finite());
  }

  #[test]
  fn save_and_load_reproduce_predictions() {
    let (x, y) = synthetic(60, 11);
    let cfg = small_config();
    let mut model = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, 42, &Device::Cpu).unwrap();
    model.fit(&x, &y, &cfg).unwrap();

    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();
    let loaded = ReturnPredictor::load(dir.path(), &Device::Cpu).unwrap();

    assert_eq!(loaded.columns(), model.columns());
    assert_eq!(loaded.widths(), &[8, 4]);
    assert_eq!(loaded.imputer(), model.imputer());
    assert_eq!(loaded.scaler(), model.scaler());
    let before = model.predict(&x).unwrap();
    let after = loaded.predict(&x).unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
      assert_abs_diff_eq!(*b, *a, epsilon = 1e-9);
    }
  }

  #[test]
  fn load_rejects_foreign_model_id() {
    let (x, y) = synthetic(20, 13);
    let cfg = small_config();
    let mut model = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, 42, &Device::Cpu).unwrap();
    model.fit(&x, &y, &cfg).unwrap();
    let dir = tempfile::tempdir().unwrap();
    model.save(dir.path()).unwrap();

    let meta = dir.path().join(META_FILE);
    let content = fs::read_to_string(&meta).unwrap();
    fs::write(&meta, content.replace(MODEL_ID, "something-else")).unwrap();
    assert!(ReturnPredictor::load(dir.path(), &Device::Cpu).is_err());
  }

  #[test]
  fn predict_requires_a_fitted_model_and_matching_columns() {
    let (x, y) = synthetic(20, 17);
    let cfg = small_config();
    let mut model = ReturnPredictor::new(x.columns.clone(), &cfg.hidden, 42, &Device::Cpu).unwrap();
    assert!(model.predict(&x).is_err());
    model.fit(&x, &y, &cfg).unwrap();
    let renamed = FeatureMatrix {
      columns: vec!["a".into(), "b".into(), "c".into()],
      values: x.values.clone(),
    };
    assert!(model.predict(&renamed).is_err());
  }
}
