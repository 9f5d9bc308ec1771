//! Forecast models
//!
//! `TransformerV3` is a frozen encoder-only transformer evaluated natively with
//! ndarray. It carries no mutable state, so one instance is shared across
//! concurrent requests without locking.

pub mod layers;

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use self::layers::{positional_encoding, relu, EncoderLayer, LayerNorm, Linear, MultiHeadAttention};
use crate::error::{ForecastError, Result};
use crate::ml_engine::persistence::{StateDict, TensorData};
use crate::types::SEQ_LEN;

const LAYER_NORM_EPS: f32 = 1e-5;

/// Architecture hyper-parameters; must match the checkpoint being loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub d_model: usize,
    pub nhead: usize,
    pub num_layers: usize,
    pub dim_feedforward: usize,
    pub series_emb_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            d_model: 256,
            nhead: 8,
            num_layers: 4,
            dim_feedforward: 1024,
            series_emb_dim: 64,
        }
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        if self.d_model == 0 || self.nhead == 0 || self.d_model % self.nhead != 0 {
            return Err(ForecastError::Checkpoint(format!(
                "d_model {} is not divisible by nhead {}",
                self.d_model, self.nhead
            )));
        }
        if self.d_model < 2 {
            return Err(ForecastError::Checkpoint("d_model must be at least 2".into()));
        }
        Ok(())
    }
}

/// Sequence-to-horizon forecaster over one scaled window
pub trait SequenceModel: Send + Sync {
    /// Forecast `pred_len` normalized closes from a `(seq_len, num_features)` window
    fn forward(&self, window: ArrayView2<f32>, series_id: usize) -> Result<Array1<f32>>;
    fn num_series(&self) -> usize;
    fn parameter_count(&self) -> usize;
    fn name(&self) -> &str;
}

/// Transformer encoder with a learned per-series embedding
#[derive(Debug, Clone)]
pub struct TransformerV3 {
    config: ModelConfig,
    num_features: usize,
    pred_len: usize,
    input_proj: Linear,
    layers: Vec<EncoderLayer>,
    series_emb: Array2<f32>,
    head_hidden: Linear,
    head_out: Linear,
    pos_enc: Array2<f32>,
}

impl TransformerV3 {
    /// Build from a checkpoint, consuming every parameter exactly once
    pub fn from_state_dict(
        config: ModelConfig,
        num_features: usize,
        num_series: usize,
        pred_len: usize,
        mut sd: StateDict,
    ) -> Result<Self> {
        config.validate()?;
        let d = config.d_model;
        let ff = config.dim_feedforward;

        let input_proj = take_linear(&mut sd, "input_proj", d, num_features)?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let prefix = format!("transformer.layers.{}", i);
            let self_attn = MultiHeadAttention {
                nhead: config.nhead,
                in_proj_weight: sd.take_matrix(&format!("{}.self_attn.in_proj_weight", prefix), 3 * d, d)?,
                in_proj_bias: sd.take_vector(&format!("{}.self_attn.in_proj_bias", prefix), 3 * d)?,
                out_proj: take_linear(&mut sd, &format!("{}.self_attn.out_proj", prefix), d, d)?,
            };
            layers.push(EncoderLayer {
                self_attn,
                linear1: take_linear(&mut sd, &format!("{}.linear1", prefix), ff, d)?,
                linear2: take_linear(&mut sd, &format!("{}.linear2", prefix), d, ff)?,
                norm1: take_norm(&mut sd, &format!("{}.norm1", prefix), d)?,
                norm2: take_norm(&mut sd, &format!("{}.norm2", prefix), d)?,
            });
        }

        let series_emb = sd.take_matrix("series_emb.weight", num_series, config.series_emb_dim)?;
        let head_hidden = take_linear(&mut sd, "head.0", d / 2, d + config.series_emb_dim)?;
        let head_out = take_linear(&mut sd, "head.3", pred_len, d / 2)?;
        sd.finish()?;

        Ok(Self {
            pos_enc: positional_encoding(SEQ_LEN, d),
            config,
            num_features,
            pred_len,
            input_proj,
            layers,
            series_emb,
            head_hidden,
            head_out,
        })
    }

    /// Seeded random weights, for tests and benchmarks
    pub fn random(
        config: ModelConfig,
        num_features: usize,
        num_series: usize,
        pred_len: usize,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let d = config.d_model;
        let ff = config.dim_feedforward;

        let layers = (0..config.num_layers)
            .map(|_| EncoderLayer {
                self_attn: MultiHeadAttention {
                    nhead: config.nhead,
                    in_proj_weight: uniform(&mut rng, (3 * d, d), d),
                    in_proj_bias: Array1::zeros(3 * d),
                    out_proj: random_linear(&mut rng, d, d),
                },
                linear1: random_linear(&mut rng, ff, d),
                linear2: random_linear(&mut rng, d, ff),
                norm1: unit_norm(d),
                norm2: unit_norm(d),
            })
            .collect();

        Ok(Self {
            pos_enc: positional_encoding(SEQ_LEN, d),
            input_proj: random_linear(&mut rng, d, num_features),
            layers,
            series_emb: uniform(&mut rng, (num_series, config.series_emb_dim), 1),
            head_hidden: random_linear(&mut rng, d / 2, d + config.series_emb_dim),
            head_out: random_linear(&mut rng, pred_len, d / 2),
            config,
            num_features,
            pred_len,
        })
    }

    /// Export the weights under the names `from_state_dict` expects
    pub fn to_state_dict(&self) -> StateDict {
        let mut sd = StateDict::new();
        put_linear(&mut sd, "input_proj", &self.input_proj);
        for (i, layer) in self.layers.iter().enumerate() {
            let prefix = format!("transformer.layers.{}", i);
            sd.insert(
                format!("{}.self_attn.in_proj_weight", prefix),
                TensorData::from_array2(&layer.self_attn.in_proj_weight),
            );
            sd.insert(
                format!("{}.self_attn.in_proj_bias", prefix),
                TensorData::from_array1(&layer.self_attn.in_proj_bias),
            );
            put_linear(&mut sd, &format!("{}.self_attn.out_proj", prefix), &layer.self_attn.out_proj);
            put_linear(&mut sd, &format!("{}.linear1", prefix), &layer.linear1);
            put_linear(&mut sd, &format!("{}.linear2", prefix), &layer.linear2);
            put_norm(&mut sd, &format!("{}.norm1", prefix), &layer.norm1);
            put_norm(&mut sd, &format!("{}.norm2", prefix), &layer.norm2);
        }
        sd.insert("series_emb.weight", TensorData::from_array2(&self.series_emb));
        put_linear(&mut sd, "head.0", &self.head_hidden);
        put_linear(&mut sd, "head.3", &self.head_out);
        sd
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn pred_len(&self) -> usize {
        self.pred_len
    }
}

impl SequenceModel for TransformerV3 {
    fn forward(&self, window: ArrayView2<f32>, series_id: usize) -> Result<Array1<f32>> {
        let (rows, cols) = window.dim();
        if rows == 0 || cols != self.num_features {
            return Err(ForecastError::ShapeMismatch {
                expected_rows: SEQ_LEN,
                expected_cols: self.num_features,
                rows,
                cols,
            });
        }
        if series_id >= self.num_series() {
            return Err(ForecastError::UnknownSeries(format!("series id {}", series_id)));
        }

        let mut x = self.input_proj.forward(&window);
        if rows <= self.pos_enc.nrows() {
            x += &self.pos_enc.slice(ndarray::s![..rows, ..]);
        } else {
            x += &positional_encoding(rows, self.config.d_model);
        }

        for layer in &self.layers {
            x = layer.forward(&x);
        }

        let last = x.row(rows - 1);
        let emb = self.series_emb.row(series_id);
        let joined = concatenate(Axis(0), &[last, emb])
            .map_err(|e| ForecastError::Other(e.into()))?
            .insert_axis(Axis(0));

        let mut hidden = self.head_hidden.forward(&joined.view());
        relu(&mut hidden);
        let out = self.head_out.forward(&hidden.view());
        Ok(out.row(0).to_owned())
    }

    fn num_series(&self) -> usize {
        self.series_emb.nrows()
    }

    fn parameter_count(&self) -> usize {
        self.input_proj.num_parameters()
            + self.layers.iter().map(|l| l.num_parameters()).sum::<usize>()
            + self.series_emb.len()
            + self.head_hidden.num_parameters()
            + self.head_out.num_parameters()
    }

    fn name(&self) -> &str {
        "TransformerV3"
    }
}

fn take_linear(sd: &mut StateDict, prefix: &str, out_features: usize, in_features: usize) -> Result<Linear> {
    Ok(Linear {
        weight: sd.take_matrix(&format!("{}.weight", prefix), out_features, in_features)?,
        bias: sd.take_vector(&format!("{}.bias", prefix), out_features)?,
    })
}

fn take_norm(sd: &mut StateDict, prefix: &str, width: usize) -> Result<LayerNorm> {
    Ok(LayerNorm {
        weight: sd.take_vector(&format!("{}.weight", prefix), width)?,
        bias: sd.take_vector(&format!("{}.bias", prefix), width)?,
        eps: LAYER_NORM_EPS,
    })
}

fn put_linear(sd: &mut StateDict, prefix: &str, layer: &Linear) {
    sd.insert(format!("{}.weight", prefix), TensorData::from_array2(&layer.weight));
    sd.insert(format!("{}.bias", prefix), TensorData::from_array1(&layer.bias));
}

fn put_norm(sd: &mut StateDict, prefix: &str, norm: &LayerNorm) {
    sd.insert(format!("{}.weight", prefix), TensorData::from_array1(&norm.weight));
    sd.insert(format!("{}.bias", prefix), TensorData::from_array1(&norm.bias));
}

/// Uniform in `±1/sqrt(fan_in)`
fn uniform(rng: &mut StdRng, shape: (usize, usize), fan_in: usize) -> Array2<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array2::from_shape_simple_fn(shape, || rng.gen_range(-bound..bound))
}

fn random_linear(rng: &mut StdRng, out_features: usize, in_features: usize) -> Linear {
    Linear {
        weight: uniform(rng, (out_features, in_features), in_features),
        bias: Array1::zeros(out_features),
    }
}

fn unit_norm(width: usize) -> LayerNorm {
    LayerNorm {
        weight: Array1::ones(width),
        bias: Array1::zeros(width),
        eps: LAYER_NORM_EPS,
    }
}
