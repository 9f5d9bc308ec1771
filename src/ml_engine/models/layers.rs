//! Inference-only building blocks for the transformer encoder.
//!
//! Weight layouts follow PyTorch: `Linear.weight` is `(out, in)` and the
//! attention input projection packs Q, K and V as `(3 * d_model, d_model)`.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};

/// Fully connected layer, `y = x W^T + b`
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn forward(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Layer normalization over the last axis (biased variance)
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub eps: f32,
}

impl LayerNorm {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut out = x.clone();
        let width = x.ncols() as f32;
        for mut row in out.axis_iter_mut(Axis(0)) {
            let mean = row.sum() / width;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / width;
            let denom = (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) / denom);
            row *= &self.weight;
            row += &self.bias;
        }
        out
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// ReLU that keeps NaN as NaN; `f32::max` would turn it into 0
pub fn relu(x: &mut Array2<f32>) {
    x.mapv_inplace(|v| if v > 0.0 || v.is_nan() { v } else { 0.0 });
}

/// Row-wise softmax, numerically stabilized by the row max
pub fn softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

/// Sinusoidal positional encoding, `(seq_len, d_model)`
pub fn positional_encoding(seq_len: usize, d_model: usize) -> Array2<f32> {
    let mut pe = Array2::<f32>::zeros((seq_len, d_model));
    let log_base = -(10000.0f64).ln() / d_model as f64;
    for pos in 0..seq_len {
        for i in (0..d_model).step_by(2) {
            let angle = pos as f64 * (i as f64 * log_base).exp();
            pe[[pos, i]] = angle.sin() as f32;
            if i + 1 < d_model {
                pe[[pos, i + 1]] = angle.cos() as f32;
            }
        }
    }
    pe
}

/// Multi-head self-attention without masking
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    pub nhead: usize,
    pub in_proj_weight: Array2<f32>,
    pub in_proj_bias: Array1<f32>,
    pub out_proj: Linear,
}

impl MultiHeadAttention {
    pub fn forward(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        let d_model = self.out_proj.out_features();
        let head_dim = d_model / self.nhead;
        let scale = 1.0 / (head_dim as f32).sqrt();

        let qkv = x.dot(&self.in_proj_weight.t()) + &self.in_proj_bias;
        let q = qkv.slice(s![.., 0..d_model]);
        let k = qkv.slice(s![.., d_model..2 * d_model]);
        let v = qkv.slice(s![.., 2 * d_model..3 * d_model]);

        let mut context = Array2::<f32>::zeros((x.nrows(), d_model));
        for h in 0..self.nhead {
            let cols = h * head_dim..(h + 1) * head_dim;
            let qh = q.slice(s![.., cols.clone()]);
            let kh = k.slice(s![.., cols.clone()]);
            let vh = v.slice(s![.., cols.clone()]);

            let mut scores = qh.dot(&kh.t()) * scale;
            softmax_rows(&mut scores);
            context.slice_mut(s![.., cols]).assign(&scores.dot(&vh));
        }

        self.out_proj.forward(&context.view())
    }

    pub fn num_parameters(&self) -> usize {
        self.in_proj_weight.len() + self.in_proj_bias.len() + self.out_proj.num_parameters()
    }
}

/// Post-norm encoder layer with a ReLU feed-forward block
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    pub self_attn: MultiHeadAttention,
    pub linear1: Linear,
    pub linear2: Linear,
    pub norm1: LayerNorm,
    pub norm2: LayerNorm,
}

impl EncoderLayer {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let attn = self.self_attn.forward(&x.view());
        let x = self.norm1.forward(&(x + &attn));

        let mut hidden = self.linear1.forward(&x.view());
        relu(&mut hidden);
        let ff = self.linear2.forward(&hidden.view());
        self.norm2.forward(&(&x + &ff))
    }

    pub fn num_parameters(&self) -> usize {
        self.self_attn.num_parameters()
            + self.linear1.num_parameters()
            + self.linear2.num_parameters()
            + self.norm1.num_parameters()
            + self.norm2.num_parameters()
    }
}
