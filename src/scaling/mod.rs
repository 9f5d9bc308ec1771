//! Per-series scaling between price space and model space
//!
//! Scalers are fit offline and shipped as `{series}_scaler.json`. They are
//! loaded once at startup and shared read-only.

mod registry;

pub use registry::{SeriesEntry, SeriesRegistry};

use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ForecastError, Result};
use crate::features::FeatureVector;

/// Number of leading columns a legacy 15-feature scaler was fit on
pub const LEGACY_SCALED_FEATURES: usize = 15;

/// Fitted affine transform, one pair of parameters per column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerParams {
    /// `t = (x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `t = x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
    /// `t = (x - center) / scale`
    Robust { center: Vec<f64>, scale: Vec<f64> },
}

/// Per-series scaler artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    /// Feature count the scaler was fit on (15 or 17)
    pub n_features_in: usize,
    #[serde(flatten)]
    pub params: ScalerParams,
}

impl Scaler {
    pub fn new(params: ScalerParams) -> Result<Self> {
        let n_features_in = match &params {
            ScalerParams::Standard { mean, .. } => mean.len(),
            ScalerParams::MinMax { min, .. } => min.len(),
            ScalerParams::Robust { center, .. } => center.len(),
        };
        let scaler = Self {
            n_features_in,
            params,
        };
        scaler.validate()?;
        Ok(scaler)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| ForecastError::Scaler(format!("{}: {}", path.display(), e)))?;
        let scaler: Self = serde_json::from_str(&json)
            .map_err(|e| ForecastError::Scaler(format!("{}: {}", path.display(), e)))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> Result<()> {
        let (a, b) = self.vectors();
        if a.len() != self.n_features_in || b.len() != self.n_features_in {
            return Err(ForecastError::Scaler(format!(
                "parameter length {}/{} does not match n_features_in {}",
                a.len(),
                b.len(),
                self.n_features_in
            )));
        }
        if self.n_features_in == 0 || self.n_features_in > FeatureVector::NUM_FEATURES {
            return Err(ForecastError::Scaler(format!(
                "unsupported feature count {}",
                self.n_features_in
            )));
        }
        Ok(())
    }

    fn vectors(&self) -> (&[f64], &[f64]) {
        match &self.params {
            ScalerParams::Standard { mean, scale } => (mean, scale),
            ScalerParams::MinMax { min, scale } => (min, scale),
            ScalerParams::Robust { center, scale } => (center, scale),
        }
    }

    /// Forward transform of a `(rows, n_features_in)` matrix
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(x.ncols())?;
        let mut out = x.clone();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (p, q) = self.column_params(j);
            match self.params {
                ScalerParams::MinMax { .. } => col.mapv_inplace(|v| v * q + p),
                _ => col.mapv_inplace(|v| (v - p) / q),
            }
        }
        Ok(out)
    }

    /// Inverse transform of a `(rows, n_features_in)` matrix
    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(x.ncols())?;
        let mut out = x.clone();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (p, q) = self.column_params(j);
            match self.params {
                ScalerParams::MinMax { .. } => col.mapv_inplace(|v| (v - p) / q),
                _ => col.mapv_inplace(|v| v * q + p),
            }
        }
        Ok(out)
    }

    /// Offset and (zero-safe) scale of column `j`
    fn column_params(&self, j: usize) -> (f64, f64) {
        let (offset, scale) = self.vectors();
        let q = if scale[j] == 0.0 { 1.0 } else { scale[j] };
        (offset[j], q)
    }

    fn check_width(&self, cols: usize) -> Result<()> {
        if cols != self.n_features_in {
            return Err(ForecastError::Scaler(format!(
                "scaler expects {} features, got {}",
                self.n_features_in, cols
            )));
        }
        Ok(())
    }
}

/// Map a `(rows, 17)` window into model space.
///
/// A legacy 15-feature scaler only scales the leading 15 columns; the calendar
/// columns (`day_of_week`, `is_weekend`) pass through unchanged in place.
pub fn transform_window(window: &Array2<f64>, scaler: &Scaler) -> Result<Array2<f64>> {
    if scaler.n_features_in == LEGACY_SCALED_FEATURES
        && window.ncols() == FeatureVector::NUM_FEATURES
    {
        let scaled = scaler.transform(&window.slice(s![.., ..LEGACY_SCALED_FEATURES]).to_owned())?;
        let mut out = window.clone();
        out.slice_mut(s![.., ..LEGACY_SCALED_FEATURES]).assign(&scaled);
        return Ok(out);
    }
    scaler.transform(window)
}

/// Map a single-column model-space forecast back to price space.
///
/// The forecast is placed in `close_index` of an otherwise zero matrix of the
/// scaler's width. Columns are independent under an affine scaler, so the
/// zeros do not leak into the recovered column.
pub fn inverse_transform_forecast(
    forecast: ArrayView1<f64>,
    scaler: &Scaler,
    close_index: usize,
) -> Result<Array1<f64>> {
    if close_index >= scaler.n_features_in {
        return Err(ForecastError::Scaler(format!(
            "close index {} outside scaler width {}",
            close_index, scaler.n_features_in
        )));
    }
    let mut dummy = Array2::<f64>::zeros((forecast.len(), scaler.n_features_in));
    dummy.column_mut(close_index).assign(&forecast);
    let inv = scaler.inverse_transform(&dummy)?;
    Ok(inv.column(close_index).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::CLOSE_INDEX;
    use ndarray::array;

    fn standard(n: usize) -> Scaler {
        Scaler::new(ScalerParams::Standard {
            mean: (0..n).map(|i| i as f64 * 10.0).collect(),
            scale: (0..n).map(|i| 1.0 + i as f64).collect(),
        })
        .unwrap()
    }

    fn sample_window(rows: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, 17), |(r, c)| {
            if c == 15 {
                (r % 7) as f64
            } else if c == 16 {
                if r % 7 >= 5 { 1.0 } else { 0.0 }
            } else {
                100.0 + r as f64 * 0.5 + c as f64
            }
        })
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let w = sample_window(72);
        let kinds = vec![
            standard(17),
            Scaler::new(ScalerParams::MinMax {
                min: vec![-0.5; 17],
                scale: vec![0.01; 17],
            })
            .unwrap(),
            Scaler::new(ScalerParams::Robust {
                center: vec![3.0; 17],
                scale: vec![2.0; 17],
            })
            .unwrap(),
        ];
        for scaler in kinds {
            let t = transform_window(&w, &scaler).unwrap();
            let back = scaler.inverse_transform(&t).unwrap();
            assert_close(&back, &w);
        }
    }

    #[test]
    fn test_legacy_scaler_passes_calendar_through() {
        let w = sample_window(72);
        let scaler = standard(15);
        let t = transform_window(&w, &scaler).unwrap();

        assert_eq!(t.dim(), (72, 17));
        assert_eq!(t.column(15), w.column(15));
        assert_eq!(t.column(16), w.column(16));
        assert!((t[[0, 1]] - (w[[0, 1]] - 10.0) / 2.0).abs() < 1e-12);

        let head = scaler
            .inverse_transform(&t.slice(s![.., ..15]).to_owned())
            .unwrap();
        assert_close(&head, &w.slice(s![.., ..15]).to_owned());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let scaler = standard(16);
        assert!(matches!(
            transform_window(&sample_window(4), &scaler),
            Err(ForecastError::Scaler(_))
        ));
    }

    #[test]
    fn test_inverse_forecast_both_widths() {
        for n in [15usize, 17] {
            let scaler = standard(n);
            let out = inverse_transform_forecast(
                array![0.0, 1.0, -1.0].view(),
                &scaler,
                CLOSE_INDEX,
            )
            .unwrap();
            // close column: mean 30, scale 4
            assert_eq!(out.to_vec(), vec![30.0, 34.0, 26.0]);
        }
    }

    #[test]
    fn test_zero_scale_is_identity() {
        let scaler = Scaler::new(ScalerParams::Standard {
            mean: vec![0.0; 15],
            scale: vec![0.0; 15],
        })
        .unwrap();
        let x = Array2::from_elem((2, 15), 7.0);
        assert_close(&scaler.transform(&x).unwrap(), &x);
    }

    #[test]
    fn test_artifact_json_shape() {
        let json = r#"{"kind":"robust","n_features_in":2,"center":[1.0,2.0],"scale":[0.5,0.5]}"#;
        let scaler: Scaler = serde_json::from_str(json).unwrap();
        assert_eq!(scaler.n_features_in, 2);
        assert!(matches!(scaler.params, ScalerParams::Robust { .. }));
    }
}
