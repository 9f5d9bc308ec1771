//! Forecast engine - scaled window in, 7 price-space closes out

use ndarray::Array2;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::features::CLOSE_INDEX;
use crate::ml_engine::models::SequenceModel;
use crate::ml_engine::window::Window;
use crate::scaling::{inverse_transform_forecast, transform_window, SeriesEntry};
use crate::types::PRED_LEN;

/// Couples the frozen model with per-series scaling
#[derive(Clone)]
pub struct ForecastEngine {
    model: Arc<dyn SequenceModel>,
}

impl ForecastEngine {
    pub fn new(model: Arc<dyn SequenceModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &dyn SequenceModel {
        self.model.as_ref()
    }

    /// Scale the window, run the model and invert the close column.
    ///
    /// Pure and CPU-bound; callers on the async runtime should run it on the
    /// blocking pool.
    pub fn predict_7day(&self, window: &Window, entry: &SeriesEntry) -> Result<Vec<f64>> {
        let scaled = transform_window(window.as_array(), &entry.scaler)?;
        let input: Array2<f32> = scaled.mapv(|v| v as f32);

        let normalized = self.model.forward(input.view(), entry.id)?;
        if normalized.len() != PRED_LEN {
            return Err(ForecastError::Checkpoint(format!(
                "model produced {} values, expected {}",
                normalized.len(),
                PRED_LEN
            )));
        }

        let prices = inverse_transform_forecast(
            normalized.mapv(|v| v as f64).view(),
            &entry.scaler,
            CLOSE_INDEX,
        )?;
        debug!(
            series = %entry.name,
            first = prices[0],
            last = prices[PRED_LEN - 1],
            "Forecast computed"
        );
        Ok(prices.to_vec())
    }
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("model", &self.model.name())
            .field("num_series", &self.model.num_series())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::models::{ModelConfig, TransformerV3};
    use crate::ml_engine::window::SequenceWindowBuilder;
    use crate::scaling::{Scaler, ScalerParams, SeriesRegistry};
    use ndarray::{Array1, ArrayView2};

    fn registry() -> SeriesRegistry {
        let legacy = Scaler::new(ScalerParams::Standard {
            mean: vec![100.0; 15],
            scale: vec![10.0; 15],
        })
        .unwrap();
        let full = Scaler::new(ScalerParams::MinMax {
            min: vec![0.0; 17],
            scale: vec![0.01; 17],
        })
        .unwrap();
        SeriesRegistry::from_scalers(vec![
            ("coin_A".to_string(), legacy),
            ("coin_B".to_string(), full),
        ])
    }

    fn window() -> Window {
        let m = Array2::from_shape_fn((72, 17), |(r, c)| 100.0 + (r + c) as f64 * 0.1);
        SequenceWindowBuilder::default().from_matrix(m).unwrap()
    }

    /// Always predicts a fixed normalized vector
    struct Constant(Vec<f32>);

    impl SequenceModel for Constant {
        fn forward(&self, _window: ArrayView2<f32>, _series_id: usize) -> Result<Array1<f32>> {
            Ok(Array1::from_vec(self.0.clone()))
        }
        fn num_series(&self) -> usize {
            2
        }
        fn parameter_count(&self) -> usize {
            0
        }
        fn name(&self) -> &str {
            "Constant"
        }
    }

    #[test]
    fn test_inverse_scaling_applied_to_close() {
        let engine = ForecastEngine::new(Arc::new(Constant(vec![0.0, 1.0, 2.0, 0.0, 0.0, 0.0, -1.0])));
        let reg = registry();
        let out = engine.predict_7day(&window(), reg.get("coin_A").unwrap()).unwrap();
        assert_eq!(out, vec![100.0, 110.0, 120.0, 100.0, 100.0, 100.0, 90.0]);

        let out = engine.predict_7day(&window(), reg.get("coin_B").unwrap()).unwrap();
        assert!((out[1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_output_length_is_error() {
        let engine = ForecastEngine::new(Arc::new(Constant(vec![0.0; 5])));
        let reg = registry();
        assert!(engine.predict_7day(&window(), reg.get("coin_A").unwrap()).is_err());
    }

    #[test]
    fn test_transformer_forecast_is_deterministic() {
        let config = ModelConfig {
            d_model: 16,
            nhead: 2,
            num_layers: 1,
            dim_feedforward: 32,
            series_emb_dim: 4,
        };
        let model = TransformerV3::random(config, 17, 2, PRED_LEN, 3).unwrap();
        let engine = ForecastEngine::new(Arc::new(model));
        let reg = registry();
        let entry = reg.get("coin_B").unwrap();

        let a = engine.predict_7day(&window(), entry).unwrap();
        let b = engine.predict_7day(&window(), entry).unwrap();
        assert_eq!(a.len(), PRED_LEN);
        assert_eq!(a, b);
    }
}
