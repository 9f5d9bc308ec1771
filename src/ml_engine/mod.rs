//! ML Engine - frozen forecast model and its input/output plumbing
//!
//! - `models`: the native transformer and the `SequenceModel` seam
//! - `persistence`: JSON state-dict checkpoints
//! - `window`: validated `(72, 17)` windows
//! - `predictor`: scaling + forward pass + inverse scaling

pub mod models;
pub mod persistence;
pub mod predictor;
pub mod window;

pub use models::{ModelConfig, SequenceModel, TransformerV3};
pub use persistence::{StateDict, TensorData};
pub use predictor::ForecastEngine;
pub use window::{SequenceWindowBuilder, Window};

use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::features::FeatureVector;
use crate::scaling::SeriesRegistry;
use crate::types::PRED_LEN;

/// Checkpoint file for a named checkpoint inside the artifact directory
pub fn checkpoint_path(dir: &Path, checkpoint: &str) -> PathBuf {
    dir.join(format!("{}_state_dict.json", checkpoint))
}

/// Load the frozen transformer sized for `registry`
pub fn load_transformer(
    path: &Path,
    config: &ModelConfig,
    registry: &SeriesRegistry,
) -> Result<TransformerV3> {
    let sd = StateDict::load(path)?;
    let model = TransformerV3::from_state_dict(
        config.clone(),
        FeatureVector::NUM_FEATURES,
        registry.len(),
        PRED_LEN,
        sd,
    )?;
    info!(
        parameters = model.parameter_count(),
        series = registry.len(),
        d_model = config.d_model,
        layers = config.num_layers,
        "🧠 Forecast model loaded"
    );
    Ok(model)
}
