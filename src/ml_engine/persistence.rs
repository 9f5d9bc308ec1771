//! Checkpoint persistence - JSON state dicts for the frozen model
//!
//! A checkpoint maps parameter names to `{shape, data}` tensors. Files exported
//! from the training framework may wrap the map in `{"state_dict": ...}` and
//! prefix every name with `model.`; both are accepted.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ForecastError, Result};

/// Prefix added by the training wrapper module
const FRAMEWORK_PREFIX: &str = "model.";

/// Buffers that are recomputed at load time and may be present in exports
const IGNORED_BUFFERS: [&str; 1] = ["pos_enc.pe"];

/// One named tensor, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn from_array2(a: &Array2<f32>) -> Self {
        Self {
            shape: vec![a.nrows(), a.ncols()],
            data: a.iter().cloned().collect(),
        }
    }

    pub fn from_array1(a: &Array1<f32>) -> Self {
        Self {
            shape: vec![a.len()],
            data: a.to_vec(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CheckpointFile {
    Wrapped { state_dict: HashMap<String, TensorData> },
    Flat(HashMap<String, TensorData>),
}

/// Parameter map consumed tensor by tensor during model construction
#[derive(Debug, Default)]
pub struct StateDict {
    tensors: HashMap<String, TensorData>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CheckpointFile = serde_json::from_str(json)
            .map_err(|e| ForecastError::Checkpoint(format!("invalid checkpoint JSON: {}", e)))?;
        let raw = match file {
            CheckpointFile::Wrapped { state_dict } => state_dict,
            CheckpointFile::Flat(map) => map,
        };

        let mut tensors = HashMap::with_capacity(raw.len());
        for (name, tensor) in raw {
            let name = name
                .strip_prefix(FRAMEWORK_PREFIX)
                .map(str::to_string)
                .unwrap_or(name);
            let expected: usize = tensor.shape.iter().product();
            if expected != tensor.data.len() {
                return Err(ForecastError::Checkpoint(format!(
                    "{}: shape {:?} needs {} values, found {}",
                    name,
                    tensor.shape,
                    expected,
                    tensor.data.len()
                )));
            }
            if tensors.insert(name.clone(), tensor).is_some() {
                return Err(ForecastError::Checkpoint(format!(
                    "duplicate parameter {} after prefix stripping",
                    name
                )));
            }
        }
        Ok(Self { tensors })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| ForecastError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        let sd = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            tensors = sd.len(),
            "📂 Checkpoint loaded"
        );
        Ok(sd)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let ordered: BTreeMap<&String, &TensorData> = self.tensors.iter().collect();
        let json = serde_json::to_string(&serde_json::json!({ "state_dict": ordered }))?;
        fs::write(path, json)?;
        info!(path = %path.display(), "💾 Checkpoint saved");
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: TensorData) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    fn take(&mut self, name: &str, shape: &[usize]) -> Result<TensorData> {
        let tensor = self
            .tensors
            .remove(name)
            .ok_or_else(|| ForecastError::Checkpoint(format!("missing parameter {}", name)))?;
        if tensor.shape != shape {
            return Err(ForecastError::Checkpoint(format!(
                "{}: expected shape {:?}, found {:?}",
                name, shape, tensor.shape
            )));
        }
        Ok(tensor)
    }

    pub fn take_matrix(&mut self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        let tensor = self.take(name, &[rows, cols])?;
        Array2::from_shape_vec((rows, cols), tensor.data)
            .map_err(|e| ForecastError::Checkpoint(format!("{}: {}", name, e)))
    }

    pub fn take_vector(&mut self, name: &str, len: usize) -> Result<Array1<f32>> {
        let tensor = self.take(name, &[len])?;
        Ok(Array1::from_vec(tensor.data))
    }

    /// Fail if anything other than known buffers was left unconsumed
    pub fn finish(mut self) -> Result<()> {
        for buffer in IGNORED_BUFFERS {
            if self.tensors.remove(buffer).is_some() {
                debug!(buffer, "Ignoring recomputed buffer");
            }
        }
        if !self.tensors.is_empty() {
            let mut names: Vec<&String> = self.tensors.keys().collect();
            names.sort();
            return Err(ForecastError::Checkpoint(format!(
                "unexpected parameters: {:?}",
                names
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_prefixed_checkpoint() {
        let json = r#"{
            "epoch": 12,
            "state_dict": {
                "model.head.0.bias": {"shape": [2], "data": [1.0, 2.0]},
                "model.pos_enc.pe": {"shape": [1], "data": [0.0]}
            }
        }"#;
        let mut sd = StateDict::from_json(json).unwrap();
        assert_eq!(sd.take_vector("head.0.bias", 2).unwrap().to_vec(), vec![1.0, 2.0]);
        assert!(sd.finish().is_ok());
    }

    #[test]
    fn test_flat_checkpoint_and_shape_check() {
        let json = r#"{"input_proj.weight": {"shape": [2, 3], "data": [1,2,3,4,5,6]}}"#;
        let mut sd = StateDict::from_json(json).unwrap();
        assert!(matches!(
            sd.take_matrix("input_proj.weight", 3, 2),
            Err(ForecastError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_missing_and_unexpected_parameters() {
        let json = r#"{"extra.weight": {"shape": [1], "data": [0.5]}}"#;
        let mut sd = StateDict::from_json(json).unwrap();
        assert!(sd.take_vector("head.3.bias", 7).is_err());
        assert!(matches!(sd.finish(), Err(ForecastError::Checkpoint(_))));
    }

    #[test]
    fn test_data_length_must_match_shape() {
        let json = r#"{"a": {"shape": [2, 2], "data": [1, 2, 3]}}"#;
        assert!(StateDict::from_json(json).is_err());
    }
}
