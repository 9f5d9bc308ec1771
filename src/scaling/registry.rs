//! Series registry built from the scaler artifacts present on disk

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::Scaler;
use crate::error::{ForecastError, Result};

const SCALER_SUFFIX: &str = "_scaler.json";

/// One known series: its name, model embedding id and scaler
#[derive(Debug, Clone)]
pub struct SeriesEntry {
    pub name: String,
    /// Position in the sorted series list, used as the model's series id
    pub id: usize,
    pub scaler: Arc<Scaler>,
}

/// Immutable lookup of every series with a scaler artifact.
///
/// Ids are assigned in sorted name order, matching the order the model's
/// series embedding was trained with.
#[derive(Debug, Clone, Default)]
pub struct SeriesRegistry {
    entries: Vec<SeriesEntry>,
    by_name: HashMap<String, usize>,
}

impl SeriesRegistry {
    /// Scan `dir` for `{series}_scaler.json` files and load each scaler
    pub fn scan(dir: &Path) -> Result<Self> {
        let read_dir = fs::read_dir(dir).map_err(|e| {
            ForecastError::Scaler(format!("cannot read artifact dir {}: {}", dir.display(), e))
        })?;

        let mut found: Vec<(String, std::path::PathBuf)> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ForecastError::Scaler(e.to_string()))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(series) = file_name.strip_suffix(SCALER_SUFFIX) {
                if !series.is_empty() {
                    found.push((series.to_string(), entry.path()));
                }
            }
        }

        let mut scalers = Vec::with_capacity(found.len());
        for (series, path) in found {
            let scaler = Scaler::load(&path)?;
            debug!(
                series = %series,
                n_features_in = scaler.n_features_in,
                "Loaded scaler"
            );
            scalers.push((series, scaler));
        }

        let registry = Self::from_scalers(scalers);
        if registry.is_empty() {
            return Err(ForecastError::Scaler(format!(
                "no *{} artifacts in {}",
                SCALER_SUFFIX,
                dir.display()
            )));
        }

        info!(
            count = registry.len(),
            dir = %dir.display(),
            "📂 Series registry built from scaler artifacts"
        );
        Ok(registry)
    }

    /// Build from in-memory scalers; names are sorted to assign ids
    pub fn from_scalers(scalers: Vec<(String, Scaler)>) -> Self {
        let mut scalers = scalers;
        scalers.sort_by(|a, b| a.0.cmp(&b.0));
        scalers.dedup_by(|a, b| a.0 == b.0);

        let entries: Vec<SeriesEntry> = scalers
            .into_iter()
            .enumerate()
            .map(|(id, (name, scaler))| SeriesEntry {
                name,
                id,
                scaler: Arc::new(scaler),
            })
            .collect();
        let by_name = entries
            .iter()
            .map(|e| (e.name.clone(), e.id))
            .collect();

        Self { entries, by_name }
    }

    pub fn get(&self, name: &str) -> Result<&SeriesEntry> {
        self.by_name
            .get(name)
            .map(|&id| &self.entries[id])
            .ok_or_else(|| ForecastError::UnknownSeries(name.to_string()))
    }

    pub fn by_id(&self, id: usize) -> Option<&SeriesEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Sorted series names
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::ScalerParams;

    fn scaler(n: usize) -> Scaler {
        Scaler::new(ScalerParams::Standard {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        })
        .unwrap()
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ultronfx_registry_{}_{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_ids_follow_sorted_names() {
        let registry = SeriesRegistry::from_scalers(vec![
            ("coin_Solana".to_string(), scaler(17)),
            ("coin_Bitcoin".to_string(), scaler(15)),
            ("coin_Ethereum".to_string(), scaler(17)),
        ]);
        assert_eq!(
            registry.names(),
            vec!["coin_Bitcoin", "coin_Ethereum", "coin_Solana"]
        );
        assert_eq!(registry.get("coin_Solana").unwrap().id, 2);
        assert_eq!(registry.by_id(0).unwrap().name, "coin_Bitcoin");
        assert!(matches!(
            registry.get("coin_Dogecoin"),
            Err(ForecastError::UnknownSeries(_))
        ));
    }

    #[test]
    fn test_scan_directory() {
        let dir = temp_dir("scan");
        fs::create_dir_all(&dir).unwrap();
        for name in ["coin_B", "coin_A"] {
            let json = serde_json::to_string(&scaler(15)).unwrap();
            fs::write(dir.join(format!("{}_scaler.json", name)), json).unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let registry = SeriesRegistry::scan(&dir).unwrap();
        assert_eq!(registry.names(), vec!["coin_A", "coin_B"]);
        assert_eq!(registry.get("coin_B").unwrap().scaler.n_features_in, 15);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_scan_empty_directory_fails() {
        let dir = temp_dir("empty");
        fs::create_dir_all(&dir).unwrap();
        assert!(SeriesRegistry::scan(&dir).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
