//! Configuration management for UltronFX
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::ml_engine::ModelConfig;
use crate::types::DataMode;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub artifacts: ArtifactsConfig,
    pub dataset: DatasetConfig,
    pub live: LiveConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Version tag for logging
    pub tag: String,
    /// Data mode at startup
    pub initial_mode: DataMode,
    /// Emit JSON log lines instead of plain text
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding `{series}_scaler.json` and the checkpoint
    pub dir: PathBuf,
    /// Checkpoint name, resolved to `{dir}/{checkpoint}_state_dict.json`
    pub checkpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Static OHLCV CSV
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Build the exchange client at all
    pub enabled: bool,
    /// Exchange REST base URL
    pub base_url: String,
    /// End-to-end deadline for one bar fetch
    pub fetch_timeout_ms: u64,
    /// Deadline for the connectivity check
    pub ping_timeout_ms: u64,
    /// Extra bars fetched ahead of the window for indicator warm-up
    pub lookback_margin: usize,
    /// Quote asset appended to derived pairs
    pub quote_asset: String,
    /// Series id to exchange pair overrides
    #[serde(default)]
    pub symbols: HashMap<String, String>,
}

impl LiveConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults_builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ULTRONFX__*)
            .add_source(Environment::with_prefix("ULTRONFX").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Built-in defaults only, no files or environment
    pub fn defaults() -> Result<Self> {
        Self::defaults_builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn defaults_builder() -> Result<ConfigBuilder<DefaultState>> {
        let model = ModelConfig::default();
        let builder = Config::builder()
            // Service defaults
            .set_default("service.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("service.initial_mode", "STATIC")?
            .set_default("service.log_json", false)?
            // Artifact defaults
            .set_default("artifacts.dir", "./models")?
            .set_default("artifacts.checkpoint", "best-v3-seed42")?
            // Dataset defaults
            .set_default("dataset.path", "./data/my_cypto_dataset.csv")?
            // Live feed defaults
            .set_default("live.enabled", true)?
            .set_default("live.base_url", crate::oracle::sources::BINANCE_REST_URL)?
            .set_default("live.fetch_timeout_ms", 10_000)?
            .set_default("live.ping_timeout_ms", 3_000)?
            .set_default("live.lookback_margin", 40)?
            .set_default("live.quote_asset", "USDT")?
            // Model defaults
            .set_default("model.d_model", model.d_model as u64)?
            .set_default("model.nhead", model.nhead as u64)?
            .set_default("model.num_layers", model.num_layers as u64)?
            .set_default("model.dim_feedforward", model.dim_feedforward as u64)?
            .set_default("model.series_emb_dim", model.series_emb_dim as u64)?;
        Ok(builder)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        crate::ml_engine::checkpoint_path(&self.artifacts.dir, &self.artifacts.checkpoint)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} mode={} artifacts={} checkpoint={} dataset={} live={} timeout_ms={} d_model={} layers={}",
            self.service.tag,
            self.service.initial_mode,
            self.artifacts.dir.display(),
            self.artifacts.checkpoint,
            self.dataset.path.display(),
            self.live.enabled,
            self.live.fetch_timeout_ms,
            self.model.d_model,
            self.model.num_layers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize() {
        let cfg = AppConfig::defaults().unwrap();
        assert_eq!(cfg.service.initial_mode, DataMode::Static);
        assert_eq!(cfg.artifacts.checkpoint, "best-v3-seed42");
        assert_eq!(cfg.live.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.live.ping_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.live.lookback_margin, 40);
        assert!(cfg.live.symbols.is_empty());
        assert_eq!(cfg.model, ModelConfig::default());
        assert!(cfg
            .checkpoint_path()
            .ends_with("best-v3-seed42_state_dict.json"));
    }

    #[test]
    fn test_initial_mode_case_insensitive() {
        let cfg: AppConfig = AppConfig::defaults_builder()
            .unwrap()
            .set_override("service.initial_mode", "live")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.service.initial_mode, DataMode::Live);

        let bad = AppConfig::defaults_builder()
            .unwrap()
            .set_override("service.initial_mode", "paper")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>();
        assert!(bad.is_err());
    }

    #[test]
    fn test_digest_mentions_mode_and_checkpoint() {
        let cfg = AppConfig::defaults().unwrap();
        let digest = cfg.digest();
        assert!(digest.contains("mode=STATIC"));
        assert!(digest.contains("checkpoint=best-v3-seed42"));
    }
}
