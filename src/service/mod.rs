//! Forecast service - the library facade over the whole pipeline
//!
//! Every request takes one snapshot of the data mode and carries it through
//! window selection, so a concurrent mode switch never splits a request
//! between sources.

use anyhow::Context;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureEngine, FeatureVector, IndicatorRow};
use crate::history::HistoryCache;
use crate::ml_engine::{load_transformer, ForecastEngine, SequenceModel, SequenceWindowBuilder, Window};
use crate::oracle::{BinanceKlineClient, DataSourceRouter, LiveFeed, RouterConfig, SymbolMap};
use crate::scaling::{SeriesEntry, SeriesRegistry};
use crate::types::{Bar, DataMode, Forecast, ModeState, WindowSource, PRED_LEN, SEQ_LEN};

/// Bars returned by `history` in LIVE mode
pub const LIVE_HISTORY_DAYS: usize = 72;
/// Feature rows returned by `export_indicators` in LIVE mode
pub const LIVE_EXPORT_DAYS: usize = 365;

/// Per-series outcome of a batch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Forecast(Forecast),
    Error { error: String },
}

impl BatchOutcome {
    fn error(e: impl ToString) -> Self {
        BatchOutcome::Error {
            error: e.to_string(),
        }
    }

    pub fn forecast(&self) -> Option<&Forecast> {
        match self {
            BatchOutcome::Forecast(f) => Some(f),
            BatchOutcome::Error { .. } => None,
        }
    }
}

/// Two forecasts side by side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub first: Forecast,
    pub second: Forecast,
}

/// OHLCV slice for one series, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySlice {
    pub series: String,
    pub source: DataMode,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model: String,
    pub num_series: usize,
    pub seq_len: usize,
    pub num_features: usize,
    pub prediction_len: usize,
    pub model_parameters: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub mode: DataMode,
    pub live_feed: Option<String>,
    pub online: bool,
    pub latency_ms: Option<f64>,
    pub recommendation: DataMode,
    pub reason: String,
}

pub struct ForecastService {
    registry: Arc<SeriesRegistry>,
    engine: ForecastEngine,
    router: DataSourceRouter,
    mode: ModeState,
}

impl ForecastService {
    pub fn new(
        registry: Arc<SeriesRegistry>,
        engine: ForecastEngine,
        router: DataSourceRouter,
        initial_mode: DataMode,
    ) -> Self {
        Self {
            registry,
            engine,
            router,
            mode: ModeState::new(initial_mode),
        }
    }

    /// Wire the full pipeline from configuration and on-disk artifacts
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(
            SeriesRegistry::scan(&cfg.artifacts.dir).context("Failed to build series registry")?,
        );
        let model = load_transformer(&cfg.checkpoint_path(), &cfg.model, &registry)
            .context("Failed to load forecast model")?;

        let feed: Option<Arc<dyn LiveFeed>> = if cfg.live.enabled {
            let symbols = SymbolMap::new(cfg.live.quote_asset.clone(), cfg.live.symbols.clone());
            Some(Arc::new(BinanceKlineClient::new(
                cfg.live.base_url.clone(),
                symbols,
                cfg.live.fetch_timeout(),
            )?))
        } else {
            None
        };

        let router = DataSourceRouter::new(
            feed,
            Arc::new(HistoryCache::new(cfg.dataset.path.clone())),
            SequenceWindowBuilder::new(SEQ_LEN, FeatureEngine::default()),
            RouterConfig {
                lookback_margin: cfg.live.lookback_margin,
                fetch_timeout: cfg.live.fetch_timeout(),
                ping_timeout: cfg.live.ping_timeout(),
            },
        );

        Ok(Self::new(
            registry,
            ForecastEngine::new(Arc::new(model)),
            router,
            cfg.service.initial_mode,
        ))
    }

    pub fn mode(&self) -> DataMode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: DataMode) {
        let previous = self.mode.get();
        self.mode.set(mode);
        info!(from = %previous, to = %mode, "🔀 Data mode switched");
    }

    /// Parse and apply a mode name; anything but STATIC/LIVE is `InvalidMode`
    pub fn set_mode_str(&self, raw: &str) -> Result<DataMode> {
        let mode: DataMode = raw.parse()?;
        self.set_mode(mode);
        Ok(mode)
    }

    /// Sorted names of every servable series
    pub fn series(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn router(&self) -> &DataSourceRouter {
        &self.router
    }

    /// 7-day forecast for `series`, optionally on a caller-supplied window
    pub async fn predict(&self, series: &str, window: Option<&[Vec<f64>]>) -> Result<Forecast> {
        let mode = self.mode.get();
        self.predict_in_mode(mode, series, window).await
    }

    /// First forecast day only
    pub async fn predict_today(&self, series: &str, window: Option<&[Vec<f64>]>) -> Result<f64> {
        let forecast = self.predict(series, window).await?;
        forecast
            .today()
            .ok_or_else(|| ForecastError::Other(anyhow::anyhow!("empty forecast for {}", series)))
    }

    async fn predict_in_mode(
        &self,
        mode: DataMode,
        series: &str,
        window: Option<&[Vec<f64>]>,
    ) -> Result<Forecast> {
        let entry = self.registry.get(series)?.clone();
        let supplied = window
            .map(|rows| self.router.builder().from_rows(rows))
            .transpose()?;

        let (window, source) = self.router.select(mode, series, supplied).await?;
        let pred_7 = self.run_model(window, entry).await?;

        info!(
            series = %series,
            mode = %mode,
            source = %source,
            day_1 = pred_7[0],
            "📈 Forecast served"
        );
        Ok(Forecast {
            series: series.to_string(),
            pred_7,
            source,
        })
    }

    async fn run_model(&self, window: Window, entry: SeriesEntry) -> Result<Vec<f64>> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.predict_7day(&window, &entry))
            .await
            .map_err(|e| ForecastError::Other(anyhow::Error::new(e).context("forecast task failed")))?
    }

    /// Forecast each listed series from its own supplied window.
    ///
    /// Only the supplied windows are used, whatever the data mode. A missing
    /// window or a failing entry is reported in place; the batch always
    /// completes. Entries run concurrently.
    pub async fn predict_bulk(
        &self,
        series: &[String],
        windows: &HashMap<String, Vec<Vec<f64>>>,
    ) -> BTreeMap<String, BatchOutcome> {
        let jobs = series.iter().map(|name| async move {
            let outcome = match windows.get(name) {
                None => BatchOutcome::error("No window provided"),
                Some(rows) => match self.predict_supplied(name, rows).await {
                    Ok(f) => BatchOutcome::Forecast(f),
                    Err(e) => BatchOutcome::error(e),
                },
            };
            (name.clone(), outcome)
        });
        join_all(jobs).await.into_iter().collect()
    }

    async fn predict_supplied(&self, series: &str, rows: &[Vec<f64>]) -> Result<Forecast> {
        let entry = self.registry.get(series)?.clone();
        let window = self.router.builder().from_rows(rows)?;
        let pred_7 = self.run_model(window, entry).await?;
        Ok(Forecast {
            series: series.to_string(),
            pred_7,
            source: WindowSource::Supplied,
        })
    }

    /// Forecast every registered series from its live or cached window.
    ///
    /// Series are fetched concurrently, so one slow live fetch only costs its
    /// own deadline.
    pub async fn predict_all(&self) -> BTreeMap<String, BatchOutcome> {
        let mode = self.mode.get();
        let jobs = self.registry.names().into_iter().map(|name| async move {
            let outcome = match self.predict_in_mode(mode, &name, None).await {
                Ok(f) => BatchOutcome::Forecast(f),
                Err(e) => {
                    warn!(series = %name, error = %e, "Series skipped in full sweep");
                    BatchOutcome::error(e)
                }
            };
            (name, outcome)
        });
        join_all(jobs).await.into_iter().collect()
    }

    pub async fn compare(
        &self,
        first: &str,
        first_window: Option<&[Vec<f64>]>,
        second: &str,
        second_window: Option<&[Vec<f64>]>,
    ) -> Result<Comparison> {
        let mode = self.mode.get();
        Ok(Comparison {
            first: self.predict_in_mode(mode, first, first_window).await?,
            second: self.predict_in_mode(mode, second, second_window).await?,
        })
    }

    /// Raw bars for charting. LIVE tries the exchange first; an empty slice
    /// means no data anywhere.
    pub async fn history(&self, series: &str) -> Result<HistorySlice> {
        self.registry.get(series)?;
        let mode = self.mode.get();

        if mode == DataMode::Live {
            match self.live_tail(series, LIVE_HISTORY_DAYS).await {
                Some(bars) => {
                    return Ok(HistorySlice {
                        series: series.to_string(),
                        source: DataMode::Live,
                        bars,
                    })
                }
                None => warn!(series = %series, "Live history unavailable, serving static"),
            }
        }

        let bars = self
            .router
            .static_bars(series)
            .await
            .map(|b| b.as_ref().clone())
            .unwrap_or_default();
        Ok(HistorySlice {
            series: series.to_string(),
            source: DataMode::Static,
            bars,
        })
    }

    /// Dated feature rows. LIVE: the last year of exchange data, else the full static history.
    pub async fn export_indicators(&self, series: &str) -> Result<Vec<IndicatorRow>> {
        self.registry.get(series)?;
        let engine = self.router.builder().engine();

        if self.mode.get() == DataMode::Live {
            let limit = LIVE_EXPORT_DAYS + engine.warmup_bars();
            match self.router.live_bars(series, limit).await {
                Ok(bars) if !bars.is_empty() => {
                    let rows = engine.compute_rows(&bars);
                    let skip = rows.len().saturating_sub(LIVE_EXPORT_DAYS);
                    return Ok(rows.into_iter().skip(skip).collect());
                }
                Ok(_) => warn!(series = %series, "Live feed returned no bars, exporting static"),
                Err(e) => warn!(series = %series, error = %e, "Live export failed, exporting static"),
            }
        }

        let Some(bars) = self.router.static_bars(series).await else {
            return Ok(Vec::new());
        };
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || engine.compute_rows(&bars))
            .await
            .map_err(|e| ForecastError::Other(anyhow::Error::new(e).context("indicator export failed")))
    }

    pub fn stats(&self) -> ModelStats {
        let model = self.engine.model();
        ModelStats {
            model: model.name().to_string(),
            num_series: self.registry.len(),
            seq_len: SEQ_LEN,
            num_features: FeatureVector::NUM_FEATURES,
            prediction_len: PRED_LEN,
            model_parameters: model.parameter_count(),
        }
    }

    /// Ping the live feed and recommend a mode
    pub async fn health(&self) -> HealthReport {
        let mode = self.mode.get();
        let live_feed = self.router.feed_name().map(str::to_string);
        match self.router.ping().await {
            Ok(latency) => HealthReport {
                mode,
                live_feed,
                online: true,
                latency_ms: Some((latency.as_secs_f64() * 10_000.0).round() / 10.0),
                recommendation: DataMode::Live,
                reason: "Live feed operational".to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Live feed health check failed");
                HealthReport {
                    mode,
                    live_feed,
                    online: false,
                    latency_ms: None,
                    recommendation: DataMode::Static,
                    reason: format!("Live feed unavailable: {}", e),
                }
            }
        }
    }

    async fn live_tail(&self, series: &str, days: usize) -> Option<Vec<Bar>> {
        match self.router.live_bars(series, days).await {
            Ok(bars) if !bars.is_empty() => Some(bars),
            Ok(_) => None,
            Err(e) => {
                warn!(series = %series, error = %e, "Live bars unavailable");
                None
            }
        }
    }
}
