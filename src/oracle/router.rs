//! Data source router
//!
//! Picks the window a forecast runs on. In LIVE mode the exchange is tried
//! first; any failure (error, timeout, short history) is logged and the
//! request falls back to the caller's window, then to cached static history.
//! STATIC mode never touches the network.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ForecastError, LiveDataError, Result};
use crate::history::HistoryCache;
use crate::ml_engine::{SequenceWindowBuilder, Window};
use crate::oracle::LiveFeed;
use crate::types::{Bar, DataMode, WindowSource};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Extra bars fetched so rolling features are warm at the window start
    pub lookback_margin: usize,
    pub fetch_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lookback_margin: 40,
            fetch_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(3),
        }
    }
}

pub struct DataSourceRouter {
    feed: Option<Arc<dyn LiveFeed>>,
    history: Arc<HistoryCache>,
    builder: SequenceWindowBuilder,
    config: RouterConfig,
}

impl DataSourceRouter {
    pub fn new(
        feed: Option<Arc<dyn LiveFeed>>,
        history: Arc<HistoryCache>,
        builder: SequenceWindowBuilder,
        config: RouterConfig,
    ) -> Self {
        Self {
            feed,
            history,
            builder,
            config,
        }
    }

    pub fn builder(&self) -> &SequenceWindowBuilder {
        &self.builder
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn feed_name(&self) -> Option<&'static str> {
        self.feed.as_ref().map(|f| f.name())
    }

    /// Fetch `limit` daily bars under the configured deadline
    pub async fn live_bars(
        &self,
        series: &str,
        limit: usize,
    ) -> std::result::Result<Vec<Bar>, LiveDataError> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| LiveDataError::FetchFailure("no live feed configured".into()))?;

        match timeout(self.config.fetch_timeout, feed.fetch_daily_bars(series, limit)).await {
            Ok(Ok(bars)) => Ok(bars),
            Ok(Err(e)) => Err(LiveDataError::FetchFailure(format!("{:#}", e))),
            Err(_) => Err(LiveDataError::Timeout(
                self.config.fetch_timeout.as_millis() as u64,
            )),
        }
    }

    /// Live window: fetch `seq_len + margin` bars, compute features, keep the latest `seq_len`
    pub async fn live_window(&self, series: &str) -> std::result::Result<Window, LiveDataError> {
        let limit = self.builder.seq_len() + self.config.lookback_margin;
        let bars = self.live_bars(series, limit).await?;
        self.builder.from_bars(&bars)
    }

    /// Static bars for `series`. The first call parses the dataset, so the
    /// lookup runs on the blocking pool.
    pub async fn static_bars(&self, series: &str) -> Option<Arc<Vec<Bar>>> {
        let history = Arc::clone(&self.history);
        let key = series.to_string();
        match tokio::task::spawn_blocking(move || history.get(&key)).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(series = %series, error = %e, "Static history task failed");
                None
            }
        }
    }

    /// Window from the last `seq_len` feature rows of the static history.
    ///
    /// Parsing and the full-history feature pass both run off the async workers.
    pub async fn cached_window(&self, series: &str) -> Option<Window> {
        let history = Arc::clone(&self.history);
        let builder = self.builder.clone();
        let key = series.to_string();
        let built =
            tokio::task::spawn_blocking(move || history.get(&key).map(|bars| builder.from_bars(&bars)))
                .await;

        match built {
            Ok(Some(Ok(window))) => Some(window),
            Ok(Some(Err(e))) => {
                debug!(series = %series, error = %e, "Static history too short for a window");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(series = %series, error = %e, "Cached window task failed");
                None
            }
        }
    }

    /// Resolve the window for one request.
    ///
    /// `mode` is the snapshot taken at request start; it is not re-read here.
    pub async fn select(
        &self,
        mode: DataMode,
        series: &str,
        supplied: Option<Window>,
    ) -> Result<(Window, WindowSource)> {
        if mode == DataMode::Live {
            match self.live_window(series).await {
                Ok(window) => return Ok((window, WindowSource::Live)),
                Err(e) => warn!(
                    series = %series,
                    error = %e,
                    fallback = (if supplied.is_some() { "supplied" } else { "cached" }),
                    "⚠️ Live window unavailable, falling back"
                ),
            }
        }

        if let Some(window) = supplied {
            return Ok((window, WindowSource::Supplied));
        }

        self.cached_window(series)
            .await
            .map(|w| (w, WindowSource::Cached))
            .ok_or_else(|| ForecastError::NoWindowAvailable(series.to_string()))
    }

    /// Connectivity check under the short ping deadline
    pub async fn ping(&self) -> std::result::Result<Duration, LiveDataError> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| LiveDataError::FetchFailure("no live feed configured".into()))?;
        match timeout(self.config.ping_timeout, feed.ping()).await {
            Ok(Ok(latency)) => Ok(latency),
            Ok(Err(e)) => Err(LiveDataError::FetchFailure(format!("{:#}", e))),
            Err(_) => Err(LiveDataError::Timeout(
                self.config.ping_timeout.as_millis() as u64,
            )),
        }
    }
}
