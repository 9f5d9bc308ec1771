//! Binance REST client for daily klines
//!
//! Only the public market-data endpoints are used: `/klines` for bars and
//! `/ping` for the connectivity check.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use std::time::{Duration, Instant};

use crate::oracle::{LiveFeed, SymbolMap};
use crate::types::Bar;

pub const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3";

#[derive(Debug, Clone)]
pub struct BinanceKlineClient {
    base_url: String,
    symbols: SymbolMap,
    http: reqwest::Client,
}

impl BinanceKlineClient {
    /// `request_timeout` bounds each HTTP call; the router adds its own
    /// end-to-end deadline on top.
    pub fn new(
        base_url: impl Into<String>,
        symbols: SymbolMap,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbols,
            http,
        })
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }
}

/// Parse a klines payload: `[[open_time_ms, "open", "high", "low", "close", "volume", ...], ...]`.
///
/// A single malformed kline fails the whole batch; a partial history would
/// shift every rolling feature.
pub fn parse_klines(series: &str, klines: &[Vec<serde_json::Value>]) -> Result<Vec<Bar>> {
    let mut bars = Vec::with_capacity(klines.len());
    for (i, kline) in klines.iter().enumerate() {
        if kline.len() < 6 {
            bail!("kline {} has {} fields, expected at least 6", i, kline.len());
        }
        let open_time = kline[0]
            .as_i64()
            .with_context(|| format!("kline {}: open time is not an integer", i))?;
        let date = DateTime::from_timestamp_millis(open_time)
            .with_context(|| format!("kline {}: open time {} out of range", i, open_time))?
            .date_naive();

        let field = |idx: usize, name: &str| -> Result<f64> {
            let value = &kline[idx];
            let parsed = match value.as_str() {
                Some(s) => s.parse::<f64>().ok(),
                None => value.as_f64(),
            };
            parsed.with_context(|| format!("kline {}: bad {} {}", i, name, value))
        };

        bars.push(Bar {
            date,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
            series_id: series.to_string(),
        });
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

#[async_trait]
impl LiveFeed for BinanceKlineClient {
    fn name(&self) -> &'static str {
        "Binance"
    }

    async fn fetch_daily_bars(&self, series: &str, limit: usize) -> Result<Vec<Bar>> {
        let symbol = self.symbols.pair(series);
        let url = format!("{}/klines", self.base_url);
        let limit_param = limit.to_string();

        tracing::debug!(
            series = %series,
            symbol = %symbol,
            limit,
            "📥 Fetching daily klines from Binance..."
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", "1d"),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch klines from Binance")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {} for {}", response.status(), symbol);
        }

        let klines: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;
        let bars = parse_klines(series, &klines)?;

        tracing::info!(
            series = %series,
            symbol = %symbol,
            count = bars.len(),
            "✅ Daily klines fetched"
        );
        Ok(bars)
    }

    async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .context("Binance ping failed")?;
        if !response.status().is_success() {
            bail!("Binance ping returned {}", response.status());
        }
        Ok(start.elapsed())
    }
}
