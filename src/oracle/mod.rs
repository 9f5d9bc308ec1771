//! Oracle module - live market data and window source selection
//!
//! Fetches daily bars from the exchange and decides, per request, whether a
//! forecast runs on live, caller-supplied or cached static data.

mod router;
pub mod sources;

pub use router::{DataSourceRouter, RouterConfig};
pub use sources::BinanceKlineClient;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::Bar;

/// Remote source of daily OHLCV bars
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Latest `limit` daily bars for `series`, ascending by date
    async fn fetch_daily_bars(&self, series: &str, limit: usize) -> Result<Vec<Bar>>;

    /// Round-trip latency of a connectivity check
    async fn ping(&self) -> Result<Duration>;
}

/// Series name to exchange base asset
const KNOWN_TICKERS: [(&str, &str); 24] = [
    ("Aave", "AAVE"),
    ("Algorand", "ALGO"),
    ("Avalanche", "AVAX"),
    ("BinanceCoin", "BNB"),
    ("Bitcoin", "BTC"),
    ("Cardano", "ADA"),
    ("ChainLink", "LINK"),
    ("Cosmos", "ATOM"),
    ("CryptocomCoin", "CRO"),
    ("Dogecoin", "DOGE"),
    ("EOS", "EOS"),
    ("Ethereum", "ETH"),
    ("Filecoin", "FIL"),
    ("Iota", "IOTA"),
    ("Litecoin", "LTC"),
    ("Monero", "XMR"),
    ("NEM", "XEM"),
    ("Polkadot", "DOT"),
    ("Solana", "SOL"),
    ("Stellar", "XLM"),
    ("Tron", "TRX"),
    ("Uniswap", "UNI"),
    ("USDCoin", "USDC"),
    ("WrappedBitcoin", "WBTC"),
];

/// Maps series ids such as `coin_Bitcoin` to exchange pairs such as `BTCUSDT`
#[derive(Debug, Clone)]
pub struct SymbolMap {
    quote_asset: String,
    overrides: HashMap<String, String>,
}

impl SymbolMap {
    pub fn new(quote_asset: impl Into<String>, overrides: HashMap<String, String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            overrides,
        }
    }

    pub fn pair(&self, series: &str) -> String {
        if let Some(pair) = self.overrides.get(series) {
            return pair.clone();
        }
        let name = series.strip_prefix("coin_").unwrap_or(series);
        let base = KNOWN_TICKERS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, ticker)| ticker.to_string())
            .unwrap_or_else(|| name.to_uppercase());
        format!("{}{}", base, self.quote_asset)
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new("USDT", HashMap::new())
    }
}
