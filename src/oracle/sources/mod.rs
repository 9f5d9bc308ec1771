//! Live feed implementations

mod binance;

pub use binance::{parse_klines, BinanceKlineClient, BINANCE_REST_URL};
