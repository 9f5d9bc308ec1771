//! Core types used throughout UltronFX
//!
//! Defines bars, the data mode flag and the forecast result shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::ForecastError;

/// Number of time steps fed to the model
pub const SEQ_LEN: usize = 72;
/// Number of forecast days produced per call
pub const PRED_LEN: usize = 7;

/// One daily OHLCV observation for a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub series_id: String,
}

/// Where bars and windows come from
///
/// Serde goes through `FromStr`/`Display`, so config values parse
/// case-insensitively and serialize as `STATIC`/`LIVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataMode {
    Static,
    Live,
}

impl Default for DataMode {
    fn default() -> Self {
        DataMode::Static
    }
}

impl FromStr for DataMode {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STATIC" => Ok(DataMode::Static),
            "LIVE" => Ok(DataMode::Live),
            _ => Err(ForecastError::InvalidMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for DataMode {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataMode> for String {
    fn from(mode: DataMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Static => write!(f, "STATIC"),
            DataMode::Live => write!(f, "LIVE"),
        }
    }
}

/// Process-wide data mode.
///
/// Readers take one snapshot per request; a concurrent `set` is last-write-wins.
#[derive(Debug, Default)]
pub struct ModeState(AtomicU8);

impl ModeState {
    pub fn new(mode: DataMode) -> Self {
        let state = Self::default();
        state.set(mode);
        state
    }

    pub fn get(&self) -> DataMode {
        match self.0.load(Ordering::Relaxed) {
            1 => DataMode::Live,
            _ => DataMode::Static,
        }
    }

    pub fn set(&self, mode: DataMode) {
        let raw = match mode {
            DataMode::Static => 0,
            DataMode::Live => 1,
        };
        self.0.store(raw, Ordering::Relaxed);
    }
}

/// Which source produced the window a forecast was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowSource {
    /// Fresh bars from the live feed
    Live,
    /// Window supplied by the caller
    Supplied,
    /// Window rebuilt from the static dataset
    Cached,
}

impl fmt::Display for WindowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSource::Live => write!(f, "live"),
            WindowSource::Supplied => write!(f, "supplied"),
            WindowSource::Cached => write!(f, "cached"),
        }
    }
}

/// Price-space forecast for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub series: String,
    /// Predicted close for day 1..7
    pub pred_7: Vec<f64>,
    pub source: WindowSource,
}

impl Forecast {
    /// Next day's predicted close
    pub fn today(&self) -> Option<f64> {
        self.pred_7.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serde_matches_from_str() {
        let live: DataMode = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(live, DataMode::Live);
        assert_eq!(serde_json::to_string(&DataMode::Static).unwrap(), "\"STATIC\"");
        assert!(serde_json::from_str::<DataMode>("\"paper\"").is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("live".parse::<DataMode>().unwrap(), DataMode::Live);
        assert_eq!(" Static ".parse::<DataMode>().unwrap(), DataMode::Static);
        assert!(matches!(
            "paper".parse::<DataMode>(),
            Err(ForecastError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_mode_state_last_write_wins() {
        let state = ModeState::new(DataMode::Static);
        assert_eq!(state.get(), DataMode::Static);
        state.set(DataMode::Live);
        state.set(DataMode::Static);
        state.set(DataMode::Live);
        assert_eq!(state.get(), DataMode::Live);
    }
}
