//! UltronFX Library
//!
//! 7-day crypto price forecasting: feature engineering, per-series scaling,
//! live/static window selection and a frozen transformer.

pub mod config;
pub mod error;
pub mod features;
pub mod history;
pub mod ml_engine;
pub mod oracle;
pub mod scaling;
pub mod service;
pub mod types;

pub use error::{ForecastError, LiveDataError, Result};
pub use service::ForecastService;
pub use types::{Bar, DataMode, Forecast, WindowSource, PRED_LEN, SEQ_LEN};
