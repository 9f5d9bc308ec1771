//! Feature Engine - Per-bar feature vectors for the forecast model
//!
//! Turns an ascending OHLCV history into the 17-column representation the
//! model was trained on:
//! - Raw OHLCV
//! - EMA (10, 21) and simple moving averages (7, 30)
//! - RSI (14, simple rolling means)
//! - ADI, OBV and a 20-bar rolling mean of ADI (`volume_cmf`)
//! - One-bar returns (twice: `return_1` and `pct_change`)
//! - Calendar features (day of week, weekend flag)
//!
//! Column order is part of the model contract.

pub mod indicators;

use chrono::{Datelike, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::Bar;
use indicators::{adi, backfill_then_zero, ema, obv, pct_change, rolling_mean, rsi};

/// Column names in model order
pub const FEATURE_COLUMNS: [&str; 17] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "ema_10",
    "ema_21",
    "ma_7",
    "ma_30",
    "momentum_rsi",
    "volume_adi",
    "volume_obv",
    "volume_cmf",
    "return_1",
    "pct_change",
    "day_of_week",
    "is_weekend",
];

/// Position of `close` in [`FEATURE_COLUMNS`]
pub const CLOSE_INDEX: usize = 3;

/// One bar's worth of model features
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub ema_10: f64,
    pub ema_21: f64,
    pub ma_7: f64,
    pub ma_30: f64,
    pub momentum_rsi: f64,
    pub volume_adi: f64,
    pub volume_obv: f64,
    pub volume_cmf: f64,
    pub return_1: f64,
    pub pct_change: f64,
    /// Monday = 0
    pub day_of_week: f64,
    pub is_weekend: f64,
}

impl FeatureVector {
    pub const NUM_FEATURES: usize = 17;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.ema_10,
            self.ema_21,
            self.ma_7,
            self.ma_30,
            self.momentum_rsi,
            self.volume_adi,
            self.volume_obv,
            self.volume_cmf,
            self.return_1,
            self.pct_change,
            self.day_of_week,
            self.is_weekend,
        ]
    }

    fn from_array(v: [f64; Self::NUM_FEATURES]) -> Self {
        Self {
            open: v[0],
            high: v[1],
            low: v[2],
            close: v[3],
            volume: v[4],
            ema_10: v[5],
            ema_21: v[6],
            ma_7: v[7],
            ma_30: v[8],
            momentum_rsi: v[9],
            volume_adi: v[10],
            volume_obv: v[11],
            volume_cmf: v[12],
            return_1: v[13],
            pct_change: v[14],
            day_of_week: v[15],
            is_weekend: v[16],
        }
    }
}

/// Feature row with its bar date, used for indicator export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub features: FeatureVector,
}

/// Stack feature vectors into a `(rows, 17)` matrix, oldest first
pub fn to_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.to_array()).collect();
    // Length is rows * 17 by construction.
    Array2::from_shape_vec((rows.len(), FeatureVector::NUM_FEATURES), flat)
        .unwrap_or_else(|_| Array2::zeros((0, FeatureVector::NUM_FEATURES)))
}

/// Feature engine for the daily forecast model
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    ema_spans: (usize, usize),
    ma_windows: (usize, usize),
    rsi_period: usize,
    cmf_period: usize,
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self {
            ema_spans: (10, 21),
            ma_windows: (7, 30),
            rsi_period: 14,
            cmf_period: 20,
        }
    }
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest lookback of any rolling feature
    pub fn warmup_bars(&self) -> usize {
        self.ma_windows.1.max(self.cmf_period).max(self.rsi_period + 1)
    }

    /// Compute one feature vector per bar. `bars` must be ascending by date.
    ///
    /// Rolling windows leave leading gaps; each column is backward-filled and
    /// whatever is still missing or non-finite becomes 0, so the output is
    /// always fully numeric.
    pub fn compute(&self, bars: &[Bar]) -> Vec<FeatureVector> {
        if bars.is_empty() {
            return Vec::new();
        }

        let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let volume_adi = adi(&high, &low, &close, &volume);
        let volume_obv = obv(&close, &volume);
        let volume_cmf = rolling_mean(&volume_adi, self.cmf_period);
        let returns = pct_change(&close);
        let ema_fast = ema(&close, self.ema_spans.0);
        let ema_slow = ema(&close, self.ema_spans.1);
        let ma_fast = rolling_mean(&close, self.ma_windows.0);
        let ma_slow = rolling_mean(&close, self.ma_windows.1);
        let momentum_rsi = rsi(&close, self.rsi_period);

        let day_of_week: Vec<f64> = bars
            .iter()
            .map(|b| b.date.weekday().num_days_from_monday() as f64)
            .collect();
        let is_weekend: Vec<f64> = day_of_week
            .iter()
            .map(|&d| if d >= 5.0 { 1.0 } else { 0.0 })
            .collect();

        let mut columns: [Vec<f64>; FeatureVector::NUM_FEATURES] = [
            open,
            high,
            low,
            close,
            volume,
            ema_fast,
            ema_slow,
            ma_fast,
            ma_slow,
            momentum_rsi,
            volume_adi,
            volume_obv,
            volume_cmf,
            returns.clone(),
            returns,
            day_of_week,
            is_weekend,
        ];

        for column in columns.iter_mut() {
            backfill_then_zero(column);
        }

        (0..bars.len())
            .map(|i| {
                let mut row = [0.0; FeatureVector::NUM_FEATURES];
                for (j, column) in columns.iter().enumerate() {
                    row[j] = column[i];
                }
                FeatureVector::from_array(row)
            })
            .collect()
    }

    /// Feature rows paired with their bar dates
    pub fn compute_rows(&self, bars: &[Bar]) -> Vec<IndicatorRow> {
        self.compute(bars)
            .into_iter()
            .zip(bars.iter())
            .map(|(features, bar)| IndicatorRow {
                date: bar.date,
                features,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(start: NaiveDate, closes: &[f64], volume: f64) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: start + chrono::Duration::days(i as i64),
                open: c,
                high: c + 2.0,
                low: c - 1.0,
                close: c,
                volume,
                series_id: "coin_Test".to_string(),
            })
            .collect()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_column_order_matches_vector() {
        assert_eq!(FEATURE_COLUMNS.len(), FeatureVector::NUM_FEATURES);
        assert_eq!(FEATURE_COLUMNS[CLOSE_INDEX], "close");
        assert_eq!(FEATURE_COLUMNS[15], "day_of_week");
        assert_eq!(FEATURE_COLUMNS[16], "is_weekend");

        let v = FeatureVector {
            close: 42.0,
            is_weekend: 1.0,
            ..Default::default()
        };
        assert_eq!(v.to_array()[CLOSE_INDEX], 42.0);
        assert_eq!(v.to_array()[16], 1.0);
    }

    #[test]
    fn test_same_length_and_finite() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + (i % 3) as f64).collect();
        let bars = bars_from_closes(monday(), &closes, 1000.0);
        let out = FeatureEngine::new().compute(&bars);

        assert_eq!(out.len(), bars.len());
        assert!(out
            .iter()
            .all(|r| r.to_array().iter().all(|v| v.is_finite())));
        // ma_30 never fills in 10 bars
        assert!(out.iter().all(|r| r.ma_30 == 0.0));
    }

    #[test]
    fn test_rsi_monotonic_up_and_down() {
        let up: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &up, 10.0));
        assert!((out[39].momentum_rsi - 100.0).abs() < 1e-9);
        // leading rows are backfilled from the first defined value
        assert!((out[0].momentum_rsi - 100.0).abs() < 1e-9);

        let down: Vec<f64> = (0..40).map(|i| 500.0 - i as f64).collect();
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &down, 10.0));
        assert!(out[39].momentum_rsi.abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_rsi_is_zero() {
        let flat = vec![250.0; 90];
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &flat, 10.0));
        assert_eq!(out.len(), 90);
        assert!(out.iter().all(|r| r.momentum_rsi == 0.0));
        assert!(out
            .iter()
            .all(|r| r.to_array().iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_obv_increasing_constant_volume() {
        let closes: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &closes, 250.0));
        assert_eq!(out[0].volume_obv, 0.0);
        for (n, row) in out.iter().enumerate() {
            assert!((row.volume_obv - n as f64 * 250.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_calendar_features() {
        // 2024-01-06 is a Saturday, 2024-01-03 a Wednesday
        let closes = vec![1.0; 7];
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &closes, 1.0));
        assert_eq!(out[5].day_of_week, 5.0);
        assert_eq!(out[5].is_weekend, 1.0);
        assert_eq!(out[2].day_of_week, 2.0);
        assert_eq!(out[2].is_weekend, 0.0);
        assert_eq!(out[0].day_of_week, 0.0);
    }

    #[test]
    fn test_zero_range_bar_adds_no_adi() {
        let mut bars = bars_from_closes(monday(), &[10.0, 11.0, 12.0], 100.0);
        bars[1].high = 11.0;
        bars[1].low = 11.0;
        let out = FeatureEngine::new().compute(&bars);
        assert_eq!(out[1].volume_adi, out[0].volume_adi);
        assert!(out.iter().all(|r| r.volume_adi.is_finite()));
    }

    #[test]
    fn test_returns_duplicated_and_backfilled() {
        let bars = bars_from_closes(monday(), &[100.0, 110.0, 99.0], 1.0);
        let out = FeatureEngine::new().compute(&bars);
        assert!((out[1].return_1 - 0.1).abs() < 1e-12);
        assert_eq!(out[1].return_1, out[1].pct_change);
        // first row takes the next valid return
        assert_eq!(out[0].return_1, out[1].return_1);
    }

    #[test]
    fn test_cmf_is_rolling_mean_of_adi() {
        let closes: Vec<f64> = (0..25).map(|i| 50.0 + ((i * 7) % 5) as f64).collect();
        let out = FeatureEngine::new().compute(&bars_from_closes(monday(), &closes, 3.0));
        let expected: f64 = out[5..25].iter().map(|r| r.volume_adi).sum::<f64>() / 20.0;
        assert!((out[24].volume_cmf - expected).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_shape() {
        let closes: Vec<f64> = (0..12).map(|i| i as f64 + 1.0).collect();
        let rows = FeatureEngine::new().compute(&bars_from_closes(monday(), &closes, 1.0));
        let m = to_matrix(&rows);
        assert_eq!(m.dim(), (12, 17));
        assert_eq!(m[[11, CLOSE_INDEX]], 12.0);
    }
}
