//! Static history cache
//!
//! Parses the historical OHLCV dataset (`Date,Open,High,Low,Close,Volume,Coin`)
//! once per process and serves per-series slices from memory. The first access
//! for any series triggers the full parse; concurrent first accesses block on
//! the same once-cell, so the index is built exactly once and never observed
//! half-populated.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::error::{ForecastError, Result};
use crate::types::Bar;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
];

/// Parse a dataset date, accepting ISO and day-first layouts
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive())
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Volume")]
    volume: f64,
    #[serde(rename = "Coin")]
    coin: String,
}

/// A dataset row that could not be turned into a bar
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// 1-based line number in the file, header included
    pub line: u64,
    pub reason: String,
}

/// Parsed dataset, grouped by series and sorted by date
#[derive(Debug, Default)]
pub struct HistoryIndex {
    series: HashMap<String, Arc<Vec<Bar>>>,
    rejected: Vec<RejectedRow>,
    total_rows: usize,
}

impl HistoryIndex {
    /// Parse a CSV source into an index
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| ForecastError::Dataset(format!("unreadable header: {}", e)))?
            .clone();

        let mut grouped: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut rejected = Vec::new();
        let mut total_rows = 0;

        for record in reader.records() {
            total_rows += 1;
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    rejected.push(RejectedRow {
                        line,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let row: RawRow = match record.deserialize(Some(&headers)) {
                Ok(row) => row,
                Err(e) => {
                    rejected.push(RejectedRow {
                        line,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(date) = parse_date(&row.date) else {
                rejected.push(RejectedRow {
                    line,
                    reason: format!("unparseable date '{}'", row.date),
                });
                continue;
            };

            grouped.entry(row.coin.clone()).or_default().push(Bar {
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                series_id: row.coin,
            });
        }

        let series = grouped
            .into_iter()
            .map(|(coin, mut bars)| {
                bars.sort_by_key(|b| b.date);
                (coin, Arc::new(bars))
            })
            .collect();

        Ok(Self {
            series,
            rejected,
            total_rows,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| ForecastError::Dataset(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    pub fn get(&self, series: &str) -> Option<Arc<Vec<Bar>>> {
        self.series.get(series).cloned()
    }

    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Lazily parsed, process-wide view of the static dataset
#[derive(Debug)]
pub struct HistoryCache {
    path: PathBuf,
    index: OnceLock<HistoryIndex>,
}

impl HistoryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: OnceLock::new(),
        }
    }

    /// Cache over an already parsed index
    pub fn from_index(index: HistoryIndex) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(index);
        Self {
            path: PathBuf::new(),
            index: cell,
        }
    }

    /// The parsed index, built on first call.
    ///
    /// A missing or unreadable dataset yields an empty index: read paths
    /// report "no data" instead of failing.
    pub fn index(&self) -> &HistoryIndex {
        self.index.get_or_init(|| self.load())
    }

    fn load(&self) -> HistoryIndex {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Static dataset not found; history unavailable");
            return HistoryIndex::default();
        }

        match HistoryIndex::from_path(&self.path) {
            Ok(index) => {
                for row in index.rejected().iter().take(20) {
                    warn!(line = row.line, reason = %row.reason, "Rejected dataset row");
                }
                if index.is_empty() {
                    warn!(path = %self.path.display(), "Static dataset is empty");
                } else {
                    info!(
                        path = %self.path.display(),
                        rows = index.total_rows(),
                        series = index.series_count(),
                        rejected = index.rejected().len(),
                        "📂 Static dataset parsed"
                    );
                }
                index
            }
            Err(e) => {
                warn!(error = %e, "Failed to read static dataset");
                HistoryIndex::default()
            }
        }
    }

    /// Bars for `series`, ascending by date. `None` when the series has no data.
    pub fn get(&self, series: &str) -> Option<Arc<Vec<Bar>>> {
        let bars = self.index().get(series);
        if bars.is_none() {
            debug!(series = %series, "No static history for series");
        }
        bars
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Date,Open,High,Low,Close,Volume,Coin
2024-01-03,1,2,0.5,1.5,100,coin_A
02-01-2024,1,2,0.5,1.2,100,coin_A
2024-01-01 00:00:00,1,2,0.5,1.1,100,coin_A
31/12/2023,10,11,9,10,5,coin_B
not-a-date,1,1,1,1,1,coin_A
2024-01-04,abc,1,1,1,1,coin_A
";

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date("2024-03-09"), Some(d));
        assert_eq!(parse_date("09-03-2024"), Some(d));
        assert_eq!(parse_date("09/03/2024"), Some(d));
        assert_eq!(parse_date("2024-03-09 13:45:00"), Some(d));
        assert_eq!(parse_date("2024-03-09T00:00:00+00:00"), Some(d));
        assert_eq!(parse_date("March 9th"), None);
    }

    #[test]
    fn test_index_groups_sorts_and_rejects() {
        let index = HistoryIndex::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(index.total_rows(), 6);
        assert_eq!(index.series_count(), 2);

        let a = index.get("coin_A").unwrap();
        let closes: Vec<f64> = a.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.1, 1.2, 1.5]);
        assert!(a.iter().all(|b| b.series_id == "coin_A"));

        let rejected = index.rejected();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].line, 6);
        assert!(rejected[0].reason.contains("not-a-date"));
        assert_eq!(rejected[1].line, 7);
    }

    #[test]
    fn test_missing_dataset_is_no_data() {
        let cache = HistoryCache::new("/nonexistent/ultronfx/history.csv");
        assert!(cache.get("coin_A").is_none());
        assert!(cache.index().is_empty());
    }

    #[test]
    fn test_unknown_series_is_no_data() {
        let cache = HistoryCache::from_index(HistoryIndex::from_reader(SAMPLE.as_bytes()).unwrap());
        assert!(cache.get("coin_Z").is_none());
        assert_eq!(cache.get("coin_B").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_first_access_parses_once() {
        let path = std::env::temp_dir().join(format!(
            "ultronfx_history_{}.csv",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, SAMPLE).unwrap();
        let cache = Arc::new(HistoryCache::new(path.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get("coin_A").map(|b| b.len()))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Some(3));
        }
        let first = cache.get("coin_A").unwrap();
        let second = cache.get("coin_A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let _ = std::fs::remove_file(&path);
    }
}
