//! Sequence windows - the fixed `(72, 17)` model input

use ndarray::{s, Array2};

use crate::error::{ForecastError, LiveDataError, Result};
use crate::features::{to_matrix, FeatureEngine, FeatureVector};
use crate::types::{Bar, SEQ_LEN};

/// A window whose shape has already been checked, oldest row first
#[derive(Debug, Clone, PartialEq)]
pub struct Window(Array2<f64>);

impl Window {
    pub fn as_array(&self) -> &Array2<f64> {
        &self.0
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }

    pub fn rows(&self) -> usize {
        self.0.nrows()
    }
}

/// Builds model windows from caller input or raw bars
#[derive(Debug, Clone)]
pub struct SequenceWindowBuilder {
    seq_len: usize,
    engine: FeatureEngine,
}

impl Default for SequenceWindowBuilder {
    fn default() -> Self {
        Self::new(SEQ_LEN, FeatureEngine::default())
    }
}

impl SequenceWindowBuilder {
    pub fn new(seq_len: usize, engine: FeatureEngine) -> Self {
        Self { seq_len, engine }
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    /// Validate a caller-supplied matrix. Anything but `(seq_len, 17)` is
    /// rejected, as is any NaN or infinite cell.
    pub fn from_matrix(&self, matrix: Array2<f64>) -> Result<Window> {
        let (rows, cols) = matrix.dim();
        if rows != self.seq_len || cols != FeatureVector::NUM_FEATURES {
            return Err(self.mismatch(rows, cols));
        }
        if let Some(((row, col), _)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ForecastError::NonFiniteInput { row, col });
        }
        Ok(Window(matrix))
    }

    /// Validate a caller-supplied list of rows; ragged rows are a shape mismatch
    pub fn from_rows(&self, rows: &[Vec<f64>]) -> Result<Window> {
        let n = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(self.mismatch(n, bad.len()));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let matrix =
            Array2::from_shape_vec((n, width), flat).map_err(|_| self.mismatch(n, width))?;
        self.from_matrix(matrix)
    }

    /// Take the latest `seq_len` rows of computed features.
    ///
    /// Never pads: fewer rows than needed is `Insufficient`.
    pub fn from_features(
        &self,
        features: &[FeatureVector],
    ) -> std::result::Result<Window, LiveDataError> {
        if features.len() < self.seq_len {
            return Err(LiveDataError::Insufficient {
                got: features.len(),
                need: self.seq_len,
            });
        }
        let matrix = to_matrix(features);
        let start = matrix.nrows() - self.seq_len;
        Ok(Window(matrix.slice(s![start.., ..]).to_owned()))
    }

    /// Run the feature engine over every bar, then keep the latest `seq_len` rows
    pub fn from_bars(&self, bars: &[Bar]) -> std::result::Result<Window, LiveDataError> {
        self.from_features(&self.engine.compute(bars))
    }

    fn mismatch(&self, rows: usize, cols: usize) -> ForecastError {
        ForecastError::ShapeMismatch {
            expected_rows: self.seq_len,
            expected_cols: FeatureVector::NUM_FEATURES,
            rows,
            cols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(n: usize) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                Bar {
                    date: start + chrono::Duration::days(i as i64),
                    open: c,
                    high: c + 1.0,
                    low: c - 1.0,
                    close: c,
                    volume: 10.0,
                    series_id: "coin_Test".into(),
                }
            })
            .collect()
    }

    #[test]
    fn test_seventy_rows_is_shape_mismatch() {
        let builder = SequenceWindowBuilder::default();
        let err = builder.from_matrix(Array2::zeros((70, 17))).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ShapeMismatch { rows: 70, cols: 17, .. }
        ));
    }

    #[test]
    fn test_rows_accepts_exact_shape_only() {
        let builder = SequenceWindowBuilder::default();
        assert!(builder.from_rows(&vec![vec![0.0; 17]; 72]).is_ok());
        assert!(builder.from_rows(&vec![vec![0.0; 16]; 72]).is_err());

        let mut ragged = vec![vec![0.0; 17]; 72];
        ragged[10].pop();
        assert!(matches!(
            builder.from_rows(&ragged),
            Err(ForecastError::ShapeMismatch { .. })
        ));
        assert!(builder.from_rows(&[]).is_err());
    }

    #[test]
    fn test_non_finite_cells_rejected() {
        let builder = SequenceWindowBuilder::default();

        let mut rows = vec![vec![1.0; 17]; 72];
        rows[5][9] = f64::NAN;
        assert!(matches!(
            builder.from_rows(&rows),
            Err(ForecastError::NonFiniteInput { row: 5, col: 9 })
        ));

        rows[5][9] = 1.0;
        rows[71][3] = f64::INFINITY;
        assert!(matches!(
            builder.from_rows(&rows),
            Err(ForecastError::NonFiniteInput { row: 71, col: 3 })
        ));
    }

    #[test]
    fn test_feature_rows_exact_boundary() {
        let builder = SequenceWindowBuilder::default();
        let engine = FeatureEngine::default();

        let features = engine.compute(&bars(72));
        assert_eq!(features.len(), 72);
        let window = builder.from_features(&features).unwrap();
        assert_eq!(window.rows(), 72);
        assert_eq!(window.as_array()[[0, 3]], 100.0);

        assert!(matches!(
            builder.from_features(&features[1..]),
            Err(LiveDataError::Insufficient { got: 71, need: 72 })
        ));
    }

    #[test]
    fn test_from_bars_keeps_latest_rows() {
        let builder = SequenceWindowBuilder::default();
        let window = builder.from_bars(&bars(112)).unwrap();
        assert_eq!(window.as_array().dim(), (72, 17));
        assert_eq!(window.as_array()[[71, 3]], 211.0);
        assert_eq!(window.as_array()[[0, 3]], 140.0);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let builder = SequenceWindowBuilder::default();
        assert!(matches!(
            builder.from_bars(&bars(50)),
            Err(LiveDataError::Insufficient { got: 50, need: 72 })
        ));
    }
}
