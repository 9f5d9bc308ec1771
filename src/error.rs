use thiserror::Error;

/// Errors surfaced by the forecast pipeline.
///
/// Only the request-level variants (`UnknownSeries`, `ShapeMismatch`,
/// `NonFiniteInput`, `NoWindowAvailable`, `InvalidMode`) reach callers of `ForecastService`;
/// the artifact variants are startup failures.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Unknown series: {0}")]
    UnknownSeries(String),

    #[error("Expected window shape ({expected_rows}, {expected_cols}), got ({rows}, {cols})")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Window value at row {row}, column {col} is not finite")]
    NonFiniteInput { row: usize, col: usize },

    #[error("No window available for {0}: none supplied, live feed unusable and no cached history")]
    NoWindowAvailable(String),

    #[error("Mode must be 'STATIC' or 'LIVE', got '{0}'")]
    InvalidMode(String),

    #[error("Scaler artifact error: {0}")]
    Scaler(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Recoverable live-feed conditions. Never returned to callers: the router
/// logs them and falls back to the static source.
#[derive(Debug, Error)]
pub enum LiveDataError {
    #[error("Live fetch failed: {0}")]
    FetchFailure(String),

    #[error("Live fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("Insufficient live data: {got} rows, need {need}")]
    Insufficient { got: usize, need: usize },
}

pub type Result<T> = std::result::Result<T, ForecastError>;
