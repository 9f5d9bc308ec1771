//! Column-wise indicator primitives.
//!
//! Every function maps a full price/volume column to a column of the same
//! length. Positions where an indicator is undefined hold `NaN`; the caller
//! resolves them with [`backfill_then_zero`].

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`, seeded with the
/// first value and without bias adjustment.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Simple rolling mean. `NaN` until the window is full, and for any window
/// containing a `NaN`.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    for end in (window - 1)..values.len() {
        let slice = &values[end + 1 - window..=end];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        out[end] = slice.iter().sum::<f64>() / window as f64;
    }
    out
}

/// First difference; position 0 is `NaN`.
pub fn diff(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = values[i] - values[i - 1];
    }
    out
}

/// One-bar percentage change; position 0 is `NaN`.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..values.len() {
        out[i] = values[i] / values[i - 1] - 1.0;
    }
    out
}

/// RSI from simple rolling means of gains and losses.
///
/// The undefined first delta counts as a zero move. A window with no losses
/// gives `gain/0 = inf` and therefore 100; a flat window gives `NaN`.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let deltas = diff(close);
    let gains: Vec<f64> = deltas
        .iter()
        .map(|&d| if d > 0.0 { d } else { 0.0 })
        .collect();
    let losses: Vec<f64> = deltas
        .iter()
        .map(|&d| if d < 0.0 { -d } else { 0.0 })
        .collect();

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(&g, &l)| {
            let rs = g / l;
            100.0 - 100.0 / (1.0 + rs)
        })
        .collect()
}

/// On-balance volume: running sum of `sign(close_diff) * volume`, with the
/// first bar contributing 0.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let deltas = diff(close);
    let mut acc = 0.0;
    deltas
        .iter()
        .zip(volume.iter())
        .map(|(&d, &v)| {
            let step = if d.is_nan() { 0.0 } else { sign(d) * v };
            acc += step;
            acc
        })
        .collect()
}

/// Accumulation/distribution index. A bar with `high == low` has a
/// close-location value of 0.
pub fn adi(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    (0..close.len())
        .map(|i| {
            let range = high[i] - low[i];
            let clv = if range == 0.0 {
                0.0
            } else {
                ((close[i] - low[i]) - (high[i] - close[i])) / range
            };
            let clv = if clv.is_nan() { 0.0 } else { clv };
            acc += clv * volume[i];
            acc
        })
        .collect()
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Fill `NaN` with the next valid value, then zero whatever is still `NaN`
/// or infinite.
pub fn backfill_then_zero(column: &mut [f64]) {
    let mut next_valid: Option<f64> = None;
    for v in column.iter_mut().rev() {
        if v.is_nan() {
            if let Some(n) = next_valid {
                *v = n;
            }
        } else {
            next_valid = Some(*v);
        }
    }

    for v in column.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}
