//! Technical indicators
//!
//! Moving averages are computed with the `ta` crate. ATR and RSI use Wilder's
//! smoothing, written out by hand because `ta` smooths both with a plain EMA.
//!
//! Every function returns one value per input bar and only reads past and
//! current bars. Bars inside the warm-up period are `None`.

use ordered_float::OrderedFloat;
use statrs::statistics::{Data, Median};
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Calculate Exponential Moving Average
///
/// Seeded with the first value, smoothing factor `2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

// =============================================================================
// Volatility
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Calculate Average True Range (ATR) using Wilder's smoothing
///
/// The first value is the mean of the first `period` true ranges, then
/// ATR = (prev_ATR * (period - 1) + current_TR) / period
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![None; close.len()];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(tr.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else {
            atr_value = atr_value.map(|prev| (prev * (period - 1) as f64 + tr[i]) / period as f64);
            result.push(atr_value);
        }
    }

    result
}

// =============================================================================
// Momentum
// =============================================================================

/// Calculate RSI (Relative Strength Index) with Wilder's smoothing
///
/// Gains and losses start at zero on the first bar and are smoothed with
/// `alpha = 1 / period`. Values are emitted from bar `period - 1` onwards; a
/// window without any loss reads 100.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        let change = if i == 0 { 0.0 } else { values[i] - values[i - 1] };
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if i == 0 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            avg_gain += alpha * (gain - avg_gain);
            avg_loss += alpha * (loss - avg_loss);
        }

        if i + 1 < period {
            result.push(None);
        } else if avg_loss == 0.0 {
            result.push(Some(100.0));
        } else {
            let rs = avg_gain / avg_loss;
            result.push(Some(100.0 - 100.0 / (1.0 + rs)));
        }
    }

    result
}

// =============================================================================
// Window helpers
// =============================================================================

/// Highest value of a window, `None` when empty
pub fn window_max(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().map(OrderedFloat).max().map(|v| v.0)
}

/// Lowest value of a window, `None` when empty
pub fn window_min(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().map(OrderedFloat).min().map(|v| v.0)
}

/// Median of a window (mean of the two middle values for even lengths)
pub fn median(values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(Data::new(values).median())
}

// =============================================================================
// Tests
// =============================================================================
