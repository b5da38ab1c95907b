//! Annotated price series
//!
//! A [`AnnotatedSeries`] wraps the raw candles of one instrument and one
//! timeframe. Each pipeline stage fills its own fields on the bars and
//! registers the columns it produced, so later stages can check their
//! preconditions before reading.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{PipelineError, PipelineResult};
use crate::{Bias, Candle, Direction, TradeOutcome};

/// Derived field groups produced by the pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    EmaFast,
    EmaSlow,
    Atr,
    Rsi,
    VolAvg,
    TrendBias,
    IsBreakout,
    Zone,
    Entry,
    RiskReward,
    Outcome,
}

impl Column {
    pub fn as_str(self) -> &'static str {
        match self {
            Column::EmaFast => "ema_fast",
            Column::EmaSlow => "ema_slow",
            Column::Atr => "atr",
            Column::Rsi => "rsi",
            Column::VolAvg => "vol_avg",
            Column::TrendBias => "trend_bias",
            Column::IsBreakout => "is_breakout",
            Column::Zone => "zone",
            Column::Entry => "is_entry",
            Column::RiskReward => "risk_reward",
            Column::Outcome => "trade_outcome",
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retracement band computed on a breakout bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Shallowest retracement level (closest to the breakout extreme)
    pub start: f64,
    pub best: f64,
    /// Deepest retracement level
    pub end: f64,
    pub direction: Direction,
    /// Swing low (bullish) or swing high (bearish) of the lookback window
    pub swing: f64,
}

/// Entry trigger recorded on the bar that re-entered a zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub price: f64,
    pub time: DateTime<Utc>,
    pub source_breakout_time: DateTime<Utc>,
    pub direction: Direction,
    /// Swing extreme carried over from the originating zone
    pub swing: f64,
}

/// Stop and targets assigned to an entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevels {
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    /// `None` when the stop distance is not positive
    pub reward_ratio_1: Option<f64>,
    pub reward_ratio_2: Option<f64>,
}

impl RiskLevels {
    /// True when the stop sits at or beyond the entry
    pub fn is_degenerate(&self) -> bool {
        self.reward_ratio_1.is_none() || self.reward_ratio_2.is_none()
    }
}

/// Simulated trade result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub kind: TradeOutcome,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub holding_duration: Duration,
    /// -1 for a stop, the target's reward ratio for a target hit, 0 on timeout
    pub reward_achieved: f64,
    /// Forward bars actually scanned
    pub bars_held: usize,
}

impl Outcome {
    pub fn holding_minutes(&self) -> f64 {
        self.holding_duration.num_seconds() as f64 / 60.0
    }

    /// A timeout cut short by the end of the series may still resolve once
    /// more bars print
    pub fn is_provisional(&self, max_holding: usize) -> bool {
        self.kind == TradeOutcome::Timeout && self.bars_held < max_holding
    }
}

/// A candle plus every field derived from it by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedBar {
    pub candle: Candle,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub vol_avg: Option<f64>,
    pub trend_bias: Bias,
    pub is_breakout: bool,
    pub zone: Option<Zone>,
    pub entry: Option<Entry>,
    pub risk: Option<RiskLevels>,
    pub outcome: Option<Outcome>,
}

impl AnnotatedBar {
    pub fn new(candle: Candle) -> Self {
        Self {
            candle,
            ema_fast: None,
            ema_slow: None,
            atr: None,
            rsi: None,
            vol_avg: None,
            trend_bias: Bias::Neutral,
            is_breakout: false,
            zone: None,
            entry: None,
            risk: None,
            outcome: None,
        }
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.candle.datetime
    }

    pub fn is_entry(&self) -> bool {
        self.entry.is_some()
    }

    /// Drop the entry and every field that depends on it
    pub fn clear_entry(&mut self) {
        self.entry = None;
        self.risk = None;
        self.outcome = None;
    }

    /// Drop the breakout flag and its zone
    pub fn clear_breakout(&mut self) {
        self.is_breakout = false;
        self.zone = None;
    }
}

/// Ordered bars of one instrument at one timeframe
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedSeries {
    timeframe: String,
    bars: Vec<AnnotatedBar>,
    columns: BTreeSet<Column>,
}

impl AnnotatedSeries {
    /// Wrap candles, sorting them by timestamp and dropping duplicate timestamps
    pub fn new(timeframe: impl Into<String>, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.datetime);
        candles.dedup_by_key(|c| c.datetime);

        Self {
            timeframe: timeframe.into(),
            bars: candles.into_iter().map(AnnotatedBar::new).collect(),
            columns: BTreeSet::new(),
        }
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[AnnotatedBar] {
        &self.bars
    }

    pub fn bars_mut(&mut self) -> &mut [AnnotatedBar] {
        &mut self.bars
    }

    pub fn get(&self, index: usize) -> Option<&AnnotatedBar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&AnnotatedBar> {
        self.bars.last()
    }

    /// Index of the bar with exactly this timestamp
    pub fn position(&self, datetime: DateTime<Utc>) -> Option<usize> {
        self.bars
            .binary_search_by_key(&datetime, |b| b.datetime())
            .ok()
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.columns.iter().copied()
    }

    pub fn mark_column(&mut self, column: Column) {
        self.columns.insert(column);
    }

    /// Fail with `MissingColumn` unless every column is present
    pub fn require(&self, columns: &[Column], stage: &'static str) -> PipelineResult<()> {
        match columns.iter().find(|c| !self.columns.contains(c)) {
            Some(&column) => Err(PipelineError::MissingColumn { column, stage }),
            None => Ok(()),
        }
    }

    /// Closing prices in bar order
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.candle.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.candle.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.candle.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.candle.volume).collect()
    }

    pub fn breakout_count(&self) -> usize {
        self.bars.iter().filter(|b| b.is_breakout).count()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AnnotatedBar> {
        self.bars.iter().filter(|b| b.is_entry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(minute: i64, close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle::new_unchecked(t, close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn test_series_sorts_and_dedups() {
        let series = AnnotatedSeries::new(
            "15m",
            vec![candle(30, 3.0), candle(0, 1.0), candle(15, 2.0), candle(15, 9.0)],
        );
        assert_eq!(series.len(), 3);
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_require_reports_first_missing_column() {
        let mut series = AnnotatedSeries::new("15m", vec![candle(0, 1.0)]);
        series.mark_column(Column::Rsi);

        assert!(series.require(&[Column::Rsi], "test").is_ok());
        let err = series
            .require(&[Column::Rsi, Column::VolAvg], "test")
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::MissingColumn {
                column: Column::VolAvg,
                stage: "test"
            }
        );
    }

    #[test]
    fn test_position_lookup() {
        let series = AnnotatedSeries::new("15m", vec![candle(0, 1.0), candle(15, 2.0)]);
        let t = series.bars()[1].datetime();
        assert_eq!(series.position(t), Some(1));
        assert_eq!(series.position(t + Duration::minutes(1)), None);
    }
}
