//! Core data types used across the signal pipeline

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a bar was rejected at ingestion
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleValidationError {
    #[error("timestamp {0} ms is outside the representable range")]
    TimestampOutOfRange(i64),

    #[error("{field} price {value} is not positive")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("inverted bar: high {high} below low {low}")]
    InvertedRange { high: f64, low: f64 },

    #[error("{field} {value} outside the bar range [{low}, {high}]")]
    OutsideRange {
        field: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("negative volume {0}")]
    NegativeVolume(f64),
}

/// OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Build a bar, rejecting it when [`Candle::validate`] fails
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate().map(|()| candle)
    }

    /// Build a bar from epoch milliseconds, as exchanges report them
    pub fn from_millis(
        open_time_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let datetime = DateTime::from_timestamp_millis(open_time_ms)
            .ok_or(CandleValidationError::TimestampOutOfRange(open_time_ms))?;
        Self::new(datetime, open, high, low, close, volume)
    }

    /// Build a bar as given. Test fixtures and already validated rows only.
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Prices must be positive, the range not inverted, open and close
    /// inside the range, volume non-negative. The first violation wins.
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];
        // NaN fails the comparison and is rejected too
        if let Some(&(field, value)) = prices.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(CandleValidationError::NonPositivePrice { field, value });
        }

        let (low, high) = (self.low, self.high);
        if high < low {
            return Err(CandleValidationError::InvertedRange { high, low });
        }
        for (field, value) in [("open", self.open), ("close", self.close)] {
            if !(low..=high).contains(&value) {
                return Err(CandleValidationError::OutsideRange {
                    field,
                    value,
                    low,
                    high,
                });
            }
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }
        Ok(())
    }

    /// Absolute size of the candle body
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned into every run context, journal record and task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system friendly form ("BTC/USD" -> "BTC_USD")
    pub fn file_stem(&self) -> String {
        self.0.replace(['/', '\\', ':'], "_")
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directional regime of the slow timeframe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Bias {
    /// Tradable direction, `None` for a neutral regime
    pub fn direction(self) -> Option<Direction> {
        match self {
            Bias::Bullish => Some(Direction::Bullish),
            Bias::Bearish => Some(Direction::Bearish),
            Bias::Neutral => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bias::Bullish => "bullish",
            Bias::Bearish => "bearish",
            Bias::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade direction of a zone, entry or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Bearish => "bearish",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a simulated trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Target1,
    Target2,
    Stop,
    Timeout,
}

impl TradeOutcome {
    pub fn is_win(self) -> bool {
        matches!(self, TradeOutcome::Target1 | TradeOutcome::Target2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeOutcome::Target1 => "target1",
            TradeOutcome::Target2 => "target2",
            TradeOutcome::Stop => "stop",
            TradeOutcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round a value to `dp` decimal places, midpoints to even
///
/// Non-finite values are returned unchanged.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Round a price level to 2 decimals
pub fn round_price(value: f64) -> f64 {
    round_dp(value, 2)
}
