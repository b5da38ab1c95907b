//! Binance public klines endpoint
//!
//! No API key is needed for market data. The client is blocking: it runs
//! inside rayon workers and `spawn_blocking` cycle tasks.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::types::CandleValidationError;
use crate::Candle;

/// Default REST base URL
pub const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";

/// Binance limit per request
const MAX_KLINES_PER_REQUEST: usize = 1000;

const RATE_LIMIT_DELAY_MS: u64 = 100;

/// One kline row. The API returns an array:
/// `[open_time, open, high, low, close, volume, close_time, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl BinanceKline {
    /// Parse from the raw JSON array
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 7 {
            return None;
        }

        Some(BinanceKline {
            open_time: raw[0].as_i64()?,
            open: raw[1].as_str()?.parse().ok()?,
            high: raw[2].as_str()?.parse().ok()?,
            low: raw[3].as_str()?.parse().ok()?,
            close: raw[4].as_str()?.parse().ok()?,
            volume: raw[5].as_str()?.parse().ok()?,
            close_time: raw[6].as_i64()?,
        })
    }
}

impl TryFrom<BinanceKline> for Candle {
    type Error = CandleValidationError;

    fn try_from(k: BinanceKline) -> Result<Self, Self::Error> {
        Candle::from_millis(k.open_time, k.open, k.high, k.low, k.close, k.volume)
    }
}

/// "btc/usdt", "BTC-USDT" -> "BTCUSDT"
pub fn to_binance_pair(symbol: &str) -> String {
    symbol
        .trim()
        .to_uppercase()
        .replace(['/', '-', '_'], "")
}

/// Convert klines to candles, dropping invalid ones
pub fn klines_to_candles(symbol: &str, klines: Vec<BinanceKline>) -> Vec<Candle> {
    let total = klines.len();
    let candles: Vec<Candle> = klines
        .into_iter()
        .filter_map(|k| match Candle::try_from(k) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Skipping invalid candle for {}: {}", symbol, e);
                None
            }
        })
        .collect();

    if candles.len() < total {
        warn!(
            "Skipped {} invalid candles out of {} for {}",
            total - candles.len(),
            total,
            symbol
        );
    }
    candles
}

/// Blocking Binance market-data client
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(BinanceClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// One klines request (at most 1000 rows)
    pub fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<BinanceKline>> {
        let url = format!("{}/klines", self.base_url);
        let pair = to_binance_pair(symbol);

        let mut params = vec![
            ("symbol", pair.clone()),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, MAX_KLINES_PER_REQUEST).to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }

        debug!(
            "Fetching klines: symbol={}, interval={}, limit={}",
            pair, interval, limit
        );

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .context("Failed to send request to Binance")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw: Vec<Vec<serde_json::Value>> =
            response.json().context("Failed to parse Binance response")?;

        Ok(raw.iter().filter_map(|row| BinanceKline::from_raw(row)).collect())
    }

    /// The most recent `limit` klines, paging backwards past the per-request cap
    pub fn recent_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<BinanceKline>> {
        let mut all: Vec<BinanceKline> = Vec::with_capacity(limit);
        let mut end_time: Option<i64> = None;

        while all.len() < limit {
            let want = (limit - all.len()).min(MAX_KLINES_PER_REQUEST);
            let mut page = self.get_klines(symbol, interval, None, end_time, want)?;
            if page.is_empty() {
                break;
            }
            let oldest = page[0].open_time;
            let short_page = page.len() < want;
            page.append(&mut all);
            all = page;

            if short_page {
                break;
            }
            end_time = Some(oldest - 1);
            std::thread::sleep(StdDuration::from_millis(RATE_LIMIT_DELAY_MS));
        }

        all.sort_by_key(|k| k.open_time);
        all.dedup_by_key(|k| k.open_time);
        Ok(all)
    }

    /// Everything from `days_back` days ago until now, paging forwards
    pub fn fetch_full_history(
        &self,
        symbol: &str,
        interval: &str,
        days_back: u32,
    ) -> Result<Vec<BinanceKline>> {
        let end_time = Utc::now().timestamp_millis();
        let mut current_start = (Utc::now() - Duration::days(days_back as i64)).timestamp_millis();

        info!(
            "Fetching {} {} from Binance ({} days back)",
            symbol, interval, days_back
        );

        let mut all = Vec::new();
        while current_start < end_time {
            let page = self.get_klines(
                symbol,
                interval,
                Some(current_start),
                Some(end_time),
                MAX_KLINES_PER_REQUEST,
            )?;
            let Some(last) = page.last() else {
                break;
            };
            current_start = last.open_time + 1;
            all.extend(page);

            std::thread::sleep(StdDuration::from_millis(RATE_LIMIT_DELAY_MS));
        }

        all.sort_by_key(|k| k.open_time);
        all.dedup_by_key(|k| k.open_time);

        info!("Fetched {} candles for {} {}", all.len(), symbol, interval);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kline_from_raw() {
        let raw = json!([
            1704067200000i64, "42000.10", "42100.00", "41900.50", "42050.00", "12.5",
            1704068099999i64, "525000.0", 1200, "6.0", "252000.0", "0"
        ]);
        let row = raw.as_array().unwrap();
        let kline = BinanceKline::from_raw(row).unwrap();

        assert_eq!(kline.open_time, 1704067200000);
        assert_eq!(kline.close, 42050.0);

        let candle = Candle::try_from(kline).unwrap();
        assert_eq!(candle.datetime.timestamp_millis(), 1704067200000);
        assert_eq!(candle.volume, 12.5);
    }

    #[test]
    fn test_malformed_kline_rejected() {
        let raw = json!([1704067200000i64, 42000.1, "42100.00"]);
        assert!(BinanceKline::from_raw(raw.as_array().unwrap()).is_none());
    }

    #[test]
    fn test_invalid_klines_dropped() {
        let good = BinanceKline {
            open_time: 0,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 1.0,
            close_time: 1,
        };
        let bad = BinanceKline {
            high: 8.0,
            ..good.clone()
        };
        assert_eq!(klines_to_candles("BTCUSDT", vec![good, bad]).len(), 1);
    }

    #[test]
    fn test_unparseable_timestamp_dropped() {
        let valid = BinanceKline {
            open_time: 1704067200000,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 1.0,
            close_time: 1704068099999,
        };
        let far_future = BinanceKline {
            open_time: i64::MAX,
            ..valid.clone()
        };
        assert_eq!(
            Candle::try_from(far_future.clone()),
            Err(CandleValidationError::TimestampOutOfRange(i64::MAX))
        );

        // nothing is back-dated to the epoch
        let candles = klines_to_candles("BTCUSDT", vec![far_future, valid]);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].datetime.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_pair_normalization() {
        assert_eq!(to_binance_pair("btc/usdt"), "BTCUSDT");
        assert_eq!(to_binance_pair("ETH-USDT"), "ETHUSDT");
        assert_eq!(to_binance_pair("SOLUSDT"), "SOLUSDT");
    }
}
