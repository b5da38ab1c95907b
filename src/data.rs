//! Bar ingestion
//!
//! CSV loading/saving and the [`BarSource`] abstraction used by backtests
//! (CSV files) and by the live loop (CSV or the Binance REST API).

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::binance::{klines_to_candles, BinanceClient};
use crate::config::{DataConfig, DataSource};
use crate::{Candle, Symbol};

/// Header names accepted for the timestamp column
const DATETIME_HEADERS: [&str; 5] = ["timestamp", "datetime", "date", "time", "open_time"];

#[derive(Debug, Error)]
pub enum DataError {
    #[error("missing required column '{column}' in {path}")]
    MissingColumn { column: &'static str, path: String },
}

/// Positions of the OHLCV fields in a CSV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    datetime: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> Result<Self, DataError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

        Ok(ColumnMap {
            datetime: find_column(&names, &DATETIME_HEADERS, path)?,
            open: find_column(&names, &["open"], path)?,
            high: find_column(&names, &["high"], path)?,
            low: find_column(&names, &["low"], path)?,
            close: find_column(&names, &["close"], path)?,
            volume: find_column(&names, &["volume"], path)?,
        })
    }
}

fn find_column(names: &[String], candidates: &[&'static str], path: &Path) -> Result<usize, DataError> {
    candidates
        .iter()
        .find_map(|c| names.iter().position(|n| n == c))
        .ok_or_else(|| DataError::MissingColumn {
            column: candidates[0],
            path: path.display().to_string(),
        })
}

/// Parse the timestamp formats found in exported bar files: RFC 3339,
/// `YYYY-MM-DD HH:MM[:SS]`, a plain date, or epoch seconds/milliseconds.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    match s.parse::<i64>() {
        // millisecond epochs are > 10^11 for any date after 1973
        Ok(ms) if ms.abs() >= 100_000_000_000 => DateTime::from_timestamp_millis(ms),
        Ok(secs) => DateTime::from_timestamp(secs, 0),
        Err(_) => None,
    }
}

/// Load OHLCV data from a CSV file
///
/// Columns are matched by header name, case-insensitively. Rows that fail
/// to parse or validate are skipped with a warning. The result is sorted by
/// timestamp with duplicates removed.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let map = ColumnMap::from_headers(reader.headers()?, path)?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        let field = |i: usize| record.get(i).map(str::trim).unwrap_or_default();
        let number = |i: usize| field(i).parse::<f64>().ok();

        let parsed = parse_datetime(field(map.datetime)).zip(
            number(map.open)
                .zip(number(map.high))
                .zip(number(map.low).zip(number(map.close)))
                .zip(number(map.volume)),
        );
        let Some((datetime, (((open, high), (low, close)), volume))) = parsed else {
            invalid_count += 1;
            warn!("Skipping unparsable row {} in {}", row_idx + 2, path.display());
            continue;
        };

        match Candle::new(datetime, open, high, low, close, volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {}: {}",
                    row_idx + 2,
                    path.display(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid rows out of {} in {}",
            invalid_count,
            invalid_count + candles.len(),
            path.display()
        );
    }

    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);
    Ok(candles)
}

/// Save candles to a CSV file, creating parent directories
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;
    for c in candles {
        writer.write_record([
            c.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", candles.len(), path.display());
    Ok(())
}

/// `{data_dir}/{symbol}_{timeframe}.csv`
pub fn csv_path(data_dir: impl AsRef<Path>, symbol: &Symbol, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.file_stem(), timeframe))
}

/// Provider of recent bars for one instrument and timeframe
pub trait BarSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Up to `limit` most recent bars, oldest first
    fn fetch(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;
}

/// Bars read from `{data_dir}/{symbol}_{timeframe}.csv`
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    data_dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Every bar in the file
    pub fn load(&self, symbol: &Symbol, timeframe: &str) -> Result<Vec<Candle>> {
        let path = csv_path(&self.data_dir, symbol, timeframe);
        load_csv(&path).with_context(|| format!("Failed to load {} {}", symbol, timeframe))
    }
}

impl BarSource for CsvBarSource {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn fetch(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let mut candles = self.load(symbol, timeframe)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }
}

/// Bars from the Binance public klines endpoint
#[derive(Debug, Clone)]
pub struct BinanceBarSource {
    client: BinanceClient,
}

impl BinanceBarSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: BinanceClient::new(base_url)?,
        })
    }

    pub fn client(&self) -> &BinanceClient {
        &self.client
    }
}

impl BarSource for BinanceBarSource {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn fetch(&self, symbol: &Symbol, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let klines = self.client.recent_klines(symbol.as_str(), timeframe, limit)?;
        Ok(klines_to_candles(symbol.as_str(), klines))
    }
}

/// Source selected by the `data` config section
pub fn bar_source(config: &DataConfig) -> Result<Arc<dyn BarSource>> {
    Ok(match config.source {
        DataSource::Csv => Arc::new(CsvBarSource::new(&config.data_dir)),
        DataSource::Binance => Arc::new(BinanceBarSource::new(config.binance_url.clone())?),
    })
}
