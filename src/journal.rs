//! Append-only CSV signal journal
//!
//! One flat row per entry ([`SignalRecord`]) or per backtest run
//! ([`crate::backtest::BacktestSummary`]). The header goes in only when the
//! file is new or empty. Appends from several instrument tasks are
//! serialized through a mutex, so rows never interleave.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::pipeline::Profile;
use crate::series::{AnnotatedBar, AnnotatedSeries};
use crate::Symbol;

/// Flattened view of one entry and everything derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub profile: Profile,
    pub direction: String,
    pub breakout_time: DateTime<Utc>,
    pub zone_start: Option<f64>,
    pub zone_best: Option<f64>,
    pub zone_end: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit_1: Option<f64>,
    pub take_profit_2: Option<f64>,
    pub reward_ratio_1: Option<f64>,
    pub reward_ratio_2: Option<f64>,
    pub outcome: Option<String>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub reward_achieved: Option<f64>,
    pub holding_minutes: Option<f64>,
}

impl SignalRecord {
    /// Build from an entry bar; `None` if the bar has no entry
    pub fn from_entry(
        symbol: &Symbol,
        profile: Profile,
        series: &AnnotatedSeries,
        bar: &AnnotatedBar,
    ) -> Option<Self> {
        let entry = bar.entry?;
        let zone = series
            .position(entry.source_breakout_time)
            .and_then(|i| series.get(i))
            .and_then(|b| b.zone);

        Some(SignalRecord {
            symbol: symbol.to_string(),
            profile,
            direction: entry.direction.to_string(),
            breakout_time: entry.source_breakout_time,
            zone_start: zone.map(|z| z.start),
            zone_best: zone.map(|z| z.best),
            zone_end: zone.map(|z| z.end),
            entry_time: entry.time,
            entry_price: entry.price,
            stop_loss: bar.risk.map(|r| r.stop_loss),
            take_profit_1: bar.risk.map(|r| r.take_profit_1),
            take_profit_2: bar.risk.map(|r| r.take_profit_2),
            reward_ratio_1: bar.risk.and_then(|r| r.reward_ratio_1),
            reward_ratio_2: bar.risk.and_then(|r| r.reward_ratio_2),
            outcome: bar.outcome.map(|o| o.kind.to_string()),
            exit_time: bar.outcome.map(|o| o.exit_time),
            exit_price: bar.outcome.map(|o| o.exit_price),
            reward_achieved: bar.outcome.map(|o| o.reward_achieved),
            holding_minutes: bar.outcome.map(|o| o.holding_minutes()),
        })
    }

    /// Every entry of a finished run
    pub fn collect(symbol: &Symbol, profile: Profile, series: &AnnotatedSeries) -> Vec<Self> {
        series
            .entries()
            .filter_map(|bar| Self::from_entry(symbol, profile, series, bar))
            .collect()
    }
}

/// Append-only CSV file shared between tasks
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows, writing the header first if the file is new or empty
    pub fn append<T: Serialize>(&self, records: &[T]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        // a poisoned lock only means another writer panicked mid-row
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        Ok(records.len())
    }

    /// Read every row back
    pub fn read_all<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        reader
            .deserialize()
            .collect::<std::result::Result<Vec<T>, _>>()
            .context("Failed to parse journal")
    }
}
