//! Integration tests for the OTE breakout pipeline
//!
//! Every scenario is built on the same synthetic tape: a tight
//! consolidation, one bullish breakout bar, a retracement into the OTE band
//! and a configurable follow-through bar. Bearish scenarios use the same tape
//! mirrored around 100.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::env::temp_dir;
use std::sync::Arc;

use ote_breakout::backtest::run_backtest;
use ote_breakout::config::TradingConfig;
use ote_breakout::data::{csv_path, save_csv, CsvBarSource};
use ote_breakout::journal::{Journal, SignalRecord};
use ote_breakout::paper::PaperBook;
use ote_breakout::scheduler::{CycleTask, SymbolCycle};
use ote_breakout::{
    Candle, Direction, Pipeline, PipelineConfig, PipelineRun, Profile, Symbol, TradeOutcome,
};

// =============================================================================
// Test Utilities
// =============================================================================

const BREAKOUT: usize = 12;
const ENTRY: usize = 15;
const BARS: usize = 25;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn bar(k: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    Candle::new(t0() + Duration::minutes(15 * k as i64), open, high, low, close, volume).unwrap()
}

/// Fast 15m tape. Bar 12 breaks out of a 0.2-wide range, bar 15 retraces
/// into the band and closes back above its start, bars 16.. repeat `follow`
/// as (open, high, low, close).
fn fast_tape(breakout_volume: f64, follow: (f64, f64, f64, f64)) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(BARS);
    for k in 0..BREAKOUT {
        let (open, close) = if k % 2 == 0 { (100.0, 100.1) } else { (100.1, 100.0) };
        candles.push(bar(k, open, 100.15, 99.95, close, 100.0));
    }
    candles.push(bar(BREAKOUT, 100.1, 102.0, 100.05, 101.6, breakout_volume));
    candles.push(bar(13, 101.6, 101.7, 101.2, 101.3, 100.0));
    candles.push(bar(14, 101.3, 101.4, 100.8, 100.9, 100.0));
    candles.push(bar(ENTRY, 100.9, 101.0, 100.3, 100.8, 100.0));

    let (open, high, low, close) = follow;
    for k in ENTRY + 1..BARS {
        candles.push(bar(k, open, high, low, close, 100.0));
    }
    candles
}

/// Slow 1h tape rising steadily through the whole fast window
fn slow_tape() -> Vec<Candle> {
    let start = t0() - Duration::hours(20);
    (0..30)
        .map(|i| {
            let close = 80.0 + i as f64;
            Candle::new(start + Duration::hours(i), close - 0.5, close + 0.5, close - 1.0, close, 1000.0)
                .unwrap()
        })
        .collect()
}

/// Price mirror of a tape around 100, turning a bullish tape into its bearish twin
fn mirrored(candles: Vec<Candle>) -> Vec<Candle> {
    candles
        .into_iter()
        .map(|c| {
            Candle::new(c.datetime, 200.0 - c.open, 200.0 - c.low, 200.0 - c.high, 200.0 - c.close, c.volume)
                .unwrap()
        })
        .collect()
}

const TARGET2_BAR: (f64, f64, f64, f64) = (100.8, 101.5, 100.7, 101.4);
const STOP_AND_TARGET_BAR: (f64, f64, f64, f64) = (100.8, 101.5, 99.9, 100.0);
const QUIET_BAR: (f64, f64, f64, f64) = (100.8, 100.95, 100.6, 100.9);

fn config(profile: Profile) -> PipelineConfig {
    PipelineConfig::from_value(&json!({
        "profile": profile,
        "indicators": {
            "ema_fast": 3,
            "ema_slow": 5,
            "atr_period": 3,
            "rsi_period": 3,
            "vol_avg_period": 5
        }
    }))
    .unwrap()
}

fn run(config: PipelineConfig, fast: Vec<Candle>) -> PipelineRun {
    run_with(config, fast, slow_tape())
}

fn run_with(config: PipelineConfig, fast: Vec<Candle>, slow: Vec<Candle>) -> PipelineRun {
    let pipeline = Pipeline::new(config).unwrap();
    let run = PipelineRun::new(Symbol::new("BTCUSDT"), "15m", fast, "1h", slow).unwrap();
    pipeline.run(run).unwrap()
}

// =============================================================================
// Signal Pipeline
// =============================================================================

#[test]
fn test_bullish_breakout_to_target2() {
    let result = run(config(Profile::Strict), fast_tape(500.0, TARGET2_BAR));
    let bars = result.fast.bars();

    assert_eq!(result.stats.breakouts, 1);
    assert_eq!(result.stats.zones, 1);
    assert_eq!(result.stats.entries, 1);
    assert_eq!(result.stats.outcomes, 1);
    assert!(bars[BREAKOUT].is_breakout);

    let zone = bars[BREAKOUT].zone.unwrap();
    assert_eq!(zone.direction, Direction::Bullish);
    assert_relative_eq!(zone.start, 100.73);
    assert_relative_eq!(zone.best, 100.55);
    assert_relative_eq!(zone.end, 100.38);
    assert_relative_eq!(zone.swing, 99.95);

    let entry = bars[ENTRY].entry.unwrap();
    assert_relative_eq!(entry.price, 100.8);
    assert_eq!(entry.source_breakout_time, bars[BREAKOUT].datetime());

    let risk = bars[ENTRY].risk.unwrap();
    assert_relative_eq!(risk.stop_loss, 99.95);
    assert_relative_eq!(risk.take_profit_1, 101.03);
    assert_relative_eq!(risk.take_profit_2, 101.33);
    assert_eq!(risk.reward_ratio_1, Some(0.27));
    assert_eq!(risk.reward_ratio_2, Some(0.62));

    let outcome = bars[ENTRY].outcome.unwrap();
    assert_eq!(outcome.kind, TradeOutcome::Target2);
    assert_relative_eq!(outcome.exit_price, 101.33);
    assert_relative_eq!(outcome.reward_achieved, 0.62);
    assert_eq!(outcome.bars_held, 1);
    assert_relative_eq!(outcome.holding_minutes(), 15.0);
}

#[test]
fn test_bearish_breakout_to_target2() {
    let result = run_with(
        config(Profile::Strict),
        mirrored(fast_tape(500.0, TARGET2_BAR)),
        mirrored(slow_tape()),
    );
    let bars = result.fast.bars();

    assert_eq!(result.stats.breakouts, 1);
    assert_eq!(result.stats.entries, 1);
    assert!(bars[BREAKOUT].is_breakout);

    let zone = bars[BREAKOUT].zone.unwrap();
    assert_eq!(zone.direction, Direction::Bearish);
    assert_relative_eq!(zone.start, 99.27, epsilon = 1e-9);
    assert_relative_eq!(zone.best, 99.45, epsilon = 1e-9);
    assert_relative_eq!(zone.end, 99.62, epsilon = 1e-9);
    assert_relative_eq!(zone.swing, 100.05, epsilon = 1e-9);

    let entry = bars[ENTRY].entry.unwrap();
    assert_eq!(entry.direction, Direction::Bearish);
    assert_relative_eq!(entry.price, 99.2, epsilon = 1e-9);

    // stop above the entry, targets below it
    let risk = bars[ENTRY].risk.unwrap();
    assert_relative_eq!(risk.stop_loss, 100.05, epsilon = 1e-9);
    assert_relative_eq!(risk.take_profit_1, 98.97, epsilon = 1e-9);
    assert_relative_eq!(risk.take_profit_2, 98.67, epsilon = 1e-9);
    assert_eq!(risk.reward_ratio_1, Some(0.27));
    assert_eq!(risk.reward_ratio_2, Some(0.62));

    let outcome = bars[ENTRY].outcome.unwrap();
    assert_eq!(outcome.kind, TradeOutcome::Target2);
    assert_relative_eq!(outcome.exit_price, 98.67, epsilon = 1e-9);
    assert_relative_eq!(outcome.reward_achieved, 0.62);
    assert_eq!(outcome.bars_held, 1);
}

#[test]
fn test_bearish_stop_on_high() {
    let result = run_with(
        config(Profile::Strict),
        mirrored(fast_tape(500.0, STOP_AND_TARGET_BAR)),
        mirrored(slow_tape()),
    );
    let outcome = result.fast.bars()[ENTRY].outcome.unwrap();

    assert_eq!(outcome.kind, TradeOutcome::Stop);
    assert_relative_eq!(outcome.exit_price, 100.05, epsilon = 1e-9);
    assert_relative_eq!(outcome.reward_achieved, -1.0);
}

#[test]
fn test_weak_volume_is_not_a_strict_breakout() {
    // volume 150 against an average of 110: 1.36x
    let strict = run(config(Profile::Strict), fast_tape(150.0, TARGET2_BAR));
    assert_eq!(strict.stats.breakouts, 0);
    assert_eq!(strict.fast.entries().count(), 0);

    let loose = run(config(Profile::Loose), fast_tape(150.0, TARGET2_BAR));
    assert_eq!(loose.stats.breakouts, 1);
    assert_eq!(loose.stats.entries, 1);
}

#[test]
fn test_stop_wins_when_bar_touches_both() {
    let result = run(config(Profile::Strict), fast_tape(500.0, STOP_AND_TARGET_BAR));
    let outcome = result.fast.bars()[ENTRY].outcome.unwrap();

    assert_eq!(outcome.kind, TradeOutcome::Stop);
    assert_relative_eq!(outcome.exit_price, 99.95);
    assert_relative_eq!(outcome.reward_achieved, -1.0);
}

#[test]
fn test_timeout_at_last_available_close() {
    let result = run(config(Profile::Strict), fast_tape(500.0, QUIET_BAR));
    let outcome = result.fast.bars()[ENTRY].outcome.unwrap();

    assert_eq!(outcome.kind, TradeOutcome::Timeout);
    assert_eq!(outcome.bars_held, BARS - 1 - ENTRY);
    assert_eq!(outcome.exit_time, result.fast.bars()[BARS - 1].datetime());
    assert_relative_eq!(outcome.exit_price, 100.9);
    assert_relative_eq!(outcome.reward_achieved, 0.0);
}

#[test]
fn test_rerun_is_identical() {
    let first = run(config(Profile::Strict), fast_tape(500.0, TARGET2_BAR));
    let second = run(config(Profile::Strict), fast_tape(500.0, TARGET2_BAR));

    assert_eq!(first.fast, second.fast);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_revalidation_clears_breakout_before_entries() {
    let mut cfg = config(Profile::Loose);
    cfg.revalidation = Some(config(Profile::Strict).breakout);

    let result = run(cfg, fast_tape(150.0, TARGET2_BAR));
    let bars = result.fast.bars();

    assert_eq!(result.stats.revalidated_out, 1);
    assert_eq!(result.stats.breakouts, 0);
    assert_eq!(result.stats.zones, 0);
    assert_eq!(result.stats.entries, 0);
    assert_eq!(result.stats.invalidated_entries, 0);
    assert!(!bars[BREAKOUT].is_breakout);
    assert!(bars[BREAKOUT].zone.is_none());
    assert!(bars[ENTRY].entry.is_none());
    assert!(bars[ENTRY].outcome.is_none());
}

#[test]
fn test_loose_profile_sizes_risk_from_atr() {
    let result = run(config(Profile::Loose), fast_tape(500.0, TARGET2_BAR));
    let bar = &result.fast.bars()[ENTRY];
    let risk = bar.risk.unwrap();
    let atr = bar.atr.unwrap();

    assert!(risk.stop_loss < 100.8);
    assert_relative_eq!(100.8 - risk.stop_loss, atr, epsilon = 0.01);
    // levels are rounded to cents, so ratios land near the multipliers
    assert_relative_eq!(risk.reward_ratio_1.unwrap(), 1.5, epsilon = 0.05);
    assert_relative_eq!(risk.reward_ratio_2.unwrap(), 3.0, epsilon = 0.05);
}

// =============================================================================
// Backtest, Journal and Paper Book
// =============================================================================

#[test]
fn test_backtest_from_csv_files() {
    let dir = temp_dir().join(format!("ote_it_backtest_{}", std::process::id()));
    let symbol = Symbol::new("BTCUSDT");
    save_csv(csv_path(&dir, &symbol, "15m"), &fast_tape(500.0, TARGET2_BAR)).unwrap();
    save_csv(csv_path(&dir, &symbol, "1h"), &slow_tape()).unwrap();

    let source = CsvBarSource::new(&dir);
    let fast = source.load(&symbol, "15m").unwrap();
    let slow = source.load(&symbol, "1h").unwrap();
    assert_eq!(fast.len(), BARS);

    let (_, summary) =
        run_backtest(symbol, "15m", fast, "1h", slow, &config(Profile::Strict)).unwrap();
    assert_eq!(summary.total_breakouts, 1);
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.wins, 1);
    assert_eq!(summary.losses, 0);
    assert_relative_eq!(summary.win_rate, 100.0);
    assert_relative_eq!(summary.avg_holding_minutes, 15.0);
    assert_relative_eq!(summary.net_r, 0.62);
}

#[test]
fn test_signal_journal_roundtrip() {
    let result = run(config(Profile::Strict), fast_tape(500.0, STOP_AND_TARGET_BAR));
    let records = SignalRecord::collect(&result.symbol, Profile::Strict, &result.fast);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].zone_start, Some(100.73));
    assert_eq!(records[0].outcome.as_deref(), Some("stop"));

    let path = temp_dir()
        .join(format!("ote_it_journal_{}", std::process::id()))
        .join("signals.csv");
    let _ = std::fs::remove_file(&path);
    let journal = Journal::new(&path);
    journal.append(&records).unwrap();

    let back: Vec<SignalRecord> = journal.read_all().unwrap();
    assert_eq!(back, records);
}

#[test]
fn test_paper_book_follows_pipeline() {
    let mut book = PaperBook::new(Symbol::new("BTCUSDT"), 20);

    // tape ends right after the entry: timeout is provisional
    let mut partial = fast_tape(500.0, TARGET2_BAR);
    partial.truncate(ENTRY + 1);
    let first = run(config(Profile::Strict), partial);
    let update = book.sync(&first.fast);
    assert_eq!(update.opened.len(), 1);
    assert!(update.closed.is_empty());

    let full = run(config(Profile::Strict), fast_tape(500.0, TARGET2_BAR));
    let update = book.sync(&full.fast);
    assert!(update.opened.is_empty());
    assert_eq!(update.closed.len(), 1);
    assert_eq!(update.closed[0].outcome, TradeOutcome::Target2);
    assert_relative_eq!(book.net_r(), 0.62);
}

#[test]
fn test_live_cycle_journals_entry_once_resolved() {
    let dir = temp_dir().join(format!("ote_it_live_{}", std::process::id()));
    let symbol = Symbol::new("BTCUSDT");
    let fast_path = csv_path(&dir, &symbol, "15m");
    save_csv(csv_path(&dir, &symbol, "1h"), &slow_tape()).unwrap();

    let journal_path = dir.join("signals.csv");
    let _ = std::fs::remove_file(&journal_path);
    let journal = Arc::new(Journal::new(&journal_path));
    let mut cycle = SymbolCycle::new(
        symbol,
        Arc::new(CsvBarSource::new(&dir)),
        Arc::new(Pipeline::new(config(Profile::Strict)).unwrap()),
        TradingConfig::default(),
        Arc::clone(&journal),
    );

    // first cycle ends on the entry bar: its timeout is provisional
    let mut partial = fast_tape(500.0, TARGET2_BAR);
    partial.truncate(ENTRY + 1);
    save_csv(&fast_path, &partial).unwrap();
    let report = cycle.run_cycle().unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(report.new_signals, 0);
    assert_eq!(report.pending_signals, 1);
    assert!(journal.read_all::<SignalRecord>().unwrap().is_empty());

    // the next bar resolves it
    save_csv(&fast_path, &fast_tape(500.0, TARGET2_BAR)).unwrap();
    let report = cycle.run_cycle().unwrap();
    assert_eq!(report.new_signals, 1);
    assert_eq!(report.pending_signals, 0);

    // already journaled, not written again
    let report = cycle.run_cycle().unwrap();
    assert_eq!(report.new_signals, 0);

    let journaled: Vec<SignalRecord> = journal.read_all().unwrap();
    assert_eq!(journaled.len(), 1);
    assert_eq!(journaled[0].outcome.as_deref(), Some("target2"));
    assert_eq!(journaled[0].reward_achieved, Some(0.62));
}
