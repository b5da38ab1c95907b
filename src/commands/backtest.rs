//! Backtest command implementation

use anyhow::{Context, Result};
use ote_breakout::backtest::{run_backtest, BacktestSummary};
use ote_breakout::data::CsvBarSource;
use ote_breakout::journal::{Journal, SignalRecord};
use ote_breakout::Profile;
use tracing::{info, warn};

use super::load_config;

pub fn run(config_path: String, profile: Option<Profile>, symbols: Option<String>) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(&config_path, symbols)?;
    if let Some(profile) = profile {
        info!("Overriding profile to: {}", profile);
        config.set_profile(profile);
    }
    let pipeline_config = config.pipeline_config()?;

    let t = &config.trading;
    let source = CsvBarSource::new(&config.data.data_dir);
    info!("Loading data from: {}", config.data.data_dir.display());

    let signals = Journal::new(
        config
            .data
            .results_dir
            .join(format!("signals_{}.csv", pipeline_config.profile)),
    );
    let summaries_journal = Journal::new(config.data.results_dir.join("backtest_summary.csv"));

    let mut summaries: Vec<BacktestSummary> = Vec::new();
    for symbol in t.symbols() {
        let loaded = source
            .load(&symbol, &t.fast_timeframe)
            .and_then(|fast| Ok((fast, source.load(&symbol, &t.slow_timeframe)?)));
        let (fast, slow) = match loaded {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Skipping {}: {:#}", symbol, e);
                continue;
            }
        };

        match run_backtest(
            symbol.clone(),
            &t.fast_timeframe,
            fast,
            &t.slow_timeframe,
            slow,
            &pipeline_config,
        ) {
            Ok((run, summary)) => {
                let records = SignalRecord::collect(&symbol, pipeline_config.profile, &run.fast);
                signals
                    .append(&records)
                    .with_context(|| format!("Failed to journal signals for {}", symbol))?;
                summaries.push(summary);
            }
            Err(e) => warn!("Backtest failed for {}: {:#}", symbol, e),
        }
    }

    summaries_journal.append(&summaries)?;
    print_summaries("BACKTEST RESULTS", &summaries);
    info!(
        "Signals written to {}, summaries to {}",
        signals.path().display(),
        summaries_journal.path().display()
    );

    Ok(())
}

/// Print the summary table
pub(crate) fn print_summaries(title: &str, summaries: &[BacktestSummary]) {
    println!("\n{}", "=".repeat(96));
    println!("{}", title);
    println!("{}", "=".repeat(96));
    println!(
        "{:<12} {:<8} {:>7} {:>9} {:>7} {:>5} {:>6} {:>8} {:>6} {:>9} {:>9} {:>8}",
        "Symbol", "Profile", "Bars", "Breakouts", "Entries", "Wins", "Losses", "Timeouts", "Degen", "WinRate%", "AvgHold", "NetR"
    );
    println!("{}", "-".repeat(96));
    for s in summaries {
        println!(
            "{:<12} {:<8} {:>7} {:>9} {:>7} {:>5} {:>6} {:>8} {:>6} {:>9.2} {:>9.1} {:>8.2}",
            s.symbol,
            s.profile.as_str(),
            s.bars,
            s.total_breakouts,
            s.entries,
            s.wins,
            s.losses,
            s.timeouts,
            s.degenerate,
            s.win_rate,
            s.avg_holding_minutes,
            s.net_r
        );
    }
    println!("{}", "=".repeat(96));
}
