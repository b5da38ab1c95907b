//! Live signal loop
//!
//! One cycle task per symbol: fetch fast and slow bars, run the pipeline,
//! journal entries once their outcome is final. `--paper` also tracks simulated positions.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use ote_breakout::data::bar_source;
use ote_breakout::journal::Journal;
use ote_breakout::scheduler::{CycleTask, Scheduler, SymbolCycle};
use ote_breakout::{Pipeline, Profile};

use super::load_config;

pub fn run(
    config_path: String,
    paper: bool,
    interval: Option<u64>,
    profile: Option<Profile>,
    symbols: Option<String>,
) -> Result<()> {
    let mut config = load_config(&config_path, symbols)?;
    if let Some(profile) = profile {
        config.set_profile(profile);
    }
    if let Some(secs) = interval {
        config.live.interval_secs = secs;
    }
    let paper = paper || config.live.paper;

    let pipeline = Arc::new(Pipeline::new(config.pipeline_config()?)?);
    // blocking HTTP clients must be created and dropped outside the runtime
    let source = bar_source(&config.data)?;

    let journal_path = if config.live.journal.is_absolute() {
        config.live.journal.clone()
    } else {
        config.data.results_dir.join(&config.live.journal)
    };
    let journal = Arc::new(Journal::new(journal_path));

    info!("{}", "=".repeat(60));
    info!(
        "OTE breakout signals - {} mode",
        if paper { "PAPER" } else { "SIGNAL" }
    );
    info!("{}", "=".repeat(60));
    info!("Profile:    {}", pipeline.config().profile);
    info!("Symbols:    {:?}", config.trading.symbols);
    info!(
        "Timeframes: {} / {}",
        config.trading.fast_timeframe, config.trading.slow_timeframe
    );
    info!("Source:     {}", source.name());
    info!(
        "Interval:   {}s (retry {}s)",
        config.live.interval_secs, config.live.retry_secs
    );
    info!("Journal:    {}", journal.path().display());

    let tasks: Vec<SymbolCycle> = config
        .trading
        .symbols()
        .into_iter()
        .map(|symbol| {
            let cycle = SymbolCycle::new(
                symbol,
                Arc::clone(&source),
                Arc::clone(&pipeline),
                config.trading.clone(),
                Arc::clone(&journal),
            );
            if paper {
                cycle.with_paper()
            } else {
                cycle
            }
        })
        .collect();
    drop(source);

    let scheduler = Scheduler::new(
        Duration::from_secs(config.live.interval_secs),
        Duration::from_secs(config.live.retry_secs),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let finished = runtime.block_on(scheduler.run(tasks))?;

    for cycle in &finished {
        if let Some(book) = cycle.paper_book() {
            info!(
                "{}: {} open, {} closed, net {:.2}R",
                cycle.name(),
                book.open_positions().count(),
                book.closed_trades().len(),
                book.net_r()
            );
        }
    }

    info!("Shutdown complete");
    Ok(())
}
