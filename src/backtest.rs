//! Backtesting over stored bars
//!
//! A backtest is one full pipeline run over historical fast/slow series,
//! summarized per (symbol, profile). [`compare`] runs a batch of such
//! backtests in parallel for A/B comparison of profiles.

use anyhow::Result;
use indicatif::ProgressBar;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline::{Pipeline, PipelineConfig, PipelineRun, Profile};
use crate::types::round_dp;
use crate::{Candle, Symbol, TradeOutcome};

/// Per-run result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub symbol: String,
    pub profile: Profile,
    pub fast_timeframe: String,
    pub slow_timeframe: String,
    pub bars: usize,
    pub total_breakouts: usize,
    pub entries: usize,
    pub wins: usize,
    pub losses: usize,
    pub timeouts: usize,
    /// Entries skipped by the simulator because their stop distance was not positive
    pub degenerate: usize,
    /// Wins over all entries, percent
    pub win_rate: f64,
    pub avg_holding_minutes: f64,
    /// Sum of rewards in R multiples
    pub net_r: f64,
}

impl BacktestSummary {
    pub fn from_run(run: &PipelineRun, profile: Profile) -> Self {
        let series = &run.fast;
        let outcomes: Vec<_> = series.entries().filter_map(|b| b.outcome).collect();
        let entries = series.entries().count();

        let count = |pred: fn(TradeOutcome) -> bool| outcomes.iter().filter(|o| pred(o.kind)).count();
        let wins = count(TradeOutcome::is_win);
        let losses = count(|k| k == TradeOutcome::Stop);
        let timeouts = count(|k| k == TradeOutcome::Timeout);

        let win_rate = if entries > 0 {
            round_dp(wins as f64 / entries as f64 * 100.0, 2)
        } else {
            0.0
        };
        let avg_holding_minutes = if outcomes.is_empty() {
            0.0
        } else {
            let total: f64 = outcomes.iter().map(|o| o.holding_minutes()).sum();
            round_dp(total / outcomes.len() as f64, 1)
        };
        let net_r = round_dp(outcomes.iter().map(|o| o.reward_achieved).sum(), 2);

        BacktestSummary {
            symbol: run.symbol.to_string(),
            profile,
            fast_timeframe: series.timeframe().to_string(),
            slow_timeframe: run.slow.timeframe().to_string(),
            bars: series.len(),
            total_breakouts: series.breakout_count(),
            entries,
            wins,
            losses,
            timeouts,
            degenerate: run.stats.degenerate_risk,
            win_rate,
            avg_holding_minutes,
            net_r,
        }
    }
}

/// Run the full pipeline over one instrument's history
pub fn run_backtest(
    symbol: Symbol,
    fast_timeframe: &str,
    fast: Vec<Candle>,
    slow_timeframe: &str,
    slow: Vec<Candle>,
    config: &PipelineConfig,
) -> Result<(PipelineRun, BacktestSummary)> {
    let pipeline = Pipeline::new(config.clone())?;
    let run = PipelineRun::new(symbol, fast_timeframe, fast, slow_timeframe, slow)?;
    let run = pipeline.run(run)?;
    let summary = BacktestSummary::from_run(&run, config.profile);

    info!(
        "{} [{}]: {} breakouts, {} entries, {} wins, {} losses, net {:.2}R",
        summary.symbol,
        summary.profile,
        summary.total_breakouts,
        summary.entries,
        summary.wins,
        summary.losses,
        summary.net_r
    );

    Ok((run, summary))
}

/// One (symbol, parameter set) combination of a comparison batch
#[derive(Debug, Clone)]
pub struct CompareJob {
    pub symbol: Symbol,
    pub config: PipelineConfig,
}

/// Every symbol crossed with every parameter set
pub fn compare_jobs(symbols: &[Symbol], configs: &[PipelineConfig]) -> Vec<CompareJob> {
    symbols
        .iter()
        .cartesian_product(configs)
        .map(|(symbol, config)| CompareJob {
            symbol: symbol.clone(),
            config: config.clone(),
        })
        .collect()
}

/// Run a comparison batch in parallel
///
/// `load` returns the (fast, slow) candles of a symbol. A combination that
/// fails to load or run is logged and left out of the result; the others
/// are returned in job order.
pub fn compare<F>(
    jobs: &[CompareJob],
    fast_timeframe: &str,
    slow_timeframe: &str,
    load: F,
    progress: Option<&ProgressBar>,
) -> Vec<BacktestSummary>
where
    F: Fn(&Symbol) -> Result<(Vec<Candle>, Vec<Candle>)> + Sync,
{
    info!("Running {} backtests", jobs.len());

    jobs.par_iter()
        .filter_map(|job| {
            let result = load(&job.symbol).and_then(|(fast, slow)| {
                run_backtest(
                    job.symbol.clone(),
                    fast_timeframe,
                    fast,
                    slow_timeframe,
                    slow,
                    &job.config,
                )
            });

            if let Some(pb) = progress {
                pb.inc(1);
            }

            match result {
                Ok((_, summary)) => Some(summary),
                Err(e) => {
                    warn!(
                        "Skipping {} [{}]: {:#}",
                        job.symbol, job.config.profile, e
                    );
                    None
                }
            }
        })
        .collect()
}
