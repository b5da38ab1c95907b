//! Periodic live/paper cycles
//!
//! The [`Scheduler`] drives one [`CycleTask`] per instrument on its own tokio
//! task. A cycle is blocking work (HTTP fetch, pipeline run, journal write)
//! and runs on the blocking pool. A failed cycle is logged and retried after
//! the shorter retry interval. Ctrl-C stops every task after its current
//! cycle.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::TradingConfig;
use crate::data::BarSource;
use crate::error::PipelineError;
use crate::journal::{Journal, SignalRecord};
use crate::paper::PaperBook;
use crate::pipeline::{Pipeline, PipelineRun};
use crate::Symbol;

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub bars: usize,
    pub entries: usize,
    pub new_signals: usize,
    /// Entries whose outcome is still provisional, journaled on a later cycle
    pub pending_signals: usize,
    pub paper_opened: usize,
    pub paper_closed: usize,
}

/// Unit of periodic work
pub trait CycleTask: Send + 'static {
    fn name(&self) -> String;

    fn run_cycle(&mut self) -> Result<CycleReport>;
}

/// Timer loop over a set of cycle tasks
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    retry_interval: Duration,
    max_cycles: Option<usize>,
}

impl Scheduler {
    pub fn new(interval: Duration, retry_interval: Duration) -> Self {
        Self {
            interval,
            retry_interval,
            max_cycles: None,
        }
    }

    /// Stop each task after `n` cycles
    pub fn with_max_cycles(mut self, n: usize) -> Self {
        self.max_cycles = Some(n);
        self
    }

    /// Run until Ctrl-C (or `max_cycles`)
    pub async fn run<T: CycleTask>(&self, tasks: Vec<T>) -> Result<Vec<T>> {
        self.run_until(tasks, async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Run until `shutdown` resolves (or `max_cycles`), handing the tasks back
    pub async fn run_until<T, F>(&self, tasks: Vec<T>, shutdown: F) -> Result<Vec<T>>
    where
        T: CycleTask,
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            shutdown.await;
            let _ = tx.send(true);
        });

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| tokio::spawn(self.clone().drive(task, rx.clone())))
            .collect();

        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            finished.push(handle.await??);
        }

        signal.abort();
        Ok(finished)
    }

    async fn drive<T: CycleTask>(self, mut task: T, mut shutdown: watch::Receiver<bool>) -> Result<T> {
        let name = task.name();
        let mut cycles = 0usize;

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = task.run_cycle();
                (task, result)
            })
            .await
            .map_err(|e| anyhow!("[{}] cycle task panicked: {}", name, e))?;
            task = returned;
            cycles += 1;

            let wait = match result {
                Ok(report) => {
                    info!(
                        "[{}] cycle {}: {} bars, {} entries, {} new signals ({} pending)",
                        name, cycles, report.bars, report.entries, report.new_signals, report.pending_signals
                    );
                    self.interval
                }
                Err(e) => {
                    error!(
                        "[{}] cycle {} failed: {:#}. Retrying in {:?}",
                        name, cycles, e, self.retry_interval
                    );
                    self.retry_interval
                }
            };

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Ok(()) = shutdown.changed() => {
                    debug!("[{}] shutdown requested", name);
                    break;
                }
            }
        }

        info!("[{}] stopped after {} cycles", name, cycles);
        Ok(task)
    }
}

/// Live cycle of one instrument: fetch, run the pipeline, journal entries
/// whose outcome is final, optionally keep a paper book.
///
/// Each entry is journaled exactly once. An entry whose simulated outcome is a
/// timeout cut short by the end of the window is held back until a later
/// cycle has enough bars to resolve it.
pub struct SymbolCycle {
    symbol: Symbol,
    source: Arc<dyn BarSource>,
    pipeline: Arc<Pipeline>,
    trading: TradingConfig,
    journal: Arc<Journal>,
    journaled: BTreeSet<DateTime<Utc>>,
    paper: Option<PaperBook>,
}

impl SymbolCycle {
    pub fn new(
        symbol: Symbol,
        source: Arc<dyn BarSource>,
        pipeline: Arc<Pipeline>,
        trading: TradingConfig,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            symbol,
            source,
            pipeline,
            trading,
            journal,
            journaled: BTreeSet::new(),
            paper: None,
        }
    }

    /// Also simulate positions for new entries
    pub fn with_paper(mut self) -> Self {
        let max_holding = self.pipeline.config().outcome.max_holding;
        self.paper = Some(PaperBook::new(self.symbol.clone(), max_holding));
        self
    }

    pub fn paper_book(&self) -> Option<&PaperBook> {
        self.paper.as_ref()
    }

    fn check_history(&self, timeframe: &str, required: usize, available: usize) -> Result<()> {
        if available < required {
            let err = PipelineError::InsufficientHistory {
                stage: "live cycle",
                required,
                available,
            };
            return Err(anyhow::Error::new(err).context(format!("{} {}", self.symbol, timeframe)));
        }
        Ok(())
    }
}

impl CycleTask for SymbolCycle {
    fn name(&self) -> String {
        self.symbol.to_string()
    }

    fn run_cycle(&mut self) -> Result<CycleReport> {
        let config = self.pipeline.config();
        let t = &self.trading;

        let fast = self.source.fetch(&self.symbol, &t.fast_timeframe, t.fast_limit)?;
        let slow = self.source.fetch(&self.symbol, &t.slow_timeframe, t.slow_limit)?;

        let fast_required = config.breakout.range_window.max(config.zone.lookback) + 1;
        self.check_history(&t.fast_timeframe, fast_required, fast.len())?;
        self.check_history(&t.slow_timeframe, config.indicators.ema_slow, slow.len())?;
        if fast.len() < config.warmup_bars() {
            warn!(
                "[{}] only {} {} bars, indicators need {} to warm up",
                self.symbol,
                fast.len(),
                t.fast_timeframe,
                config.warmup_bars()
            );
        }

        let run = PipelineRun::new(
            self.symbol.clone(),
            &t.fast_timeframe,
            fast,
            &t.slow_timeframe,
            slow,
        )?;
        let run = self.pipeline.run(run)?;

        // entry times below the window can never show up again
        if let Some(first) = run.fast.bars().first() {
            self.journaled = self.journaled.split_off(&first.datetime());
        }

        let max_holding = config.outcome.max_holding;
        let provisional: HashSet<DateTime<Utc>> = run
            .fast
            .entries()
            .filter(|bar| bar.outcome.is_some_and(|o| o.is_provisional(max_holding)))
            .map(|bar| bar.datetime())
            .collect();

        let records: Vec<SignalRecord> = SignalRecord::collect(&self.symbol, config.profile, &run.fast)
            .into_iter()
            .filter(|r| !self.journaled.contains(&r.entry_time) && !provisional.contains(&r.entry_time))
            .collect();
        self.journal.append(&records)?;
        self.journaled.extend(records.iter().map(|r| r.entry_time));
        let pending = provisional.len();
        if pending > 0 {
            debug!(
                "[{}] {} entries still open, journal deferred",
                self.symbol, pending
            );
        }
        for r in &records {
            info!(
                "[{}] new {} signal at {}: entry {:.2}, sl {:?}, tp1 {:?}, tp2 {:?}",
                self.symbol, r.direction, r.entry_time, r.entry_price, r.stop_loss, r.take_profit_1, r.take_profit_2
            );
        }

        let mut report = CycleReport {
            bars: run.fast.len(),
            entries: run.stats.entries,
            new_signals: records.len(),
            pending_signals: pending,
            ..Default::default()
        };
        if let Some(book) = self.paper.as_mut() {
            let update = book.sync(&run.fast);
            report.paper_opened = update.opened.len();
            report.paper_closed = update.closed.len();
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{csv_path, save_csv, CsvBarSource};
    use crate::pipeline::{IndicatorConfig, PipelineConfig};
    use crate::Candle;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::env::temp_dir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: Arc<AtomicUsize>,
    }

    impl CycleTask for Flaky {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn run_cycle(&mut self) -> Result<CycleReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("transient fetch error");
            }
            Ok(CycleReport::default())
        }
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_millis(5), Duration::from_millis(1)).with_max_cycles(3);

        let tasks = vec![
            Flaky {
                calls: Arc::clone(&calls),
            },
            Flaky {
                calls: Arc::clone(&calls),
            },
        ];
        let finished = scheduler
            .run_until(tasks, std::future::pending())
            .await
            .unwrap();

        assert_eq!(finished.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(3600), Duration::from_secs(3600));
        let tasks = vec![Flaky {
            calls: Arc::clone(&calls),
        }];

        scheduler
            .run_until(tasks, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn write_bars(dir: &std::path::Path, symbol: &Symbol, timeframe: &str, n: usize, step_minutes: i64) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..n)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.01;
                Candle::new_unchecked(
                    start + ChronoDuration::minutes(step_minutes * i as i64),
                    p,
                    p + 0.05,
                    p - 0.05,
                    p,
                    10.0,
                )
            })
            .collect();
        save_csv(csv_path(dir, symbol, timeframe), &candles).unwrap();
    }

    fn small_pipeline() -> Arc<Pipeline> {
        let mut config = PipelineConfig::default();
        config.indicators = IndicatorConfig {
            ema_fast: 3,
            ema_slow: 5,
            atr_period: 3,
            rsi_period: 3,
            vol_avg_period: 3,
        };
        Arc::new(Pipeline::new(config).unwrap())
    }

    #[test]
    fn test_symbol_cycle_reports_short_history() {
        let dir = temp_dir().join(format!("ote_cycle_short_{}", std::process::id()));
        let symbol = Symbol::new("BTCUSDT");
        write_bars(&dir, &symbol, "15m", 5, 15);
        write_bars(&dir, &symbol, "1h", 10, 60);

        let mut cycle = SymbolCycle::new(
            symbol,
            Arc::new(CsvBarSource::new(&dir)),
            small_pipeline(),
            TradingConfig::default(),
            Arc::new(Journal::new(dir.join("signals.csv"))),
        );
        let err = cycle.run_cycle().unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::InsufficientHistory {
                stage: "live cycle",
                required: 11,
                available: 5
            })
        );
    }

    #[test]
    fn test_symbol_cycle_runs_pipeline() {
        let dir = temp_dir().join(format!("ote_cycle_ok_{}", std::process::id()));
        let symbol = Symbol::new("ETHUSDT");
        write_bars(&dir, &symbol, "15m", 80, 15);
        write_bars(&dir, &symbol, "1h", 20, 60);

        let mut cycle = SymbolCycle::new(
            symbol,
            Arc::new(CsvBarSource::new(&dir)),
            small_pipeline(),
            TradingConfig {
                fast_limit: 60,
                ..TradingConfig::default()
            },
            Arc::new(Journal::new(dir.join("signals.csv"))),
        )
        .with_paper();

        let report = cycle.run_cycle().unwrap();
        assert_eq!(report.bars, 60);
        assert!(cycle.paper_book().is_some());
    }
}
