//! Entry scanner stage
//!
//! After each zone, the next `max_wait` bars are scanned for the first one
//! that trades back into the band. The entry is recorded on that bar at its
//! close. When two zones trigger on the same bar, the earlier breakout keeps it.

use tracing::debug;

use super::config::{ConfirmationPolicy, EntryConfig};
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::series::{AnnotatedBar, AnnotatedSeries, Column, Entry, Zone};
use crate::Direction;

const STAGE: &str = "entry scanner";

/// Whether `bar` confirms a retracement into `zone`
pub fn confirms(bar: &AnnotatedBar, zone: &Zone, policy: ConfirmationPolicy) -> bool {
    let c = &bar.candle;
    let overlap = match zone.direction {
        Direction::Bullish => c.low <= zone.end && c.high >= zone.start,
        Direction::Bearish => c.high >= zone.end && c.low <= zone.start,
    };

    match policy {
        ConfirmationPolicy::Overlap => overlap,
        ConfirmationPolicy::OverlapAndClose => {
            overlap
                && match zone.direction {
                    Direction::Bullish => c.close >= zone.start,
                    Direction::Bearish => c.close <= zone.start,
                }
        }
    }
}

/// Record entries for every zone in the series
pub fn scan(series: &mut AnnotatedSeries, config: &EntryConfig) -> PipelineResult<usize> {
    series.require(&[Column::Zone], STAGE)?;

    for bar in series.bars_mut() {
        bar.clear_entry();
    }

    let n = series.len();
    let mut count = 0;
    for i in 0..n {
        let Some(zone) = series.bars()[i].zone else {
            continue;
        };
        let breakout_time = series.bars()[i].datetime();

        let last = (i + config.max_wait).min(n.saturating_sub(1));
        let hit = (i + 1..=last).find(|&j| {
            confirms(&series.bars()[j], &zone, config.confirmation_policy)
        });

        let Some(j) = hit else {
            continue;
        };
        let bar = &mut series.bars_mut()[j];
        if bar.entry.is_some() {
            debug!(
                "entry bar {} already claimed, breakout at {} skipped",
                bar.datetime(),
                breakout_time
            );
            continue;
        }

        bar.entry = Some(Entry {
            price: bar.candle.close,
            time: bar.datetime(),
            source_breakout_time: breakout_time,
            direction: zone.direction,
            swing: zone.swing,
        });
        count += 1;
    }

    series.mark_column(Column::Entry);
    Ok(count)
}

pub struct EntryScanner {
    config: EntryConfig,
}

impl EntryScanner {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }
}

impl Stage for EntryScanner {
    fn name(&self) -> &'static str {
        "entry"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let count = scan(&mut run.fast, &self.config)?;
        run.stats.entries = count;
        debug!("[{}] {} entries found", run.symbol, count);
        Ok(())
    }
}
