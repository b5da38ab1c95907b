//! Final consistency pass: every entry must still point at a live breakout

use tracing::debug;

use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::series::{AnnotatedSeries, Column};

const STAGE: &str = "entry finalizer";

/// Clear entries whose originating breakout is gone.
/// Returns (entries cleared, outcomes cleared).
pub fn drop_orphans(series: &mut AnnotatedSeries) -> PipelineResult<(usize, usize)> {
    series.require(&[Column::Entry], STAGE)?;

    let orphans: Vec<usize> = series
        .bars()
        .iter()
        .enumerate()
        .filter_map(|(i, bar)| {
            let entry = bar.entry?;
            let alive = series
                .position(entry.source_breakout_time)
                .and_then(|k| series.get(k))
                .is_some_and(|b| b.is_breakout);
            (!alive).then_some(i)
        })
        .collect();

    let mut outcomes = 0;
    for &i in &orphans {
        let bar = &mut series.bars_mut()[i];
        if bar.outcome.is_some() {
            outcomes += 1;
        }
        debug!("entry at {} lost its breakout, cleared", bar.datetime());
        bar.clear_entry();
    }

    Ok((orphans.len(), outcomes))
}

pub struct EntryFinalizer;

impl Stage for EntryFinalizer {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let (entries, outcomes) = drop_orphans(&mut run.fast)?;
        let stats = &mut run.stats;
        stats.invalidated_entries = entries;
        stats.entries = stats.entries.saturating_sub(entries);
        stats.outcomes = stats.outcomes.saturating_sub(outcomes);
        Ok(())
    }
}
