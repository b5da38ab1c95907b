//! Outcome simulator stage
//!
//! Walks forward from each entry for at most `max_holding` bars. Within a
//! bar the stop is checked before the targets, so a bar that touches both
//! counts as a loss. No hit means a timeout at the close of the last bar
//! scanned.

use tracing::debug;

use super::config::OutcomeConfig;
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::series::{AnnotatedBar, AnnotatedSeries, Column, Outcome};
use crate::{Direction, TradeOutcome};

const STAGE: &str = "outcome simulator";

/// Simulate the trade opened on bar `i`. `None` for bars without usable risk levels.
pub fn simulate(bars: &[AnnotatedBar], i: usize, max_holding: usize) -> Option<Outcome> {
    let bar = bars.get(i)?;
    let entry = bar.entry?;
    let risk = bar.risk?;
    let (rr1, rr2) = (risk.reward_ratio_1?, risk.reward_ratio_2?);

    let last = (i + max_holding).min(bars.len() - 1);
    for (j, forward) in bars.iter().enumerate().take(last + 1).skip(i + 1) {
        let c = &forward.candle;
        let (stopped, hit_tp2, hit_tp1) = match entry.direction {
            Direction::Bullish => (
                c.low <= risk.stop_loss,
                c.high >= risk.take_profit_2,
                c.high >= risk.take_profit_1,
            ),
            Direction::Bearish => (
                c.high >= risk.stop_loss,
                c.low <= risk.take_profit_2,
                c.low <= risk.take_profit_1,
            ),
        };

        let hit = if stopped {
            Some((TradeOutcome::Stop, risk.stop_loss, -1.0))
        } else if hit_tp2 {
            Some((TradeOutcome::Target2, risk.take_profit_2, rr2))
        } else if hit_tp1 {
            Some((TradeOutcome::Target1, risk.take_profit_1, rr1))
        } else {
            None
        };

        if let Some((kind, exit_price, reward_achieved)) = hit {
            return Some(Outcome {
                kind,
                exit_price,
                exit_time: forward.datetime(),
                holding_duration: forward.datetime() - entry.time,
                reward_achieved,
                bars_held: j - i,
            });
        }
    }

    let exit = &bars[last];
    Some(Outcome {
        kind: TradeOutcome::Timeout,
        exit_price: exit.candle.close,
        exit_time: exit.datetime(),
        holding_duration: exit.datetime() - entry.time,
        reward_achieved: 0.0,
        bars_held: last - i,
    })
}

/// Attach outcomes to every entry with usable risk levels
pub fn resolve(series: &mut AnnotatedSeries, config: &OutcomeConfig) -> PipelineResult<usize> {
    series.require(&[Column::RiskReward], STAGE)?;

    let outcomes: Vec<Option<Outcome>> = (0..series.len())
        .map(|i| simulate(series.bars(), i, config.max_holding))
        .collect();

    let mut count = 0;
    for (bar, outcome) in series.bars_mut().iter_mut().zip(outcomes) {
        if let Some(o) = &outcome {
            debug!(
                "trade at {} -> {} at {:.2} after {} bars",
                bar.datetime(),
                o.kind,
                o.exit_price,
                o.bars_held
            );
            count += 1;
        }
        bar.outcome = outcome;
    }

    series.mark_column(Column::Outcome);
    Ok(count)
}

pub struct OutcomeSimulator {
    config: OutcomeConfig,
}

impl OutcomeSimulator {
    pub fn new(config: OutcomeConfig) -> Self {
        Self { config }
    }
}

impl Stage for OutcomeSimulator {
    fn name(&self) -> &'static str {
        "outcome"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        run.stats.outcomes = resolve(&mut run.fast, &self.config)?;
        Ok(())
    }
}
