//! Risk/reward assigner stage
//!
//! Two schemes:
//! - swing: stop at the swing extreme carried on the entry, targets at
//!   fractions of the entry-to-swing distance projected away from the stop
//! - atr: stop and targets at multiples of the entry bar's ATR
//!
//! Every level is rounded to 2 decimals. When the stop distance is not
//! positive the reward ratios stay undefined and the entry is skipped by the
//! outcome simulator.

use tracing::debug;

use super::config::RiskConfig;
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::series::{AnnotatedSeries, Column, Entry, RiskLevels};
use crate::types::round_price;
use crate::Direction;

const STAGE: &str = "risk/reward assigner";

/// Stop and targets of one entry. `None` when the scheme has no input (ATR undefined or zero).
pub fn levels_for(entry: &Entry, atr: Option<f64>, scheme: &RiskConfig) -> Option<RiskLevels> {
    let price = entry.price;
    let sign = match entry.direction {
        Direction::Bullish => 1.0,
        Direction::Bearish => -1.0,
    };

    let (stop, tp1, tp2) = match *scheme {
        RiskConfig::Swing {
            tp1_fraction,
            tp2_fraction,
        } => {
            let impulse = sign * (price - entry.swing);
            (
                entry.swing,
                price + sign * tp1_fraction * impulse,
                price + sign * tp2_fraction * impulse,
            )
        }
        RiskConfig::Atr {
            stop_atr,
            tp1_atr,
            tp2_atr,
        } => {
            let atr = atr.filter(|a| *a > 0.0)?;
            (
                price - sign * stop_atr * atr,
                price + sign * tp1_atr * atr,
                price + sign * tp2_atr * atr,
            )
        }
    };

    let stop_loss = round_price(stop);
    let take_profit_1 = round_price(tp1);
    let take_profit_2 = round_price(tp2);

    let risk = sign * (price - stop_loss);
    let ratio = |tp: f64| (risk > 0.0).then(|| round_price(sign * (tp - price) / risk));

    Some(RiskLevels {
        stop_loss,
        take_profit_1,
        take_profit_2,
        reward_ratio_1: ratio(take_profit_1),
        reward_ratio_2: ratio(take_profit_2),
    })
}

/// Assign levels to every entry of the series, returning (assigned, degenerate)
pub fn assign(series: &mut AnnotatedSeries, scheme: &RiskConfig) -> PipelineResult<(usize, usize)> {
    series.require(&[Column::Entry], STAGE)?;

    let mut assigned = 0;
    let mut degenerate = 0;
    for bar in series.bars_mut() {
        let Some(entry) = bar.entry else {
            bar.risk = None;
            continue;
        };
        bar.risk = levels_for(&entry, bar.atr, scheme);
        match &bar.risk {
            Some(levels) if levels.is_degenerate() => {
                debug!(
                    "degenerate risk at {}: entry {:.2}, stop {:.2}",
                    entry.time, entry.price, levels.stop_loss
                );
                degenerate += 1;
                assigned += 1;
            }
            Some(_) => assigned += 1,
            None => debug!("no risk levels at {}: ATR undefined", entry.time),
        }
    }

    series.mark_column(Column::RiskReward);
    Ok((assigned, degenerate))
}

pub struct RiskRewardAssigner {
    scheme: RiskConfig,
}

impl RiskRewardAssigner {
    pub fn new(scheme: RiskConfig) -> Self {
        Self { scheme }
    }
}

impl Stage for RiskRewardAssigner {
    fn name(&self) -> &'static str {
        "risk"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let (assigned, degenerate) = assign(&mut run.fast, &self.scheme)?;
        run.stats.degenerate_risk = degenerate;
        debug!(
            "[{}] risk levels on {} entries ({} degenerate)",
            run.symbol, assigned, degenerate
        );
        Ok(())
    }
}
