//! OTE zone calculator stage

use tracing::debug;

use super::config::ZoneConfig;
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::indicators::{window_max, window_min};
use crate::series::{AnnotatedBar, AnnotatedSeries, Column, Zone};
use crate::types::round_price;
use crate::Direction;

const STAGE: &str = "zone calculator";

/// Retracement band of the breakout at `i`, if it has enough lookback
pub fn zone_for(bars: &[AnnotatedBar], i: usize, config: &ZoneConfig) -> Option<Zone> {
    if i < config.lookback || i >= bars.len() {
        return None;
    }
    let bar = &bars[i];
    let direction = bar.trend_bias.direction()?;
    let window = &bars[i - config.lookback..i];
    let fractions = [
        config.start_fraction,
        config.best_fraction,
        config.end_fraction,
    ];

    let (swing, [start, best, end]) = match direction {
        Direction::Bullish => {
            let swing_low = window_min(window.iter().map(|b| b.candle.low))?;
            let impulse = bar.candle.high - swing_low;
            (swing_low, fractions.map(|f| bar.candle.high - f * impulse))
        }
        Direction::Bearish => {
            let swing_high = window_max(window.iter().map(|b| b.candle.high))?;
            let impulse = swing_high - bar.candle.low;
            (swing_high, fractions.map(|f| bar.candle.low + f * impulse))
        }
    };

    Some(Zone {
        start: round_price(start),
        best: round_price(best),
        end: round_price(end),
        direction,
        swing,
    })
}

/// Attach a zone to every breakout bar with enough history
pub fn compute(series: &mut AnnotatedSeries, config: &ZoneConfig) -> PipelineResult<usize> {
    series.require(&[Column::IsBreakout], STAGE)?;

    let zones: Vec<Option<Zone>> = (0..series.len())
        .map(|i| {
            if series.bars()[i].is_breakout {
                zone_for(series.bars(), i, config)
            } else {
                None
            }
        })
        .collect();

    let mut count = 0;
    for (bar, zone) in series.bars_mut().iter_mut().zip(zones) {
        if let Some(z) = &zone {
            debug!(
                "{} zone at {}: {:.2} / {:.2} / {:.2} (swing {:.2})",
                z.direction,
                bar.datetime(),
                z.start,
                z.best,
                z.end,
                z.swing
            );
            count += 1;
        }
        bar.zone = zone;
    }
    series.mark_column(Column::Zone);
    Ok(count)
}

pub struct ZoneCalculator {
    config: ZoneConfig,
}

impl ZoneCalculator {
    pub fn new(config: ZoneConfig) -> Self {
        Self { config }
    }
}

impl Stage for ZoneCalculator {
    fn name(&self) -> &'static str {
        "zone"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        run.stats.zones = compute(&mut run.fast, &self.config)?;
        Ok(())
    }
}
