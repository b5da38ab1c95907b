//! Breakout detector stage
//!
//! A bar is a breakout when, against the `range_window` bars before it:
//! 1. the trend bias is not neutral
//! 2. the window is a tight consolidation (`range / midprice <= range_pct`)
//! 3. its body is at least `body_multiplier` x the window's median body
//! 4. it closes beyond the window's high (bullish) or low (bearish)
//! 5. volume reaches `vol_multiplier` x the volume average
//! 6. RSI confirms (`>= rsi_threshold` bullish, `<= 100 - rsi_threshold` bearish)
//!
//! Bars with an undefined volume average or RSI are never breakouts.

use tracing::debug;

use super::config::BreakoutConfig;
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::indicators::{median, window_max, window_min};
use crate::series::{AnnotatedBar, AnnotatedSeries, Column};
use crate::Direction;

const STAGE: &str = "breakout detector";
const REQUIRED: [Column; 3] = [Column::TrendBias, Column::VolAvg, Column::Rsi];

/// Classify bar `i` against its trailing window
pub fn is_breakout(bars: &[AnnotatedBar], i: usize, config: &BreakoutConfig) -> bool {
    let w = config.range_window;
    if w == 0 || i < w || i >= bars.len() {
        return false;
    }

    let bar = &bars[i];
    let Some(direction) = bar.trend_bias.direction() else {
        return false;
    };

    let window = &bars[i - w..i];
    let (Some(max_high), Some(min_low)) = (
        window_max(window.iter().map(|b| b.candle.high)),
        window_min(window.iter().map(|b| b.candle.low)),
    ) else {
        return false;
    };

    let mid_price = (max_high + min_low) / 2.0;
    if mid_price <= 0.0 || (max_high - min_low) / mid_price > config.range_pct {
        return false;
    }

    let Some(median_body) = median(window.iter().map(|b| b.candle.body()).collect()) else {
        return false;
    };
    if bar.candle.body() < config.body_multiplier * median_body {
        return false;
    }

    let close = bar.candle.close;
    let broke_out = match direction {
        Direction::Bullish => close > max_high,
        Direction::Bearish => close < min_low,
    };
    if !broke_out {
        return false;
    }

    let (Some(vol_avg), Some(rsi)) = (bar.vol_avg, bar.rsi) else {
        return false;
    };
    if bar.candle.volume < config.vol_multiplier * vol_avg {
        return false;
    }

    match direction {
        Direction::Bullish => rsi >= config.rsi_threshold,
        Direction::Bearish => rsi <= 100.0 - config.rsi_threshold,
    }
}

/// Flag every breakout bar of the series
pub fn detect(series: &mut AnnotatedSeries, config: &BreakoutConfig) -> PipelineResult<usize> {
    series.require(&REQUIRED, STAGE)?;

    let flags: Vec<bool> = (0..series.len())
        .map(|i| is_breakout(series.bars(), i, config))
        .collect();

    for (bar, flag) in series.bars_mut().iter_mut().zip(&flags) {
        bar.is_breakout = *flag;
    }
    series.mark_column(Column::IsBreakout);

    Ok(flags.iter().filter(|&&f| f).count())
}

/// Breakout detection stage
pub struct BreakoutDetector {
    config: BreakoutConfig,
}

impl BreakoutDetector {
    pub fn new(config: BreakoutConfig) -> Self {
        Self { config }
    }
}

impl Stage for BreakoutDetector {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let count = detect(&mut run.fast, &self.config)?;
        run.stats.breakouts = count;
        debug!("[{}] {} breakouts flagged", run.symbol, count);
        Ok(())
    }
}

/// Clear flagged breakouts that fail the stricter `config`, returning how
/// many were cleared
pub fn revalidate(series: &mut AnnotatedSeries, config: &BreakoutConfig) -> PipelineResult<usize> {
    series.require(&[Column::IsBreakout], STAGE)?;

    let failing: Vec<usize> = (0..series.len())
        .filter(|&i| series.bars()[i].is_breakout && !is_breakout(series.bars(), i, config))
        .collect();

    for &i in &failing {
        series.bars_mut()[i].clear_breakout();
    }
    Ok(failing.len())
}

/// Re-checks flagged breakouts against stricter thresholds before any zone
/// or entry is derived from them
pub struct BreakoutRevalidator {
    config: BreakoutConfig,
}

impl BreakoutRevalidator {
    pub fn new(config: BreakoutConfig) -> Self {
        Self { config }
    }
}

impl Stage for BreakoutRevalidator {
    fn name(&self) -> &'static str {
        "revalidation"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        let cleared = revalidate(&mut run.fast, &self.config)?;

        run.stats.revalidated_out = cleared;
        run.stats.breakouts -= cleared.min(run.stats.breakouts);
        if cleared > 0 {
            debug!(
                "[{}] {} breakouts invalidated by revalidation",
                run.symbol, cleared
            );
        }
        Ok(())
    }
}
