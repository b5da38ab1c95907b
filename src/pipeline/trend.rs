//! Trend classifier stage
//!
//! Each fast bar takes the bias of the latest slow bar at or before its
//! timestamp (as-of join). Both series are sorted, so a single forward merge
//! is enough.

use tracing::debug;

use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::series::{AnnotatedBar, AnnotatedSeries, Column};
use crate::Bias;

const STAGE: &str = "trend classifier";

/// Bias of one slow bar from its two moving averages
pub fn bias_of(bar: &AnnotatedBar) -> Bias {
    match (bar.ema_fast, bar.ema_slow) {
        (Some(fast), Some(slow)) if fast > slow => Bias::Bullish,
        (Some(fast), Some(slow)) if fast < slow => Bias::Bearish,
        _ => Bias::Neutral,
    }
}

/// Attach `trend_bias` to every fast bar
pub fn classify(fast: &mut AnnotatedSeries, slow: &AnnotatedSeries) -> PipelineResult<()> {
    slow.require(&[Column::EmaFast, Column::EmaSlow], STAGE)?;

    let slow_bars = slow.bars();
    let mut cursor = 0usize;
    let mut current: Option<&AnnotatedBar> = None;

    for bar in fast.bars_mut() {
        let t = bar.datetime();
        while cursor < slow_bars.len() && slow_bars[cursor].datetime() <= t {
            current = Some(&slow_bars[cursor]);
            cursor += 1;
        }
        bar.trend_bias = current.map(bias_of).unwrap_or(Bias::Neutral);
    }

    fast.mark_column(Column::TrendBias);
    Ok(())
}

/// Stage wrapper around [`classify`]
pub struct TrendClassifier;

impl Stage for TrendClassifier {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        classify(&mut run.fast, &run.slow)?;

        let bullish = run
            .fast
            .bars()
            .iter()
            .filter(|b| b.trend_bias == Bias::Bullish)
            .count();
        let bearish = run
            .fast
            .bars()
            .iter()
            .filter(|b| b.trend_bias == Bias::Bearish)
            .count();
        debug!(
            "[{}] bias: {} bullish, {} bearish, {} neutral",
            run.symbol,
            bullish,
            bearish,
            run.fast.len() - bullish - bearish
        );
        Ok(())
    }
}
