//! Indicator engine stage

use tracing::debug;

use super::config::IndicatorConfig;
use super::{PipelineRun, Stage};
use crate::error::PipelineResult;
use crate::indicators::{atr, ema, rsi, sma};
use crate::series::{AnnotatedSeries, Column};

/// Adds EMA fast/slow, ATR, RSI and volume average to both series
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Annotate one series in place
    pub fn annotate(&self, series: &mut AnnotatedSeries) {
        let close = series.closes();
        let high = series.highs();
        let low = series.lows();
        let volume = series.volumes();

        let ema_fast = ema(&close, self.config.ema_fast);
        let ema_slow = ema(&close, self.config.ema_slow);
        let atr_vals = atr(&high, &low, &close, self.config.atr_period);
        let rsi_vals = rsi(&close, self.config.rsi_period);
        let vol_avg = sma(&volume, self.config.vol_avg_period);

        for (i, bar) in series.bars_mut().iter_mut().enumerate() {
            bar.ema_fast = ema_fast.get(i).copied().flatten();
            bar.ema_slow = ema_slow.get(i).copied().flatten();
            bar.atr = atr_vals.get(i).copied().flatten();
            bar.rsi = rsi_vals.get(i).copied().flatten();
            bar.vol_avg = vol_avg.get(i).copied().flatten();
        }

        for column in [
            Column::EmaFast,
            Column::EmaSlow,
            Column::Atr,
            Column::Rsi,
            Column::VolAvg,
        ] {
            series.mark_column(column);
        }

        if series.len() < self.config.ema_slow {
            debug!(
                "{} series has {} bars, ema_slow({}) stays undefined",
                series.timeframe(),
                series.len(),
                self.config.ema_slow
            );
        }
    }
}

impl Stage for IndicatorEngine {
    fn name(&self) -> &'static str {
        "indicators"
    }

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()> {
        self.annotate(&mut run.fast);
        self.annotate(&mut run.slow);
        Ok(())
    }
}
