//! Signal pipeline
//!
//! Strictly linear chain of stages over one fast and one slow series:
//!
//! indicators -> trend bias -> breakouts -> (optional revalidation) -> zones
//! -> entries -> risk/reward -> outcomes -> finalization
//!
//! Revalidation runs before zones so that entry bars are only ever claimed
//! by breakouts that survive it.
//!
//! All state of a run lives in [`PipelineRun`], which the caller owns and
//! passes through [`Pipeline::run`]. Re-running on the same input and
//! parameters produces identical output.

pub mod breakout;
pub mod config;
pub mod entry;
pub mod finalize;
pub mod indicators;
pub mod outcome;
pub mod risk;
pub mod trend;
pub mod zone;

pub use config::{
    BreakoutConfig, ConfirmationPolicy, EntryConfig, IndicatorConfig, OutcomeConfig,
    PipelineConfig, Profile, RiskConfig, ZoneConfig,
};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::series::AnnotatedSeries;
use crate::{Candle, Symbol};

/// Counters collected while a run moves through the stages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub breakouts: usize,
    pub zones: usize,
    pub entries: usize,
    pub degenerate_risk: usize,
    pub outcomes: usize,
    pub revalidated_out: usize,
    pub invalidated_entries: usize,
}

/// Everything one pipeline run reads and writes
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub symbol: Symbol,
    /// Decision-resolution series, annotated in place
    pub fast: AnnotatedSeries,
    /// Trend-context series
    pub slow: AnnotatedSeries,
    pub stats: RunStats,
}

impl PipelineRun {
    /// Create a run from raw candles. Fails with `EmptySeries` when either side has no bars.
    pub fn new(
        symbol: Symbol,
        fast_timeframe: &str,
        fast: Vec<Candle>,
        slow_timeframe: &str,
        slow: Vec<Candle>,
    ) -> PipelineResult<Self> {
        for (timeframe, candles) in [(fast_timeframe, &fast), (slow_timeframe, &slow)] {
            if candles.is_empty() {
                return Err(PipelineError::EmptySeries {
                    symbol: symbol.to_string(),
                    timeframe: timeframe.to_string(),
                });
            }
        }

        Ok(Self {
            symbol,
            fast: AnnotatedSeries::new(fast_timeframe, fast),
            slow: AnnotatedSeries::new(slow_timeframe, slow),
            stats: RunStats::default(),
        })
    }
}

/// One step of the pipeline
pub trait Stage {
    fn name(&self) -> &'static str;

    fn apply(&self, run: &mut PipelineRun) -> PipelineResult<()>;
}

/// Ordered stage chain built from a [`PipelineConfig`]
pub struct Pipeline {
    config: PipelineConfig,
    stages: Vec<Box<dyn Stage + Send + Sync>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;

        let mut stages: Vec<Box<dyn Stage + Send + Sync>> = vec![
            Box::new(indicators::IndicatorEngine::new(config.indicators.clone())),
            Box::new(trend::TrendClassifier),
            Box::new(breakout::BreakoutDetector::new(config.breakout.clone())),
        ];
        if let Some(stricter) = &config.revalidation {
            stages.push(Box::new(breakout::BreakoutRevalidator::new(stricter.clone())));
        }
        stages.push(Box::new(zone::ZoneCalculator::new(config.zone.clone())));
        stages.push(Box::new(entry::EntryScanner::new(config.entry.clone())));
        stages.push(Box::new(risk::RiskRewardAssigner::new(config.risk.clone())));
        stages.push(Box::new(outcome::OutcomeSimulator::new(config.outcome.clone())));
        stages.push(Box::new(finalize::EntryFinalizer));

        Ok(Self { config, stages })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, handing the run back to the caller
    pub fn run(&self, mut run: PipelineRun) -> PipelineResult<PipelineRun> {
        for stage in &self.stages {
            stage.apply(&mut run)?;
            debug!("[{}] stage {} done", run.symbol, stage.name());
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_empty_series_rejected() {
        let candle = Candle::new_unchecked(Utc::now(), 1.0, 1.0, 1.0, 1.0, 1.0);
        let err = PipelineRun::new(Symbol::new("BTC"), "15m", vec![], "1h", vec![candle])
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::EmptySeries {
                symbol: "BTC".to_string(),
                timeframe: "15m".to_string()
            }
        );
    }

    #[test]
    fn test_pipeline_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.outcome.max_holding = 0;
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_revalidation_runs_before_zones() {
        let mut config = PipelineConfig::default();
        assert!(!Pipeline::new(config.clone())
            .unwrap()
            .stage_names()
            .contains(&"revalidation"));

        config.revalidation = Some(BreakoutConfig::strict());
        let names = Pipeline::new(config).unwrap().stage_names();
        let at = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert_eq!(at("revalidation"), at("breakout") + 1);
        assert!(at("revalidation") < at("zone"));
        assert_eq!(names.last(), Some(&"finalize"));
    }
}
