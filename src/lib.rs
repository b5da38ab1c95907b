//! OTE Breakout Signals
//!
//! Multi-timeframe breakout detection with optimal-trade-entry (OTE)
//! retracement zones. Bars flow through a linear pipeline of stages that
//! annotate a fast series using trend context from a slow series; the same
//! pipeline backs offline backtests, A/B profile comparison and a periodic
//! live/paper signal loop.

pub mod backtest;
pub mod binance;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod journal;
pub mod paper;
pub mod pipeline;
pub mod scheduler;
pub mod series;
pub mod types;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineConfig, PipelineRun, Profile};
pub use series::{AnnotatedBar, AnnotatedSeries, Column};
pub use types::*;
