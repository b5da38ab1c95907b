//! Pipeline error taxonomy

use thiserror::Error;

use crate::series::Column;

/// Errors raised by pipeline stages
///
/// Degenerate stop distances are not errors: those signals are skipped and
/// counted in [`crate::pipeline::RunStats`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("missing column `{column}` required by {stage}")]
    MissingColumn { column: Column, stage: &'static str },

    #[error("{stage} needs at least {required} bars, got {available}")]
    InsufficientHistory {
        stage: &'static str,
        required: usize,
        available: usize,
    },

    #[error("no {timeframe} bars for {symbol}")]
    EmptySeries { symbol: String, timeframe: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
