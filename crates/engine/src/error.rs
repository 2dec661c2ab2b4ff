use thiserror::Error;

use templar_core::error::PatternError;
use templar_oracle::OracleError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport-level oracle failure that survived the bounded retry.
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),

    /// The extractor lost or invented a parameter value. A hard stop for the
    /// sample: surfaced as an inconclusive verification, never retried
    /// silently.
    #[error("extraction failure on line {line_id}: lost {missing:?}, fabricated {fabricated:?}")]
    Extraction {
        line_id: String,
        missing: Vec<String>,
        fabricated: Vec<String>,
    },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}
