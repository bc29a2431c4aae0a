//! Error types shared across the solver.

use thiserror::Error;

/// Errors surfaced by dataset construction, configuration handling and the
/// solver itself.
#[derive(Debug, Error)]
pub enum TreeboundError {
    /// The caller handed us something malformed (empty dataset, non-square
    /// cost matrix, mismatched reference matrix, ...). Aborts the fit.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal invariant was broken. This indicates a solver bug; the
    /// fit is reported as non-convergent.
    #[error("integrity violation in {location}: {reason}")]
    IntegrityViolation { location: &'static str, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl TreeboundError {
    pub fn integrity(location: &'static str, reason: impl Into<String>) -> Self {
        TreeboundError::IntegrityViolation { location, reason: reason.into() }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        TreeboundError::InvalidInput(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, TreeboundError>;
