// Error taxonomy for the valuation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while building a benchmark or scoring candidates.
///
/// `Schema` and `EmptyPopulation` are fatal for the request that raised them.
/// `DegenerateWeight` is normally absorbed by the aggregator's single-dimension
/// fallback and only escapes when every fallback is degenerate as well.
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("schema error: column `{column}` missing from {context}")]
    Schema { column: String, context: String },

    #[error("empty population: {context}")]
    EmptyPopulation { context: String },

    #[error("degenerate weights: {context}")]
    DegenerateWeight { context: String },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid model artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    #[error("population source error: {0}")]
    Repository(String),
}

impl ValuationError {
    pub(crate) fn schema(column: impl Into<String>, context: impl Into<String>) -> Self {
        ValuationError::Schema {
            column: column.into(),
            context: context.into(),
        }
    }

    pub(crate) fn empty(context: impl Into<String>) -> Self {
        ValuationError::EmptyPopulation {
            context: context.into(),
        }
    }

    pub(crate) fn degenerate(context: impl Into<String>) -> Self {
        ValuationError::DegenerateWeight {
            context: context.into(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ValuationError::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ValuationError {
    fn from(err: anyhow::Error) -> Self {
        ValuationError::Repository(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, ValuationError>;
