//! Filter translation errors.

use serde::Serialize;
use thiserror::Error;

/// A malformed value for a known column.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid value '{value}' for '{param}': expected {expected}")]
pub struct ClauseError {
    /// Parameter name as received.
    pub param: String,
    /// Column the parameter targets.
    pub column: String,
    pub value: String,
    pub expected: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// One or more parameters carried a value that does not parse for their column.
    #[error("invalid filter: {}", join(.0))]
    InvalidFilter(Vec<ClauseError>),
}

impl FilterError {
    /// The per-clause errors.
    pub fn clause_errors(&self) -> &[ClauseError] {
        match self {
            Self::InvalidFilter(errors) => errors,
        }
    }
}

fn join(errors: &[ClauseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
