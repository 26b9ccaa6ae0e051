//! Stage outcomes.
//!
//! `StageResult` is what collaborators see for each slot. It keeps "never
//! ran", "ran and returned nothing", "returned text we could not parse" and
//! "failed" apart, instead of collapsing them into a falsy value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm_client::CompletionError;
use crate::pipeline::normalizer::NormalizeError;

/// A validated stage value and the raw completion that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub raw: String,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Upstream(#[from] CompletionError),

    #[error(transparent)]
    Malformed(#[from] NormalizeError),

    #[error("failed to encode stage input: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StageError {
    /// Stable error code shared with the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            StageError::Upstream(CompletionError::Unavailable(_)) => "UPSTREAM_UNAVAILABLE",
            StageError::Upstream(CompletionError::Rejected { .. }) => "UPSTREAM_REJECTED",
            StageError::Upstream(CompletionError::InvalidPayload(_)) => "UPSTREAM_INVALID_PAYLOAD",
            StageError::Malformed(_) => "MALFORMED_RESPONSE",
            StageError::Encode(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum StageResult<T> {
    NotRun,
    Structured {
        value: T,
        raw: String,
    },
    /// The call succeeded but the text could not be normalized. The raw
    /// text is shown in place of structured fields.
    Unparsed {
        raw: String,
        reason: String,
    },
    Failed {
        code: String,
        message: String,
    },
    Skipped {
        reason: String,
    },
}

impl<T> Default for StageResult<T> {
    fn default() -> Self {
        StageResult::NotRun
    }
}

impl<T> StageResult<T> {
    pub fn from_stage(result: Result<StageOutput<T>, StageError>) -> Self {
        match result {
            Ok(output) => StageResult::Structured {
                value: output.value,
                raw: output.raw,
            },
            Err(e) => Self::from_error(&e),
        }
    }

    /// The slot recorded for a failed stage. Malformed text stays retrievable.
    pub fn from_error(error: &StageError) -> Self {
        match error {
            StageError::Malformed(e) => StageResult::Unparsed {
                raw: e.raw().to_string(),
                reason: e.to_string(),
            },
            e => StageResult::Failed {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StageResult::Skipped {
            reason: reason.into(),
        }
    }

    pub fn structured(&self) -> Option<&T> {
        match self {
            StageResult::Structured { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Retained completion text, whether or not it parsed.
    pub fn raw(&self) -> Option<&str> {
        match self {
            StageResult::Structured { raw, .. } | StageResult::Unparsed { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// True when the stage ran and did not produce a structured value.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StageResult::Unparsed { .. } | StageResult::Failed { .. }
        )
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, StageResult::Structured { .. })
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            StageResult::NotRun => "notRun",
            StageResult::Structured { .. } => "structured",
            StageResult::Unparsed { .. } => "unparsed",
            StageResult::Failed { .. } => "failed",
            StageResult::Skipped { .. } => "skipped",
        }
    }
}
