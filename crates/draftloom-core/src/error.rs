//! Core error types for draftloom.
//!
//! `DraftError` is used throughout the core (parser, stores, workflow).
//! `GenerationCallError` is the narrower failure surface of a single call to
//! the external text-generation service; it is always retried per call
//! before it can surface as a node failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::Violation;

/// Failure of one call to the text-generation service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationCallError {
    #[error("Rate limited by provider{}", retry_after_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Generation call timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

fn retry_after_suffix(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(" (retry after {}s)", s),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Outline parse error: {0}")]
    OutlineParse(String),

    #[error("Invalid source document: {0}")]
    InvalidDocument(String),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationCallError),

    #[error("Validation failed: {}", describe_violations(.0))]
    Validation(Vec<Violation>),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Step {step} exhausted: {message}")]
    StepExhausted { step: String, message: String },

    #[error("Task exceeded its time budget of {0}s")]
    TaskTimeout(u64),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DraftError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DraftError::OutlineParse(_) => ErrorKind::OutlineParse,
            DraftError::InvalidDocument(_) => ErrorKind::InvalidDocument,
            DraftError::Generation(_) => ErrorKind::Generation,
            DraftError::Validation(_) => ErrorKind::Validation,
            DraftError::Persistence(_) => ErrorKind::Persistence,
            DraftError::StepExhausted { .. } => ErrorKind::StepExhausted,
            DraftError::TaskTimeout(_) => ErrorKind::TaskTimeout,
            DraftError::Cancelled => ErrorKind::Cancelled,
            DraftError::NotFound(_) => ErrorKind::NotFound,
            DraftError::Config(_) => ErrorKind::Config,
            DraftError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a whole-task retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OutlineParse,
    InvalidDocument,
    Generation,
    Validation,
    Persistence,
    StepExhausted,
    TaskTimeout,
    Cancelled,
    NotFound,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutlineParse => "outline_parse",
            Self::InvalidDocument => "invalid_document",
            Self::Generation => "generation",
            Self::Validation => "validation",
            Self::Persistence => "persistence",
            Self::StepExhausted => "step_exhausted",
            Self::TaskTimeout => "task_timeout",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::OutlineParse
                | Self::InvalidDocument
                | Self::Cancelled
                | Self::NotFound
                | Self::Config
        )
    }
}

/// Structured, serializable error attached to a workflow state and surfaced
/// through the task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_error(error: &DraftError, step: Option<&str>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            step: step.map(|s| s.to_string()),
            at: Utc::now(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(!DraftError::OutlineParse("empty".into()).is_retryable());
        assert!(!DraftError::Cancelled.is_retryable());
        assert!(!DraftError::InvalidDocument("blank".into()).is_retryable());
        assert!(DraftError::Persistence("disk full".into()).is_retryable());
        assert!(DraftError::TaskTimeout(10).is_retryable());
        assert!(DraftError::from(GenerationCallError::Timeout).is_retryable());
    }

    #[test]
    fn test_error_record_carries_step() {
        let err = DraftError::StepExhausted {
            step: "generate_leaf_content".into(),
            message: "0 of 3 leaves generated".into(),
        };
        let record = ErrorRecord::from_error(&err, Some("generate_leaf_content"));
        assert_eq!(record.kind, ErrorKind::StepExhausted);
        assert_eq!(record.step.as_deref(), Some("generate_leaf_content"));
        assert!(record.message.contains("0 of 3"));
    }

    #[test]
    fn test_rate_limited_message() {
        let err = GenerationCallError::RateLimited {
            retry_after_secs: Some(7),
        };
        assert_eq!(err.to_string(), "Rate limited by provider (retry after 7s)");
    }
}
