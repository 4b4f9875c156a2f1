//! Error taxonomy for rule execution.

use quantscan_storage::{PoolError, QueryExecutionError, StorageError};
use thiserror::Error;

use crate::compiler::CompileError;

/// Failure of a single rule execution, or of a batch as a whole.
#[derive(Error, Debug, Clone)]
pub enum ScanError {
    #[error("rule '{rule_id}' not found{}", did_you_mean(.hint))]
    RuleNotFound {
        rule_id: String,
        /// Closest loaded rule id, if any is similar.
        hint: Option<String>,
    },

    #[error("invalid scan date '{0}', expected YYYY-MM-DD")]
    InvalidDateFormat(String),

    #[error("invalid time '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTimeFormat(String),

    #[error("compile error: {0}")]
    Compile(CompileError),

    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

fn did_you_mean(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" (did you mean '{h}'?)"),
        None => String::new(),
    }
}

impl ScanError {
    /// Resource failures abort a batch instead of becoming a failed rule.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            ScanError::Pool(_) | ScanError::Schema(_) | ScanError::WorkerPool(_)
        )
    }

    /// Bad caller input (date/time strings, unknown rule id).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ScanError::RuleNotFound { .. }
                | ScanError::InvalidDateFormat(_)
                | ScanError::InvalidTimeFormat(_)
        )
    }
}

impl From<CompileError> for ScanError {
    fn from(e: CompileError) -> Self {
        match e {
            CompileError::InvalidDate(d) => ScanError::InvalidDateFormat(d),
            CompileError::InvalidTime(t) => ScanError::InvalidTimeFormat(t),
            other => ScanError::Compile(other),
        }
    }
}

impl From<StorageError> for ScanError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Pool(p) => ScanError::Pool(p),
            StorageError::Query(q) => ScanError::Query(q),
            StorageError::Schema(s) => ScanError::Schema(s),
        }
    }
}
