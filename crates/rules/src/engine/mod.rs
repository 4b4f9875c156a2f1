//! Rule engine: registry, per-rule execution and batches.

mod context;
mod core;
mod error;
mod mapping;
mod result;
mod signal;
mod stats;

pub use self::core::RuleEngine;
pub use context::{ContextMetrics, ExecutionContext, ExecutionOverrides};
pub use error::ScanError;
pub use mapping::{MappingError, CONFIDENCE_COLUMNS, DEFAULT_CONFIDENCE};
pub use result::{BatchResult, LoadReport, RuleFailure, RuleLoadIssue, RuleOutput, RuleResult};
pub use signal::{SignalCandidate, SignalGenerator, StandardSignalGenerator};
pub use stats::{EngineStats, RuleStats};
