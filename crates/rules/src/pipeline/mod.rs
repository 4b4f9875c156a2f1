//! Execution pipeline: directory loading, retries, derived metrics and the
//! cached scan path on top of [`RuleEngine`](crate::engine::RuleEngine).

mod core;
mod metrics;
mod request;

pub use self::core::{DirectoryLoadReport, ExecutionPipeline, PipelineError};
pub use metrics::{PipelineMetrics, PipelineResult, PipelineStats};
pub use request::{ScanRequest, ScanResponse};

#[cfg(test)]
mod tests;
