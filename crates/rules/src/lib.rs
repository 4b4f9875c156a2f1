//! Rule-driven market scanning.
//!
//! This crate provides:
//! - Rule definitions loadable from YAML or JSON files
//! - Validation with structured errors, warnings and suggestions
//! - A compiler from rule conditions to parameterized DuckDB SQL
//! - The rule engine (single rule and parallel batch execution)
//! - An execution pipeline with retries, metrics and a scan result cache

pub mod compiler;
pub mod engine;
pub mod loader;
pub mod pipeline;
pub mod schema;
pub mod validation;

pub use compiler::{CompileError, CompiledQuery, QueryBuilder, QueryRequest, RowShape};
pub use engine::{
    BatchResult, ExecutionContext, ExecutionOverrides, RuleEngine, RuleOutput, RuleResult,
    ScanError,
};
pub use loader::RuleLoader;
pub use pipeline::{ExecutionPipeline, PipelineError, PipelineResult, ScanRequest, ScanResponse};
pub use schema::{Rule, RuleType, Signal};
