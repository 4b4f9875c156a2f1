//! Per-rule and per-batch execution outcomes.

use indexmap::IndexMap;
use serde::Serialize;

use super::error::ScanError;
use crate::schema::Signal;
use crate::validation::{ValidationError, ValidationWarning};

/// Outcome of one rule in one scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub success: bool,
    /// Disabled rules are skipped without touching the database.
    pub skipped: bool,
    pub signal_count: usize,
    pub rows_returned: usize,
    /// Rows dropped because a required column was missing or NULL.
    pub mapping_errors: usize,
    pub query_executed: bool,
    pub query_cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl RuleResult {
    pub(crate) fn skipped(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            success: true,
            skipped: true,
            signal_count: 0,
            rows_returned: 0,
            mapping_errors: 0,
            query_executed: false,
            query_cache_hit: false,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn failed(rule_id: &str, error: &ScanError, elapsed_ms: u64) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            success: false,
            skipped: false,
            signal_count: 0,
            rows_returned: 0,
            mapping_errors: 0,
            query_executed: false,
            query_cache_hit: false,
            error: Some(error.to_string()),
            elapsed_ms,
        }
    }
}

/// Result plus the signals it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutput {
    pub result: RuleResult,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub error: String,
}

/// Aggregate of one batch. `rule_results` keeps request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub scan_date: String,
    pub parallel: bool,
    pub total_rules: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub skipped_rules: usize,
    pub total_signals: usize,
    pub signals: Vec<Signal>,
    pub rule_results: IndexMap<String, RuleResult>,
    pub errors: Vec<RuleFailure>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    pub(crate) fn assemble(
        scan_date: &str,
        parallel: bool,
        outcomes: Vec<(String, Result<RuleOutput, ScanError>)>,
        elapsed_ms: u64,
    ) -> Self {
        let mut batch = Self {
            scan_date: scan_date.to_string(),
            parallel,
            total_rules: outcomes.len(),
            successful_executions: 0,
            failed_executions: 0,
            skipped_rules: 0,
            total_signals: 0,
            signals: Vec::new(),
            rule_results: IndexMap::with_capacity(outcomes.len()),
            errors: Vec::new(),
            elapsed_ms,
        };
        for (rule_id, outcome) in outcomes {
            match outcome {
                Ok(output) => {
                    batch.signals.extend(output.signals);
                    batch.rule_results.insert(rule_id, output.result);
                }
                Err(e) => {
                    let result = RuleResult::failed(&rule_id, &e, 0);
                    batch.rule_results.insert(rule_id, result);
                }
            }
        }
        batch.recount();
        batch
    }

    /// Ids whose latest attempt failed, in request order.
    pub fn failed_rule_ids(&self) -> Vec<String> {
        self.rule_results
            .values()
            .filter(|r| !r.success)
            .map(|r| r.rule_id.clone())
            .collect()
    }

    /// Replace the results of retried rules with their newer outcome.
    /// Signals of rules that now succeed are appended.
    pub(crate) fn merge_retry(&mut self, retry: BatchResult) {
        for (rule_id, result) in retry.rule_results {
            if let Some(slot) = self.rule_results.get_mut(&rule_id) {
                *slot = result;
            }
        }
        self.signals.extend(retry.signals);
        self.elapsed_ms += retry.elapsed_ms;
        self.recount();
    }

    fn recount(&mut self) {
        self.successful_executions = self.rule_results.values().filter(|r| r.success).count();
        self.failed_executions = self.rule_results.len() - self.successful_executions;
        self.skipped_rules = self.rule_results.values().filter(|r| r.skipped).count();
        self.total_signals = self.signals.len();
        self.errors = self
            .rule_results
            .values()
            .filter_map(|r| {
                r.error.as_ref().map(|e| RuleFailure {
                    rule_id: r.rule_id.clone(),
                    error: e.clone(),
                })
            })
            .collect();
    }
}

/// Validation outcome of one rule during loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleLoadIssue<T> {
    pub rule_id: String,
    pub issues: Vec<T>,
}

/// Summary of [`RuleEngine::load_rules`](super::RuleEngine::load_rules).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: usize,
    pub loaded_ids: Vec<String>,
    pub errors: Vec<RuleLoadIssue<ValidationError>>,
    pub warnings: Vec<RuleLoadIssue<ValidationWarning>>,
}
