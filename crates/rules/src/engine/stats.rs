use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quantscan_storage::PoolStats;
use serde::Serialize;

use super::result::RuleResult;
use crate::compiler::CompileCacheStats;

/// Lifetime counters for one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleStats {
    pub rule_id: String,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub signals_generated: u64,
    pub mapping_errors: u64,
    /// Running mean over executions that reached the database.
    pub avg_execution_ms: f64,
    pub last_executed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RuleStats {
    fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, result: &RuleResult) {
        self.executions += 1;
        self.last_executed = Some(Utc::now());
        if result.skipped {
            self.skipped += 1;
            return;
        }
        if result.success {
            self.successes += 1;
        } else {
            self.failures += 1;
            self.last_error = result.error.clone();
        }
        self.signals_generated += result.signal_count as u64;
        self.mapping_errors += result.mapping_errors as u64;

        // Incremental mean: new_avg = prev_avg + (cur - prev_avg) / count
        let timed = self.successes + self.failures;
        let cur = result.elapsed_ms as f64;
        self.avg_execution_ms += (cur - self.avg_execution_ms) / timed as f64;
    }
}

/// Engine-wide snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub rules_loaded: usize,
    pub rules_enabled: usize,
    pub rules_generation: u64,
    pub workers: usize,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub skipped_executions: u64,
    pub total_signals: u64,
    pub mapping_errors: u64,
    pub batches_run: u64,
    pub avg_execution_ms: f64,
    pub query_cache: CompileCacheStats,
    pub pool: PoolStats,
}

/// Mutable counters behind the engine's stats lock.
#[derive(Debug, Default)]
pub(crate) struct StatsLedger {
    rules: HashMap<String, RuleStats>,
    pub batches_run: u64,
}

impl StatsLedger {
    pub fn record(&mut self, result: &RuleResult) {
        self.rules
            .entry(result.rule_id.clone())
            .or_insert_with(|| RuleStats::new(&result.rule_id))
            .record(result);
    }

    pub fn rule(&self, rule_id: &str) -> Option<&RuleStats> {
        self.rules.get(rule_id)
    }

    /// All rule stats sorted by id.
    pub fn all(&self) -> Vec<RuleStats> {
        let mut out: Vec<RuleStats> = self.rules.values().cloned().collect();
        out.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        out
    }

    /// Engine totals folded from the per-rule counters.
    pub fn totals(&self) -> Totals {
        let mut t = Totals::default();
        let mut weighted_ms = 0.0;
        for s in self.rules.values() {
            t.executions += s.executions;
            t.successes += s.successes;
            t.failures += s.failures;
            t.skipped += s.skipped;
            t.signals += s.signals_generated;
            t.mapping_errors += s.mapping_errors;
            weighted_ms += s.avg_execution_ms * (s.successes + s.failures) as f64;
        }
        let timed = t.successes + t.failures;
        if timed > 0 {
            t.avg_execution_ms = weighted_ms / timed as f64;
        }
        t
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Totals {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub skipped: u64,
    pub signals: u64,
    pub mapping_errors: u64,
    pub avg_execution_ms: f64,
}
