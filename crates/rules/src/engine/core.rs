use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use quantscan_core::EngineConfig;
use quantscan_storage::QueryExecutor;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::context::{ExecutionContext, ExecutionOverrides, ResolvedScope};
use super::error::ScanError;
use super::mapping::map_rows;
use super::result::{BatchResult, LoadReport, RuleLoadIssue, RuleOutput, RuleResult};
use super::signal::{SignalGenerator, StandardSignalGenerator};
use super::stats::{EngineStats, RuleStats, StatsLedger};
use crate::compiler::{parse_scan_date, QueryBuilder, QueryRequest};
use crate::schema::{Rule, Signal};
use crate::validation::{fuzzy, RuleValidator, StandardRuleValidator};

type Outcome = (String, Result<RuleOutput, ScanError>);

/// Holds the loaded rules and runs them against the database.
///
/// Rules execute on a dedicated rayon pool sized to
/// `min(max_workers, pool max connections)`, so workers never wait on a
/// connection another worker holds.
pub struct RuleEngine {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
    validator: Arc<dyn RuleValidator>,
    generator: Arc<dyn SignalGenerator>,
    compiler: QueryBuilder,
    executor: QueryExecutor,
    workers: rayon::ThreadPool,
    worker_count: usize,
    generation: AtomicU64,
    stats: Mutex<StatsLedger>,
}

impl RuleEngine {
    /// Engine reading bars from `relation` through `executor`.
    pub fn new(
        executor: QueryExecutor,
        relation: impl Into<String>,
        config: &EngineConfig,
    ) -> Result<Self, ScanError> {
        let worker_count = config
            .max_workers
            .min(executor.pool().max_connections())
            .max(1);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("rule-worker-{i}"))
            .build()
            .map_err(|e| ScanError::WorkerPool(e.to_string()))?;
        let relation = relation.into();

        info!(
            workers = worker_count,
            relation = %relation,
            query_cache_capacity = config.query_cache_capacity,
            "rule engine ready"
        );

        Ok(Self {
            rules: RwLock::new(HashMap::new()),
            validator: Arc::new(StandardRuleValidator),
            generator: Arc::new(StandardSignalGenerator),
            compiler: QueryBuilder::new(relation, config.query_cache_capacity),
            executor,
            workers,
            worker_count,
            generation: AtomicU64::new(0),
            stats: Mutex::new(StatsLedger::default()),
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn RuleValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_signal_generator(mut self, generator: Arc<dyn SignalGenerator>) -> Self {
        self.generator = generator;
        self
    }

    // ── Rule registry ───────────────────────────────────────────────

    /// Validate and register `rules`. Rules with errors are rejected;
    /// valid rules replace any loaded rule with the same id.
    pub fn load_rules(&self, rules: Vec<Rule>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut accepted = Vec::new();

        for rule in rules {
            let result = self.validator.validate(&rule);
            if !result.warnings.is_empty() {
                for w in &result.warnings {
                    warn!(rule_id = %rule.rule_id, path = %w.path, "{}", w.message);
                }
                report.warnings.push(RuleLoadIssue {
                    rule_id: rule.rule_id.clone(),
                    issues: result.warnings,
                });
            }
            if !result.valid {
                for e in &result.errors {
                    error!(rule_id = %rule.rule_id, path = %e.path, "{}", e.message);
                }
                report.failed += 1;
                report.errors.push(RuleLoadIssue {
                    rule_id: rule.rule_id.clone(),
                    issues: result.errors,
                });
                continue;
            }
            accepted.push(rule);
        }

        if !accepted.is_empty() {
            let mut registry = self.rules.write().expect("rules lock poisoned");
            for rule in accepted {
                if registry.contains_key(&rule.rule_id) {
                    debug!(rule_id = %rule.rule_id, "replacing loaded rule");
                }
                report.loaded_ids.push(rule.rule_id.clone());
                registry.insert(rule.rule_id.clone(), Arc::new(rule));
            }
            report.loaded = report.loaded_ids.len();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        info!(
            loaded = report.loaded,
            failed = report.failed,
            "rules loaded"
        );
        report
    }

    /// Remove a rule. Returns whether it was loaded.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self
            .rules
            .write()
            .expect("rules lock poisoned")
            .remove(rule_id)
            .is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn rule(&self, rule_id: &str) -> Option<Rule> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .get(rule_id)
            .map(|r| Rule::clone(r))
    }

    /// Every loaded id, sorted.
    pub fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rules
            .read()
            .expect("rules lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Enabled rules, highest priority first, then by id.
    pub fn enabled_rule_ids(&self) -> Vec<String> {
        let rules = self.rules.read().expect("rules lock poisoned");
        let mut enabled: Vec<&Rule> = rules
            .values()
            .map(|r| r.as_ref())
            .filter(|r| r.enabled)
            .collect();
        enabled.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        enabled.into_iter().map(|r| r.rule_id.clone()).collect()
    }

    /// Bumped whenever the rule set changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn lookup(&self, rule_id: &str) -> Result<Arc<Rule>, ScanError> {
        let rules = self.rules.read().expect("rules lock poisoned");
        rules.get(rule_id).cloned().ok_or_else(|| ScanError::RuleNotFound {
            rule_id: rule_id.to_string(),
            hint: fuzzy::closest(rule_id, rules.keys().map(String::as_str)).map(str::to_string),
        })
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run one rule for `scan_date`.
    pub fn execute_rule(
        &self,
        rule_id: &str,
        scan_date: &str,
        context: Option<&mut ExecutionContext>,
        overrides: &ExecutionOverrides,
    ) -> Result<RuleOutput, ScanError> {
        if parse_scan_date(scan_date).is_none() {
            return Err(ScanError::InvalidDateFormat(scan_date.to_string()));
        }
        let scope = ResolvedScope::resolve(context.as_deref(), overrides);
        let outcome = self.run_rule(rule_id, scan_date, &scope);
        if let Some(ctx) = context {
            ctx.record(&outcome);
        }
        outcome
    }

    /// Run `rule_ids` in order (or on the worker pool when `parallel`).
    ///
    /// A rule that fails becomes a failed entry in the result; other rules
    /// still run. Resource failures (pool, schema, worker pool) abort the
    /// batch once every rule has returned.
    pub fn execute_rules_batch(
        &self,
        rule_ids: &[String],
        scan_date: &str,
        parallel: bool,
        context: Option<&mut ExecutionContext>,
        overrides: &ExecutionOverrides,
    ) -> Result<BatchResult, ScanError> {
        let started = Instant::now();
        if parse_scan_date(scan_date).is_none() {
            return Err(ScanError::InvalidDateFormat(scan_date.to_string()));
        }

        let mut seen = HashSet::new();
        let ids: Vec<&str> = rule_ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();
        let scope = ResolvedScope::resolve(context.as_deref(), overrides);

        let run_parallel = parallel && ids.len() > 1;
        let outcomes: Vec<Outcome> = if run_parallel {
            self.workers.install(|| {
                ids.par_iter()
                    .map(|id| (id.to_string(), self.run_rule(id, scan_date, &scope)))
                    .collect()
            })
        } else {
            ids.iter()
                .map(|id| (id.to_string(), self.run_rule(id, scan_date, &scope)))
                .collect()
        };

        if let Some(ctx) = context {
            for (_, outcome) in &outcomes {
                ctx.record(outcome);
            }
        }

        self.stats.lock().expect("stats lock poisoned").batches_run += 1;

        let resource_error = outcomes.iter().find_map(|(_, o)| match o {
            Err(e) if e.is_resource_error() => Some(e.clone()),
            _ => None,
        });
        if let Some(e) = resource_error {
            error!(scan_date, error = %e, "batch aborted");
            return Err(e);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let batch = BatchResult::assemble(scan_date, run_parallel, outcomes, elapsed_ms);
        info!(
            scan_date,
            rules = batch.total_rules,
            succeeded = batch.successful_executions,
            failed = batch.failed_executions,
            signals = batch.total_signals,
            parallel = run_parallel,
            elapsed_ms,
            "batch complete"
        );
        Ok(batch)
    }

    fn run_rule(
        &self,
        rule_id: &str,
        scan_date: &str,
        scope: &ResolvedScope,
    ) -> Result<RuleOutput, ScanError> {
        let started = Instant::now();
        let rule = self.lookup(rule_id)?;

        if !rule.enabled {
            debug!(rule_id, "rule disabled, skipping");
            let result = RuleResult::skipped(rule_id);
            self.record(&result);
            return Ok(RuleOutput {
                result,
                signals: Vec::new(),
            });
        }

        let outcome = self.evaluate(&rule, scan_date, scope, started);
        match &outcome {
            Ok(output) => {
                self.record(&output.result);
                debug!(
                    rule_id,
                    rows = output.result.rows_returned,
                    signals = output.result.signal_count,
                    cache_hit = output.result.query_cache_hit,
                    elapsed_ms = output.result.elapsed_ms,
                    "rule executed"
                );
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.record(&RuleResult::failed(rule_id, e, elapsed_ms));
                warn!(rule_id, error = %e, "rule execution failed");
            }
        }
        outcome
    }

    fn evaluate(
        &self,
        rule: &Rule,
        scan_date: &str,
        scope: &ResolvedScope,
        started: Instant,
    ) -> Result<RuleOutput, ScanError> {
        let request = QueryRequest::new(rule.rule_type, &rule.conditions, scan_date)
            .window(scope.start_time.as_deref(), scope.end_time.as_deref())
            .symbols(scope.symbols.as_deref());
        let (query, cache_hit) = self.compiler.compile_tracked(&request)?;
        let rows = self.executor.run_query(&query.sql, &query.params)?;

        let mapped = map_rows(&rule.rule_id, query.shape, &rows);
        let mut candidates = mapped.candidates;
        if let Some(limit) = scope.max_results {
            candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            candidates.truncate(limit);
        }
        let signals: Vec<Signal> = candidates
            .into_iter()
            .map(|c| self.generator.generate(rule, scan_date, c))
            .collect();

        Ok(RuleOutput {
            result: RuleResult {
                rule_id: rule.rule_id.clone(),
                success: true,
                skipped: false,
                signal_count: signals.len(),
                rows_returned: rows.len(),
                mapping_errors: mapped.errors.len(),
                query_executed: true,
                query_cache_hit: cache_hit,
                error: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            signals,
        })
    }

    fn record(&self, result: &RuleResult) {
        self.stats.lock().expect("stats lock poisoned").record(result);
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn engine_stats(&self) -> EngineStats {
        let (rules_loaded, rules_enabled) = {
            let rules = self.rules.read().expect("rules lock poisoned");
            (rules.len(), rules.values().filter(|r| r.enabled).count())
        };
        let ledger = self.stats.lock().expect("stats lock poisoned");
        let totals = ledger.totals();
        EngineStats {
            rules_loaded,
            rules_enabled,
            rules_generation: self.generation(),
            workers: self.worker_count,
            total_executions: totals.executions,
            successful_executions: totals.successes,
            failed_executions: totals.failures,
            skipped_executions: totals.skipped,
            total_signals: totals.signals,
            mapping_errors: totals.mapping_errors,
            batches_run: ledger.batches_run,
            avg_execution_ms: totals.avg_execution_ms,
            query_cache: self.compiler.cache_stats(),
            pool: self.executor.pool().stats(),
        }
    }

    /// Stats for one rule, or for every executed rule when `None`.
    pub fn rule_stats(&self, rule_id: Option<&str>) -> Vec<RuleStats> {
        let ledger = self.stats.lock().expect("stats lock poisoned");
        match rule_id {
            Some(id) => ledger.rule(id).cloned().into_iter().collect(),
            None => ledger.all(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn compiler(&self) -> &QueryBuilder {
        &self.compiler
    }

    pub fn clear_query_cache(&self) {
        self.compiler.clear_cache();
    }

    /// Close the underlying connection pool. Later executions fail with a
    /// pool error.
    pub fn close(&self) {
        self.executor.pool().close_all();
        info!("rule engine closed");
    }
}
