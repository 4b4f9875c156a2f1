use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use quantscan_core::{CacheConfig, Config, PipelineConfig};
use quantscan_storage::{ResultCache, SchemaManager, StorageEngine, StorageError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::metrics::{PipelineLedger, PipelineResult, PipelineStats};
use super::request::{ScanRequest, ScanResponse};
use crate::engine::{ExecutionContext, ExecutionOverrides, LoadReport, RuleEngine, ScanError};
use crate::loader::{LoadResult, LoaderError, RuleLoader};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of [`ExecutionPipeline::load_rules_from_directory`].
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryLoadReport {
    pub directory: PathBuf,
    pub files: Vec<LoadResult>,
    /// Rule ids defined again by a later file, with that file.
    pub duplicates: Vec<(String, PathBuf)>,
    /// What the engine accepted after validation.
    pub rules: LoadReport,
}

/// Runs batches through a [`RuleEngine`] with retries, derived metrics and
/// a TTL cache for whole scans.
pub struct ExecutionPipeline {
    engine: Arc<RuleEngine>,
    cache: ResultCache<PipelineResult>,
    config: PipelineConfig,
    schema: Option<Arc<SchemaManager>>,
    ledger: Mutex<PipelineLedger>,
}

impl ExecutionPipeline {
    pub fn new(engine: Arc<RuleEngine>, cache: &CacheConfig, config: PipelineConfig) -> Self {
        Self {
            engine,
            cache: ResultCache::from_config(cache),
            config,
            schema: None,
            ledger: Mutex::new(PipelineLedger::default()),
        }
    }

    /// Wire storage, engine and pipeline from configuration. The schema is
    /// not touched until [`initialize_schema`](Self::initialize_schema).
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let storage = StorageEngine::from_config(&config.database)?;
        let relation = storage.schema.source_relation();
        let engine = RuleEngine::new(storage.executor.clone(), relation, &config.engine)?;
        Ok(Self::new(Arc::new(engine), &config.cache, config.pipeline.clone())
            .with_schema(storage.schema))
    }

    pub fn with_schema(mut self, schema: Arc<SchemaManager>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Create the bars table, index and dataset view if missing.
    pub fn initialize_schema(&self) -> Result<(), PipelineError> {
        if let Some(schema) = &self.schema {
            schema.ensure_initialized()?;
        }
        Ok(())
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Rule loading ────────────────────────────────────────────────

    /// Load every rule file under `dir` (the configured rules directory
    /// when `None`) into the engine.
    pub fn load_rules_from_directory(
        &self,
        dir: Option<&Path>,
    ) -> Result<DirectoryLoadReport, PipelineError> {
        let directory = dir.unwrap_or(self.config.rules_dir.as_path()).to_path_buf();
        let loaded = RuleLoader::new(directory.clone()).load_all()?;
        let rules = self.engine.load_rules(loaded.rules);
        info!(
            path = %directory.display(),
            files = loaded.files.len(),
            loaded = rules.loaded,
            rejected = rules.failed,
            duplicates = loaded.duplicates.len(),
            "rules directory loaded"
        );
        Ok(DirectoryLoadReport {
            directory,
            files: loaded.files,
            duplicates: loaded.duplicates,
            rules,
        })
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run one batch. `rule_ids` of `None` (or empty) runs every enabled
    /// rule by descending priority.
    pub fn execute_pipeline(
        &self,
        scan_date: &str,
        rule_ids: Option<&[String]>,
        parallel: bool,
        overrides: &ExecutionOverrides,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(scan_date, rule_ids, parallel, overrides, 0)
    }

    /// Like [`execute_pipeline`](Self::execute_pipeline), then re-run only
    /// the failed rules up to `max_retries` times, stopping as soon as
    /// nothing fails.
    pub fn execute_with_retry(
        &self,
        scan_date: &str,
        rule_ids: Option<&[String]>,
        parallel: bool,
        overrides: &ExecutionOverrides,
    ) -> Result<PipelineResult, PipelineError> {
        self.run(scan_date, rule_ids, parallel, overrides, self.config.max_retries)
    }

    fn run(
        &self,
        scan_date: &str,
        rule_ids: Option<&[String]>,
        parallel: bool,
        overrides: &ExecutionOverrides,
        max_retries: u32,
    ) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let ids = self.resolve_ids(rule_ids);
        let mut context = ExecutionContext::new(scan_date);

        let mut batch =
            self.engine
                .execute_rules_batch(&ids, scan_date, parallel, Some(&mut context), overrides)?;
        let mut attempts = 1;
        let mut retried_rules: Vec<String> = Vec::new();

        for retry in 1..=max_retries {
            let failed = batch.failed_rule_ids();
            if failed.is_empty() {
                break;
            }
            let delay = self.config.retry_delay();
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            warn!(retry, rules = ?failed, "retrying failed rules");
            for id in &failed {
                if !retried_rules.contains(id) {
                    retried_rules.push(id.clone());
                }
            }
            let again = self.engine.execute_rules_batch(
                &failed,
                scan_date,
                parallel,
                Some(&mut context),
                overrides,
            )?;
            attempts += 1;
            batch.merge_retry(again);
        }

        let total_time_ms = started.elapsed().as_millis() as u64;
        let result =
            PipelineResult::new(batch, context.metrics, attempts, retried_rules, total_time_ms);
        self.ledger
            .lock()
            .expect("pipeline ledger lock poisoned")
            .record(&result);

        info!(
            scan_date,
            rules = result.batch.total_rules,
            failed = result.batch.failed_executions,
            signals = result.batch.total_signals,
            attempts,
            total_time_ms,
            "pipeline complete"
        );
        Ok(result)
    }

    fn resolve_ids(&self, rule_ids: Option<&[String]>) -> Vec<String> {
        match rule_ids {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => self.engine.enabled_rule_ids(),
        }
    }

    /// Cached read path: identical requests within the TTL, against the
    /// same rule generation, are answered from the result cache. Only
    /// fully successful results are cached.
    pub fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, PipelineError> {
        let key = request.cache_key(self.engine.generation());
        if let Some(result) = self.cache.get(&key) {
            let mut ledger = self.ledger.lock().expect("pipeline ledger lock poisoned");
            ledger.scans_served += 1;
            ledger.scans_from_cache += 1;
            debug!(scan_date = %request.scan_date, "scan served from cache");
            return Ok(ScanResponse {
                result,
                cached: true,
            });
        }

        let result = self.execute_with_retry(
            &request.scan_date,
            request.rule_ids.as_deref(),
            request.parallel,
            &request.overrides(),
        )?;
        if result.is_complete_success() {
            self.cache.put(key, result.clone());
        }
        self.ledger
            .lock()
            .expect("pipeline ledger lock poisoned")
            .scans_served += 1;
        Ok(ScanResponse {
            result,
            cached: false,
        })
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn pipeline_stats(&self) -> PipelineStats {
        let ledger = self.ledger.lock().expect("pipeline ledger lock poisoned");
        PipelineStats {
            pipelines_run: ledger.pipelines_run,
            total_rules_executed: ledger.total_rules_executed,
            total_signals: ledger.total_signals,
            total_retries: ledger.total_retries,
            avg_pipeline_ms: ledger.avg_pipeline_ms,
            last_run: ledger.last_run,
            scans_served: ledger.scans_served,
            scans_from_cache: ledger.scans_from_cache,
            result_cache: self.cache.stats(),
            engine: self.engine.engine_stats(),
        }
    }

    /// Drop cached scans and compiled queries.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.engine.clear_query_cache();
        info!("pipeline caches cleared");
    }

    /// Clear caches and close the engine's connections.
    pub fn close(&self) {
        self.cache.clear();
        self.engine.close();
        info!("pipeline closed");
    }
}
