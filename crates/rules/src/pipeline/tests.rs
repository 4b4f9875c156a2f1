//! Pipeline tests over a database that fails a scripted number of queries.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quantscan_core::{CacheConfig, EngineConfig, PipelineConfig};
use quantscan_storage::{
    ConnectionFactory, ConnectionPool, DbConnection, DriverError, QueryExecutor, RowSet, SqlParam,
};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::engine::{ExecutionOverrides, RuleEngine};
use crate::schema::{Rule, RuleType};

struct Flaky {
    failures_left: AtomicUsize,
    queries: AtomicUsize,
}

struct FlakyConnection {
    flaky: Arc<Flaky>,
}

impl DbConnection for FlakyConnection {
    fn query(&mut self, sql: &str, _params: &[SqlParam]) -> Result<RowSet, DriverError> {
        if sql == "SELECT 1" {
            return Ok(RowSet::default());
        }
        self.flaky.queries.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .flaky
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DriverError("IO Error: transient read failure".into()));
        }
        Ok(RowSet::new(
            ["symbol", "timestamp", "price", "volume"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            vec![vec![json!("AAA"), json!("2025-09-08 09:30:00"), json!(10.0), json!(500)]],
        ))
    }

    fn execute(&mut self, _sql: &str, _params: &[SqlParam]) -> Result<usize, DriverError> {
        Ok(0)
    }

    fn execute_batch(&mut self, _sql: &str) -> Result<(), DriverError> {
        Ok(())
    }
}

struct FlakyFactory {
    flaky: Arc<Flaky>,
}

impl ConnectionFactory for FlakyFactory {
    fn connect(&self) -> Result<Box<dyn DbConnection>, DriverError> {
        Ok(Box::new(FlakyConnection {
            flaky: self.flaky.clone(),
        }))
    }
}

fn pipeline(failures: usize, max_retries: u32) -> (ExecutionPipeline, Arc<Flaky>) {
    let flaky = Arc::new(Flaky {
        failures_left: AtomicUsize::new(failures),
        queries: AtomicUsize::new(0),
    });
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(FlakyFactory {
            flaky: flaky.clone(),
        }),
        2,
    ));
    let engine = RuleEngine::new(
        QueryExecutor::new(pool),
        "market_data",
        &EngineConfig {
            max_workers: 2,
            query_cache_capacity: 16,
        },
    )
    .unwrap();
    engine.load_rules(vec![
        Rule::new("a", RuleType::Custom),
        Rule::new("b", RuleType::Custom),
    ]);
    let config = PipelineConfig {
        rules_dir: PathBuf::from("unused"),
        max_retries,
        retry_delay_ms: 0,
    };
    let cache = CacheConfig {
        ttl_secs: 60,
        capacity: 8,
    };
    (ExecutionPipeline::new(Arc::new(engine), &cache, config), flaky)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn retry_converges_after_transient_failure() {
    let (pipeline, flaky) = pipeline(1, 2);
    let result = pipeline
        .execute_with_retry(
            "2025-09-08",
            Some(&ids(&["a", "b"])),
            false,
            &ExecutionOverrides::default(),
        )
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(result.retried_rules, ids(&["a"]));
    assert_eq!(result.batch.failed_executions, 0);
    assert_eq!(result.batch.successful_executions, 2);
    assert_eq!(result.batch.total_signals, 2);
    assert!(result.batch.errors.is_empty());
    // a fails, b succeeds, a succeeds on retry.
    assert_eq!(flaky.queries.load(Ordering::SeqCst), 3);
    assert_eq!(result.context.errors, 1);
    assert_eq!(result.context.rules_executed, 3);
}

#[test]
fn retries_stop_at_limit() {
    let (pipeline, _) = pipeline(100, 2);
    let result = pipeline
        .execute_with_retry("2025-09-08", Some(&ids(&["a"])), false, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(result.attempts, 3);
    assert_eq!(result.batch.failed_executions, 1);
    assert_eq!(result.batch.errors.len(), 1);
    assert!(result.batch.errors[0].error.contains("transient read failure"));
    assert_eq!(pipeline.pipeline_stats().total_retries, 2);
}

#[test]
fn execute_pipeline_does_not_retry() {
    let (pipeline, _) = pipeline(1, 5);
    let result = pipeline
        .execute_pipeline(
            "2025-09-08",
            Some(&ids(&["a", "b"])),
            false,
            &ExecutionOverrides::default(),
        )
        .unwrap();
    assert_eq!(result.attempts, 1);
    assert_eq!(result.batch.failed_executions, 1);
    assert_eq!(result.metrics.success_rate, 0.5);
}

#[test]
fn default_batch_runs_enabled_rules() {
    let (pipeline, _) = pipeline(0, 0);
    let result = pipeline
        .execute_pipeline("2025-09-08", None, true, &ExecutionOverrides::default())
        .unwrap();
    assert_eq!(result.batch.total_rules, 2);
    assert_eq!(result.metrics.avg_signals_per_success, 1.0);
}

#[test]
fn identical_scan_is_served_from_cache() {
    let (pipeline, flaky) = pipeline(0, 0);
    let request = ScanRequest::new("2025-09-08");

    let first = pipeline.scan(&request).unwrap();
    assert!(!first.cached);
    let queries = flaky.queries.load(Ordering::SeqCst);

    let second = pipeline.scan(&request).unwrap();
    assert!(second.cached);
    assert_eq!(second.result, first.result);
    assert_eq!(flaky.queries.load(Ordering::SeqCst), queries);

    let stats = pipeline.pipeline_stats();
    assert_eq!(stats.scans_served, 2);
    assert_eq!(stats.scans_from_cache, 1);
    assert_eq!(stats.result_cache.hits, 1);
}

#[test]
fn reload_invalidates_cached_scans() {
    let (pipeline, _) = pipeline(0, 0);
    let request = ScanRequest::new("2025-09-08");
    pipeline.scan(&request).unwrap();

    pipeline
        .engine()
        .load_rules(vec![Rule::new("c", RuleType::Custom)]);
    let after = pipeline.scan(&request).unwrap();
    assert!(!after.cached);
    assert_eq!(after.result.batch.total_rules, 3);
}

#[test]
fn failed_scans_are_not_cached() {
    let (pipeline, _) = pipeline(1, 0);
    let request = ScanRequest {
        rule_ids: Some(ids(&["a"])),
        ..ScanRequest::new("2025-09-08")
    };
    assert!(!pipeline.scan(&request).unwrap().cached);
    let again = pipeline.scan(&request).unwrap();
    assert!(!again.cached);
    assert_eq!(again.result.batch.failed_executions, 0);
}

#[test]
fn clear_cache_forces_recompute() {
    let (pipeline, _) = pipeline(0, 0);
    let request = ScanRequest::new("2025-09-08");
    pipeline.scan(&request).unwrap();
    pipeline.clear_cache();
    assert!(!pipeline.scan(&request).unwrap().cached);
}

#[test]
fn invalid_date_surfaces_as_error() {
    let (pipeline, _) = pipeline(0, 2);
    let err = pipeline.scan(&ScanRequest::new("tomorrow")).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Scan(crate::engine::ScanError::InvalidDateFormat(_))
    ));
}

#[test]
fn directory_load_reports_rejections() {
    let (pipeline, _) = pipeline(0, 0);
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("rules.yml"),
        "- rule_id: vol-spike\n  name: Volume spike\n  rule_type: volume\n\
         - rule_id: Not Valid\n  rule_type: custom\n",
    )
    .unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let report = pipeline.load_rules_from_directory(Some(dir.path())).unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.rules.loaded, 1);
    assert_eq!(report.rules.failed, 1);
    assert!(pipeline.engine().rule("vol-spike").is_some());
}

#[test]
fn close_shuts_the_pool() {
    let (pipeline, _) = pipeline(0, 0);
    pipeline.close();
    let err = pipeline
        .execute_pipeline("2025-09-08", None, false, &ExecutionOverrides::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Scan(e) if e.is_resource_error()));
}
