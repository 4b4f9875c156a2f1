use chrono::{DateTime, Utc};
use quantscan_storage::CacheStats;
use serde::Serialize;

use crate::engine::{BatchResult, ContextMetrics, EngineStats};

/// Throughput figures derived from one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub total_time_ms: u64,
    pub rules_per_sec: f64,
    pub signals_per_sec: f64,
    /// Successful over total rules, 0 for an empty batch.
    pub success_rate: f64,
    pub avg_signals_per_success: f64,
}

impl PipelineMetrics {
    pub fn from_batch(batch: &BatchResult, total_time_ms: u64) -> Self {
        // Sub-millisecond runs count as 1ms.
        let secs = total_time_ms.max(1) as f64 / 1000.0;
        let ratio = |num: usize, den: usize| {
            if den == 0 {
                0.0
            } else {
                num as f64 / den as f64
            }
        };
        Self {
            total_time_ms,
            rules_per_sec: batch.total_rules as f64 / secs,
            signals_per_sec: batch.total_signals as f64 / secs,
            success_rate: ratio(batch.successful_executions, batch.total_rules),
            avg_signals_per_success: ratio(batch.total_signals, batch.successful_executions),
        }
    }
}

/// Batch outcome plus pipeline-level bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub batch: BatchResult,
    pub metrics: PipelineMetrics,
    pub context: ContextMetrics,
    /// Batches run, including the first.
    pub attempts: u32,
    /// Ids re-executed at least once.
    pub retried_rules: Vec<String>,
}

impl PipelineResult {
    pub(crate) fn new(
        batch: BatchResult,
        context: ContextMetrics,
        attempts: u32,
        retried_rules: Vec<String>,
        total_time_ms: u64,
    ) -> Self {
        Self {
            metrics: PipelineMetrics::from_batch(&batch, total_time_ms),
            batch,
            context,
            attempts,
            retried_rules,
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.batch.failed_executions == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub pipelines_run: u64,
    pub total_rules_executed: u64,
    pub total_signals: u64,
    /// Extra batches run by retries.
    pub total_retries: u64,
    pub avg_pipeline_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub scans_served: u64,
    pub scans_from_cache: u64,
    pub result_cache: CacheStats,
    pub engine: EngineStats,
}

/// Counters behind the pipeline's stats lock.
#[derive(Debug, Default)]
pub(crate) struct PipelineLedger {
    pub pipelines_run: u64,
    pub total_rules_executed: u64,
    pub total_signals: u64,
    pub total_retries: u64,
    pub avg_pipeline_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub scans_served: u64,
    pub scans_from_cache: u64,
}

impl PipelineLedger {
    pub fn record(&mut self, result: &PipelineResult) {
        self.pipelines_run += 1;
        self.total_rules_executed += result.batch.total_rules as u64;
        self.total_signals += result.batch.total_signals as u64;
        self.total_retries += u64::from(result.attempts.saturating_sub(1));
        self.last_run = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (cur - prev_avg) / count
        let cur = result.metrics.total_time_ms as f64;
        self.avg_pipeline_ms += (cur - self.avg_pipeline_ms) / self.pipelines_run as f64;
    }
}
