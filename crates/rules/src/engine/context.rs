//! Per-invocation scan scope and metrics.

use serde::{Deserialize, Serialize};

use super::error::ScanError;
use super::result::RuleOutput;

/// Caller overrides for one execution. Each set field beats both the
/// execution context and the rule's own settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    /// Keep only the N most confident signals per rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextMetrics {
    pub rules_executed: u64,
    pub queries_run: u64,
    pub signals_produced: u64,
    /// Compiled-query cache hits.
    pub cache_hits: u64,
    pub errors: u64,
    pub mapping_errors: u64,
}

/// Scope shared by every rule in one scan, plus the metrics accumulated
/// while running it. Only the caller that owns it writes to it.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub scan_date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub metrics: ContextMetrics,
}

impl ExecutionContext {
    pub fn new(scan_date: impl Into<String>) -> Self {
        Self {
            scan_date: scan_date.into(),
            start_time: None,
            end_time: None,
            symbols: None,
            metrics: ContextMetrics::default(),
        }
    }

    pub fn with_window(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub(crate) fn record(&mut self, outcome: &Result<RuleOutput, ScanError>) {
        let m = &mut self.metrics;
        m.rules_executed += 1;
        match outcome {
            Ok(output) => {
                let r = &output.result;
                if r.query_executed {
                    m.queries_run += 1;
                }
                if r.query_cache_hit {
                    m.cache_hits += 1;
                }
                m.signals_produced += output.signals.len() as u64;
                m.mapping_errors += r.mapping_errors as u64;
            }
            Err(_) => m.errors += 1,
        }
    }
}

/// Window, symbols and result cap after applying overrides over context.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ResolvedScope {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub max_results: Option<usize>,
}

impl ResolvedScope {
    pub fn resolve(context: Option<&ExecutionContext>, overrides: &ExecutionOverrides) -> Self {
        Self {
            start_time: overrides
                .start_time
                .clone()
                .or_else(|| context.and_then(|c| c.start_time.clone())),
            end_time: overrides
                .end_time
                .clone()
                .or_else(|| context.and_then(|c| c.end_time.clone())),
            symbols: overrides
                .symbols
                .clone()
                .or_else(|| context.and_then(|c| c.symbols.clone())),
            max_results: overrides.max_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_beat_context() {
        let ctx = ExecutionContext::new("2025-09-08")
            .with_window(Some("09:15".into()), Some("10:00".into()))
            .with_symbols(vec!["AAA".into()]);
        let overrides = ExecutionOverrides {
            end_time: Some("09:45".into()),
            ..ExecutionOverrides::default()
        };
        let scope = ResolvedScope::resolve(Some(&ctx), &overrides);
        assert_eq!(scope.start_time.as_deref(), Some("09:15"));
        assert_eq!(scope.end_time.as_deref(), Some("09:45"));
        assert_eq!(scope.symbols, Some(vec!["AAA".to_string()]));
    }

    #[test]
    fn nothing_set_resolves_to_rule_defaults() {
        let scope = ResolvedScope::resolve(None, &ExecutionOverrides::default());
        assert_eq!(scope, ResolvedScope::default());
    }

    #[test]
    fn errors_are_counted() {
        let mut ctx = ExecutionContext::new("2025-09-08");
        ctx.record(&Err(ScanError::InvalidDateFormat("x".into())));
        assert_eq!(ctx.metrics.rules_executed, 1);
        assert_eq!(ctx.metrics.errors, 1);
    }
}
