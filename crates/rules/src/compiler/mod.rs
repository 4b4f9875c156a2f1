//! Rule compiler: turns a rule's conditions plus a scan scope into a
//! parameterized query.
//!
//! Compilation is a pure function of its inputs. Results are cached by
//! fingerprint (the full canonical input string) with FIFO eviction, so a
//! warm cache returns exactly what a cold compile would produce.

mod shape;
mod templates;
mod time;
mod writer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use indexmap::IndexMap;
use quantscan_storage::SqlParam;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::schema::{RuleConditions, RuleType};

pub use shape::{RowShape, BASE_COLUMNS};
pub use time::{parse_scan_date, parse_time_of_day, END_OF_DAY_SECS};

use templates::Scope;
use time::resolve_window;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("invalid scan date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid time '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTime(String),

    #[error("time window start '{start}' is after end '{end}'")]
    InvertedWindow { start: String, end: String },

    #[error("invalid condition {field}: {reason}")]
    InvalidCondition { field: String, reason: String },

    #[error("failed to fingerprint conditions: {0}")]
    Fingerprint(String),
}

/// Inputs to a single compilation.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    pub rule_type: RuleType,
    pub conditions: &'a RuleConditions,
    pub scan_date: &'a str,
    pub start_time: Option<&'a str>,
    pub end_time: Option<&'a str>,
    /// `None` (or an empty list) scans every symbol.
    pub symbols: Option<&'a [String]>,
}

impl<'a> QueryRequest<'a> {
    pub fn new(rule_type: RuleType, conditions: &'a RuleConditions, scan_date: &'a str) -> Self {
        Self {
            rule_type,
            conditions,
            scan_date,
            start_time: None,
            end_time: None,
            symbols: None,
        }
    }

    pub fn window(mut self, start: Option<&'a str>, end: Option<&'a str>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn symbols(mut self, symbols: Option<&'a [String]>) -> Self {
        self.symbols = symbols;
        self
    }
}

/// A ready-to-run query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub shape: RowShape,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct QueryBuilder {
    relation: String,
    capacity: usize,
    cache: RwLock<IndexMap<String, CompiledQuery>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryBuilder {
    /// Builder reading bars from `relation`, caching up to `capacity`
    /// compiled queries (0 disables caching).
    pub fn new(relation: impl Into<String>, capacity: usize) -> Self {
        Self {
            relation: relation.into(),
            capacity,
            cache: RwLock::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn compile(&self, request: &QueryRequest<'_>) -> Result<CompiledQuery, CompileError> {
        self.compile_tracked(request).map(|(query, _)| query)
    }

    /// Compile and report whether the result came from the cache.
    pub fn compile_tracked(
        &self,
        request: &QueryRequest<'_>,
    ) -> Result<(CompiledQuery, bool), CompileError> {
        let prepared = Prepared::from_request(request)?;

        if let Some(hit) = self
            .cache
            .read()
            .expect("query cache lock poisoned")
            .get(&prepared.fingerprint)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((hit.clone(), true));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let filters = request.conditions.market_filters.clone().unwrap_or_default();
        let mut excluded: Vec<String> = filters
            .exclude_symbols
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        excluded.sort();
        excluded.dedup();

        let scope = Scope {
            relation: &self.relation,
            scan_date: prepared.scan_date,
            start_secs: prepared.window.start_secs,
            end_secs: prepared.window.end_secs,
            symbols: prepared.symbols,
            excluded,
            min_price: filters.min_price,
            max_price: filters.max_price,
            min_volume: filters.min_volume,
        };
        let (sql, params) = templates::render(request.rule_type, request.conditions, &scope)?;
        let query = CompiledQuery {
            sql,
            params,
            shape: RowShape::for_rule_type(request.rule_type),
            fingerprint: prepared.fingerprint,
        };
        debug!(
            rule_type = %request.rule_type,
            params = query.params.len(),
            "compiled query"
        );

        if self.capacity > 0 {
            let mut cache = self.cache.write().expect("query cache lock poisoned");
            cache.insert(query.fingerprint.clone(), query.clone());
            while cache.len() > self.capacity {
                cache.shift_remove_index(0);
            }
        }
        Ok((query, false))
    }

    /// Canonical cache key for `request`, validating its date and window.
    pub fn fingerprint(request: &QueryRequest<'_>) -> Result<String, CompileError> {
        Prepared::from_request(request).map(|p| p.fingerprint)
    }

    pub fn cache_stats(&self) -> CompileCacheStats {
        CompileCacheStats {
            entries: self.cache.read().expect("query cache lock poisoned").len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.write().expect("query cache lock poisoned").clear();
    }
}

/// Validated, normalized request inputs.
struct Prepared {
    scan_date: String,
    window: time::ResolvedWindow,
    symbols: Vec<String>,
    fingerprint: String,
}

impl Prepared {
    fn from_request(request: &QueryRequest<'_>) -> Result<Self, CompileError> {
        let scan_date = parse_scan_date(request.scan_date)
            .ok_or_else(|| CompileError::InvalidDate(request.scan_date.to_string()))?
            .format("%Y-%m-%d")
            .to_string();

        let window = resolve_window(
            request.start_time,
            request.end_time,
            request.conditions.time_window.as_ref(),
        )?;

        let mut symbols: Vec<String> = request
            .symbols
            .unwrap_or_default()
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();

        let conditions = serde_json::to_string(request.conditions)
            .map_err(|e| CompileError::Fingerprint(e.to_string()))?;
        let symbols_key = if symbols.is_empty() {
            "all".to_string()
        } else {
            symbols.join(",")
        };
        let fingerprint = format!(
            "{}|{}|{}|{}|{}|{}",
            request.rule_type,
            conditions,
            scan_date,
            window.start_label,
            window.end_label,
            symbols_key
        );

        Ok(Self {
            scan_date,
            window,
            symbols,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests;
