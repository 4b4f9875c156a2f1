use serde::{Deserialize, Serialize};

use super::metrics::PipelineResult;
use crate::engine::ExecutionOverrides;

/// One cached scan. Unset fields fall back to each rule's own settings;
/// no `rule_ids` means every enabled rule, highest priority first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    pub scan_date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub rule_ids: Option<Vec<String>>,
    pub parallel: bool,
    pub max_results: Option<usize>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            scan_date: String::new(),
            start_time: None,
            end_time: None,
            symbols: None,
            rule_ids: None,
            parallel: true,
            max_results: None,
        }
    }
}

impl ScanRequest {
    pub fn new(scan_date: impl Into<String>) -> Self {
        Self {
            scan_date: scan_date.into(),
            ..Self::default()
        }
    }

    pub fn overrides(&self) -> ExecutionOverrides {
        ExecutionOverrides {
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            symbols: self.symbols.clone(),
            max_results: self.max_results,
        }
    }

    /// Result-cache key. Includes the rule generation so a reload never
    /// serves results computed from the previous rule set.
    pub(crate) fn cache_key(&self, generation: u64) -> String {
        let request = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!(
            "{}|{}|{}|{}|{}|g{}",
            self.scan_date,
            self.start_time.as_deref().unwrap_or("-"),
            self.end_time.as_deref().unwrap_or("-"),
            request,
            self.max_results.map_or_else(|| "-".to_string(), |n| n.to_string()),
            generation
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    pub result: PipelineResult,
    /// Served from the result cache.
    pub cached: bool,
}
