//! Result rows to signal candidates.

use std::collections::BTreeMap;

use quantscan_storage::RowSet;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::signal::SignalCandidate;
use crate::compiler::RowShape;

/// Columns tried in order for a row's confidence.
pub const CONFIDENCE_COLUMNS: [&str; 3] = ["probability_score", "confidence", "breakout_pct"];

/// Confidence used when no confidence column holds a number.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A row that could not become a candidate.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("row {row} of rule '{rule_id}' unusable: {reason}")]
pub struct MappingError {
    pub rule_id: String,
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub(crate) struct MappedRows {
    pub candidates: Vec<SignalCandidate>,
    pub errors: Vec<MappingError>,
}

/// Map every row of `rows`, read by the column names of `shape`.
/// Rows without a symbol or a numeric price are skipped and reported.
pub(crate) fn map_rows(rule_id: &str, shape: RowShape, rows: &RowSet) -> MappedRows {
    let mut mapped = MappedRows::default();
    for row in 0..rows.len() {
        match map_row(rule_id, shape, rows, row) {
            Ok(candidate) => mapped.candidates.push(candidate),
            Err(e) => {
                warn!(rule_id, row, reason = %e.reason, "skipping unmappable row");
                mapped.errors.push(e);
            }
        }
    }
    mapped
}

fn map_row(
    rule_id: &str,
    shape: RowShape,
    rows: &RowSet,
    row: usize,
) -> Result<SignalCandidate, MappingError> {
    let fail = |reason: &str| MappingError {
        rule_id: rule_id.to_string(),
        row,
        reason: reason.to_string(),
    };

    let symbol = rows
        .get(row, "symbol")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| fail("missing symbol"))?
        .to_string();
    let price = rows
        .get(row, "price")
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite())
        .ok_or_else(|| fail("missing price"))?;
    let volume = rows
        .get(row, "volume")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
        .unwrap_or(0);

    let mut metadata = BTreeMap::new();
    if let Some(ts) = rows.get(row, "timestamp") {
        metadata.insert("timestamp".to_string(), ts.clone());
    }
    for column in shape.metric_columns() {
        if let Some(value) = rows.get(row, column) {
            metadata.insert(column.to_string(), value.clone());
        }
    }

    Ok(SignalCandidate {
        symbol,
        price,
        volume,
        confidence: confidence(rows, row),
        metadata,
    })
}

/// First numeric value among [`CONFIDENCE_COLUMNS`], clamped to `[0, 1]`.
pub(crate) fn confidence(rows: &RowSet, row: usize) -> f64 {
    CONFIDENCE_COLUMNS
        .iter()
        .filter_map(|c| rows.get(row, c).and_then(Value::as_f64))
        .find(|v| v.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0)
}
