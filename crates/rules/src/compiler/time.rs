//! Scan date and intraday window parsing.

use chrono::{NaiveDate, NaiveTime, Timelike};

use super::CompileError;
use crate::schema::TimeWindow;

/// Last second of the trading day, inclusive.
pub const END_OF_DAY_SECS: u32 = 86_399;

/// `HH:MM:SS` or `HH:MM` to seconds since midnight.
pub fn parse_time_of_day(s: &str) -> Option<u32> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
        .map(|t| t.num_seconds_from_midnight())
}

/// Strict `YYYY-MM-DD`.
pub fn parse_scan_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Window after precedence resolution, with the labels that feed the
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedWindow {
    pub start_secs: u32,
    pub end_secs: u32,
    pub start_label: String,
    pub end_label: String,
}

/// Explicit bounds win, then the rule's own window, then the full day.
/// Each bound resolves independently.
pub(crate) fn resolve_window(
    explicit_start: Option<&str>,
    explicit_end: Option<&str>,
    rule_window: Option<&TimeWindow>,
) -> Result<ResolvedWindow, CompileError> {
    let start_label = explicit_start
        .or(rule_window.map(|w| w.start.as_str()))
        .unwrap_or("00:00:00")
        .trim()
        .to_string();
    let end_label = explicit_end
        .or(rule_window.map(|w| w.end.as_str()))
        .unwrap_or("23:59:59")
        .trim()
        .to_string();

    let start_secs = parse_time_of_day(&start_label)
        .ok_or_else(|| CompileError::InvalidTime(start_label.clone()))?;
    let end_secs = parse_time_of_day(&end_label)
        .ok_or_else(|| CompileError::InvalidTime(end_label.clone()))?;

    if start_secs > end_secs {
        return Err(CompileError::InvertedWindow {
            start: start_label,
            end: end_label,
        });
    }

    Ok(ResolvedWindow {
        start_secs,
        end_secs,
        start_label,
        end_label,
    })
}
