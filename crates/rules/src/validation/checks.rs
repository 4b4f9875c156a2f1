//! Individual rule checks. Each appends to the shared [`ValidationResult`].

use super::fuzzy::is_rule_id;
use super::ValidationResult;
use crate::compiler::parse_time_of_day;
use crate::schema::*;

/// Longest trailing window a template will interpolate.
pub(crate) const MAX_WINDOW: u32 = 500;

// ── Identity ────────────────────────────────────────────────────────

pub(super) fn validate_identity(rule: &Rule, result: &mut ValidationResult) {
    if rule.rule_id.trim().is_empty() {
        result.error("rule_id", "rule_id must not be empty");
        return;
    }
    if !is_rule_id(&rule.rule_id) {
        let suggestion = rule
            .rule_id
            .trim()
            .to_lowercase()
            .replace(|c: char| !c.is_ascii_alphanumeric(), "-");
        result.error_with_suggestion(
            "rule_id",
            format!(
                "rule_id must be lowercase alphanumeric separated by '-' or '_', got '{}'",
                rule.rule_id
            ),
            suggestion,
        );
    }
    if rule.name.trim().is_empty() {
        result.warn("name", "rule has no display name; rule_id will be shown");
    }
}

// ── Time window ─────────────────────────────────────────────────────

pub(super) fn validate_time_window(rule: &Rule, result: &mut ValidationResult) {
    let Some(window) = &rule.conditions.time_window else {
        return;
    };
    let start = parse_time_of_day(&window.start);
    let end = parse_time_of_day(&window.end);
    if start.is_none() {
        result.error(
            "conditions.time_window.start",
            format!("expected HH:MM or HH:MM:SS, got '{}'", window.start),
        );
    }
    if end.is_none() {
        result.error(
            "conditions.time_window.end",
            format!("expected HH:MM or HH:MM:SS, got '{}'", window.end),
        );
    }
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            result.error(
                "conditions.time_window",
                format!("start '{}' is after end '{}'", window.start, window.end),
            );
        }
    }
}

// ── Category blocks ─────────────────────────────────────────────────

pub(super) fn validate_category(rule: &Rule, result: &mut ValidationResult) {
    let c = &rule.conditions;
    match rule.rule_type {
        RuleType::Breakout => match &c.breakout {
            Some(b) => validate_breakout(b, result),
            None => missing_block(result, "breakout"),
        },
        RuleType::ConsolidationPattern => match &c.consolidation {
            Some(b) => validate_consolidation(b, result),
            None => missing_block(result, "consolidation"),
        },
        RuleType::Technical | RuleType::Momentum => match &c.technical {
            Some(b) => validate_technical(b, result),
            None => missing_block(result, "technical"),
        },
        RuleType::Volume => match &c.volume {
            Some(b) => validate_volume(b, result),
            None => missing_block(result, "volume"),
        },
        RuleType::Custom => {}
    }

    let used = match rule.rule_type {
        RuleType::Breakout => Some("breakout"),
        RuleType::ConsolidationPattern => Some("consolidation"),
        RuleType::Technical | RuleType::Momentum => Some("technical"),
        RuleType::Volume => Some("volume"),
        RuleType::Custom => None,
    };
    for (name, present) in [
        ("breakout", c.breakout.is_some()),
        ("consolidation", c.consolidation.is_some()),
        ("technical", c.technical.is_some()),
        ("volume", c.volume.is_some()),
    ] {
        if present && used != Some(name) {
            result.warn(
                format!("conditions.{name}"),
                format!("'{name}' block is ignored for rule type '{}'", rule.rule_type),
            );
        }
    }
}

fn missing_block(result: &mut ValidationResult, name: &str) {
    result.warn(
        format!("conditions.{name}"),
        format!("no '{name}' block; default thresholds apply"),
    );
}

fn check_window(result: &mut ValidationResult, path: &str, value: u32) {
    if value == 0 || value > MAX_WINDOW {
        result.error(path, format!("must be between 1 and {MAX_WINDOW}, got {value}"));
    }
}

fn check_positive(result: &mut ValidationResult, path: &str, value: f64) {
    if !value.is_finite() || value <= 0.0 {
        result.error(path, format!("must be a positive number, got {value}"));
    }
}

fn validate_breakout(b: &BreakoutConditions, result: &mut ValidationResult) {
    check_window(result, "conditions.breakout.lookback_bars", b.lookback_bars);
    if !b.min_price_move_pct.is_finite() {
        result.error("conditions.breakout.min_price_move_pct", "must be finite");
    }
    check_positive(result, "conditions.breakout.min_volume_multiplier", b.min_volume_multiplier);
    if let Some(max) = b.max_price_move_pct {
        if max < b.min_price_move_pct {
            result.error(
                "conditions.breakout.max_price_move_pct",
                format!(
                    "max_price_move_pct ({max}) is below min_price_move_pct ({})",
                    b.min_price_move_pct
                ),
            );
        }
    }
}

fn validate_consolidation(b: &ConsolidationConditions, result: &mut ValidationResult) {
    check_window(result, "conditions.consolidation.lookback_days", b.lookback_days);
    check_positive(result, "conditions.consolidation.max_range_pct", b.max_range_pct);
    check_positive(result, "conditions.consolidation.momentum_target_pct", b.momentum_target_pct);
    if b.mid_volume_tier > b.high_volume_tier {
        result.error(
            "conditions.consolidation.mid_volume_tier",
            "mid_volume_tier must not exceed high_volume_tier",
        );
    }
    let w = &b.weights;
    for (name, value) in [
        ("closeness", w.closeness),
        ("tightness", w.tightness),
        ("volume", w.volume),
        ("momentum", w.momentum),
    ] {
        if !value.is_finite() || value < 0.0 {
            result.error(
                format!("conditions.consolidation.weights.{name}"),
                format!("weight must be non-negative, got {value}"),
            );
        }
    }
    if (w.sum() - 1.0).abs() > 1e-6 {
        result.warn(
            "conditions.consolidation.weights",
            format!("weights sum to {:.3}, scores will not be normalized to [0, 1]", w.sum()),
        );
    }
    if !(0.0..=1.0).contains(&b.min_probability) {
        result.error(
            "conditions.consolidation.min_probability",
            format!("must be within [0, 1], got {}", b.min_probability),
        );
    }
}

fn validate_technical(b: &TechnicalConditions, result: &mut ValidationResult) {
    check_window(result, "conditions.technical.rsi_period", b.rsi_period);
    check_window(result, "conditions.technical.fast_period", b.fast_period);
    check_window(result, "conditions.technical.slow_period", b.slow_period);
    check_window(result, "conditions.technical.band_period", b.band_period);
    check_positive(result, "conditions.technical.band_width", b.band_width);
    if b.fast_period >= b.slow_period {
        result.error(
            "conditions.technical.fast_period",
            format!(
                "fast_period ({}) must be shorter than slow_period ({})",
                b.fast_period, b.slow_period
            ),
        );
    }
    for (name, value) in [("rsi_min", b.rsi_min), ("rsi_max", b.rsi_max)] {
        if let Some(v) = value {
            if !(0.0..=100.0).contains(&v) {
                result.error(
                    format!("conditions.technical.{name}"),
                    format!("RSI bounds must be within [0, 100], got {v}"),
                );
            }
        }
    }
    if let (Some(lo), Some(hi)) = (b.rsi_min, b.rsi_max) {
        if lo > hi {
            result.error("conditions.technical", "rsi_min is greater than rsi_max");
        }
    }
    if let (Some(lo), Some(hi)) = (b.band_position_min, b.band_position_max) {
        if lo > hi {
            result.error(
                "conditions.technical",
                "band_position_min is greater than band_position_max",
            );
        }
    }
}

fn validate_volume(b: &VolumeConditions, result: &mut ValidationResult) {
    check_window(result, "conditions.volume.short_window", b.short_window);
    check_window(result, "conditions.volume.long_window", b.long_window);
    check_positive(result, "conditions.volume.min_relative_volume", b.min_relative_volume);
    if b.short_window >= b.long_window {
        result.error(
            "conditions.volume.short_window",
            format!(
                "short_window ({}) must be shorter than long_window ({})",
                b.short_window, b.long_window
            ),
        );
    }
}

// ── Market filters ──────────────────────────────────────────────────

pub(super) fn validate_market_filters(rule: &Rule, result: &mut ValidationResult) {
    let Some(f) = &rule.conditions.market_filters else {
        return;
    };
    if let (Some(lo), Some(hi)) = (f.min_price, f.max_price) {
        if lo > hi {
            result.error(
                "conditions.market_filters",
                format!("min_price ({lo}) is greater than max_price ({hi})"),
            );
        }
    }
    if let Some(v) = f.min_volume {
        if v < 0 {
            result.error("conditions.market_filters.min_volume", "must not be negative");
        }
    }
    if f.exclude_symbols.iter().any(|s| s.trim().is_empty()) {
        result.warn(
            "conditions.market_filters.exclude_symbols",
            "blank entries are ignored",
        );
    }
}

// ── Actions ─────────────────────────────────────────────────────────

pub(super) fn validate_actions(rule: &Rule, result: &mut ValidationResult) {
    let a = &rule.actions;
    if let Some(v) = a.stop_loss_pct {
        if !(v > 0.0 && v < 100.0) {
            result.error(
                "actions.stop_loss_pct",
                format!("must be within (0, 100), got {v}"),
            );
        }
    }
    if let Some(v) = a.take_profit_pct {
        if !v.is_finite() || v <= 0.0 {
            result.error(
                "actions.take_profit_pct",
                format!("must be a positive number, got {v}"),
            );
        }
    }
    if a.signal_type == SignalType::Watch
        && (a.stop_loss_pct.is_some() || a.take_profit_pct.is_some())
    {
        result.warn("actions", "risk levels are not attached to watch signals");
    }
}
