//! SQL templates, one per row shape.
//!
//! Every template reads the source relation through a `bars` CTE (scan
//! date, symbol include/exclude lists), derives a `candidates` relation with
//! `symbol, timestamp, tod, close, volume` plus the shape's metric columns,
//! then selects the shape projection with the window and threshold filters,
//! keeping the first matching row per symbol.
//! Window sizes are validated integers and are interpolated; every other
//! value is bound.

use quantscan_storage::SqlParam;

use super::shape::RowShape;
use super::writer::SqlWriter;
use super::CompileError;
use crate::schema::*;
use crate::validation::MAX_WINDOW;

const TOD_EXPR: &str = "hour(timestamp) * 3600 + minute(timestamp) * 60 + second(timestamp)";

/// Everything a template needs besides its own condition block.
#[derive(Debug, Clone)]
pub(crate) struct Scope<'a> {
    pub relation: &'a str,
    /// Normalized `YYYY-MM-DD`.
    pub scan_date: String,
    pub start_secs: u32,
    pub end_secs: u32,
    /// Sorted, de-duplicated; empty means every symbol.
    pub symbols: Vec<String>,
    pub excluded: Vec<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_volume: Option<i64>,
}

pub(crate) fn render(
    rule_type: RuleType,
    conditions: &RuleConditions,
    scope: &Scope<'_>,
) -> Result<(String, Vec<SqlParam>), CompileError> {
    let shape = RowShape::for_rule_type(rule_type);
    let mut w = SqlWriter::new();
    match shape {
        RowShape::Breakout => {
            breakout(&mut w, scope, &conditions.breakout.clone().unwrap_or_default())?
        }
        RowShape::Consolidation => consolidation(
            &mut w,
            scope,
            &conditions.consolidation.clone().unwrap_or_default(),
        )?,
        RowShape::Technical => {
            technical(&mut w, scope, &conditions.technical.clone().unwrap_or_default())?
        }
        RowShape::Volume => volume(&mut w, scope, &conditions.volume.clone().unwrap_or_default())?,
        RowShape::Custom => custom(&mut w, scope),
    }
    Ok(w.finish())
}

fn window_size(field: &str, value: u32) -> Result<u32, CompileError> {
    if value == 0 || value > MAX_WINDOW {
        return Err(CompileError::InvalidCondition {
            field: field.to_string(),
            reason: format!("must be between 1 and {MAX_WINDOW}, got {value}"),
        });
    }
    Ok(value)
}

// ── Shared fragments ────────────────────────────────────────────────

/// `bars AS (...)` for the scan date only.
fn bars_for_day(w: &mut SqlWriter, scope: &Scope<'_>) {
    w.push("WITH bars AS (\n")
        .push(&bars_select(scope.relation))
        .push("  WHERE CAST(timestamp AS DATE) = CAST(")
        .bind(scope.scan_date.as_str())
        .push(" AS DATE)");
    symbol_filters(w, scope);
    w.push("\n)");
}

/// `bars AS (...)` for the scan date and `days` calendar days before it.
fn bars_for_history(w: &mut SqlWriter, scope: &Scope<'_>, days: u32) {
    w.push("WITH bars AS (\n")
        .push(&bars_select(scope.relation))
        .push("  WHERE CAST(timestamp AS DATE) BETWEEN CAST(")
        .bind(scope.scan_date.as_str())
        .push(&format!(" AS DATE) - {days} AND CAST("))
        .bind(scope.scan_date.as_str())
        .push(" AS DATE)");
    symbol_filters(w, scope);
    w.push("\n)");
}

fn bars_select(relation: &str) -> String {
    format!(
        "  SELECT symbol, timestamp, CAST(timestamp AS DATE) AS trade_day,
         CAST(open AS DOUBLE) AS open, CAST(high AS DOUBLE) AS high,
         CAST(low AS DOUBLE) AS low, CAST(close AS DOUBLE) AS close,
         CAST(volume AS DOUBLE) AS volume,
         {TOD_EXPR} AS tod
  FROM {relation}
"
    )
}

fn symbol_filters(w: &mut SqlWriter, scope: &Scope<'_>) {
    if !scope.symbols.is_empty() {
        w.push("\n    AND symbol IN ").bind_list(&scope.symbols);
    }
    if !scope.excluded.is_empty() {
        w.push("\n    AND symbol NOT IN ").bind_list(&scope.excluded);
    }
}

/// Opens the final select: the shape projection of `candidates` filtered
/// to `tod BETWEEN ? AND ?`, ranked per symbol by `pick`. Threshold and
/// market filters are appended to the inner `WHERE`; [`keep_first`]
/// closes the nesting.
///
/// No `QUALIFY`: DuckDB raises an internal cast error for a window
/// qualifier over this filtered projection.
fn select_candidates(w: &mut SqlWriter, shape: RowShape, scope: &Scope<'_>, pick: &str) {
    let projection = shape
        .projection()
        .into_iter()
        .map(|(alias, expr)| {
            if alias == expr {
                alias.to_string()
            } else {
                format!("{expr} AS {alias}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    w.push(&format!(
        "\nSELECT * EXCLUDE (pick_rank)\nFROM (\n  \
         SELECT *, ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY {pick}) AS pick_rank\n  \
         FROM (\n    SELECT "
    ))
    .push(&projection)
    .push("\n    FROM candidates\n    WHERE tod BETWEEN ")
    .bind(scope.start_secs as i64)
    .push(" AND ")
    .bind(scope.end_secs as i64);
}

fn market_filters(w: &mut SqlWriter, scope: &Scope<'_>) {
    if let Some(v) = scope.min_price {
        w.push("\n  AND close >= ").bind(v);
    }
    if let Some(v) = scope.max_price {
        w.push("\n  AND close <= ").bind(v);
    }
    if let Some(v) = scope.min_volume {
        w.push("\n  AND volume >= ").bind(v);
    }
}

fn keep_first(w: &mut SqlWriter, order: &str) {
    w.push(&format!("\n  ) matched\n) picked\nWHERE pick_rank = 1\nORDER BY {order}"));
}

// ── Breakout ────────────────────────────────────────────────────────

fn breakout(
    w: &mut SqlWriter,
    scope: &Scope<'_>,
    c: &BreakoutConditions,
) -> Result<(), CompileError> {
    let lookback = window_size("breakout.lookback_bars", c.lookback_bars)?;

    bars_for_day(w, scope);
    w.push(",\nflagged AS (\n  SELECT *, tod <= CAST(")
        .bind(scope.end_secs as i64)
        .push(" AS BIGINT) AS before_cutoff\n  FROM bars\n)");
    w.push(&format!(
        ",
ranked AS (
  SELECT *,
         AVG(close) OVER lookback AS avg_price,
         AVG(volume) OVER lookback AS avg_volume,
         ROW_NUMBER() OVER (PARTITION BY symbol ORDER BY timestamp DESC) AS eod_rank,
         ROW_NUMBER() OVER (PARTITION BY symbol, before_cutoff
                            ORDER BY timestamp DESC) AS cutoff_rank
  FROM flagged
  WINDOW lookback AS (PARTITION BY symbol ORDER BY timestamp
                      ROWS BETWEEN {lookback} PRECEDING AND 1 PRECEDING)
),
snapshots AS (
  SELECT *,
         MAX(CASE WHEN eod_rank = 1 THEN close END)
             OVER (PARTITION BY symbol) AS eod_price,
         MAX(CASE WHEN before_cutoff AND cutoff_rank = 1 THEN close END)
             OVER (PARTITION BY symbol) AS cutoff_price
  FROM ranked
),
candidates AS (
  SELECT symbol, timestamp, tod, close, volume, avg_price, avg_volume,
         (close - avg_price) / NULLIF(avg_price, 0) * 100.0 AS breakout_pct,
         volume / NULLIF(avg_volume, 0) AS volume_multiplier,
         cutoff_price, eod_price,
         (eod_price - cutoff_price) / NULLIF(cutoff_price, 0) * 100.0 AS performance_pct
  FROM snapshots
  WHERE avg_price IS NOT NULL
)"
    ));

    select_candidates(w, RowShape::Breakout, scope, "timestamp");
    w.push("\n  AND breakout_pct >= ").bind(c.min_price_move_pct);
    if let Some(max) = c.max_price_move_pct {
        w.push("\n  AND breakout_pct <= ").bind(max);
    }
    w.push("\n  AND volume_multiplier >= ").bind(c.min_volume_multiplier);
    market_filters(w, scope);
    keep_first(w, "breakout_pct DESC, symbol");
    Ok(())
}

// ── Consolidation ───────────────────────────────────────────────────

fn consolidation(
    w: &mut SqlWriter,
    scope: &Scope<'_>,
    c: &ConsolidationConditions,
) -> Result<(), CompileError> {
    let days = window_size("consolidation.lookback_days", c.lookback_days)?;
    if c.max_range_pct <= 0.0 || c.momentum_target_pct <= 0.0 {
        return Err(CompileError::InvalidCondition {
            field: "consolidation".to_string(),
            reason: "max_range_pct and momentum_target_pct must be positive".to_string(),
        });
    }

    bars_for_history(w, scope, days);
    w.push(",\nday_flags AS (\n  SELECT *, trade_day = CAST(")
        .bind(scope.scan_date.as_str())
        .push(" AS DATE) AS is_scan_day\n  FROM bars\n),");
    w.push("\nflagged AS (\n  SELECT *,\n         is_scan_day AND tod BETWEEN CAST(")
        .bind(scope.start_secs as i64)
        .push(" AS BIGINT) AND CAST(")
        .bind(scope.end_secs as i64)
        .push(" AS BIGINT) AS in_window,\n         NOT is_scan_day OR tod <= CAST(")
        .bind(scope.end_secs as i64)
        .push(" AS BIGINT) AS in_range\n  FROM day_flags\n),");
    w.push(
        "
ordered AS (
  SELECT *,
         ROW_NUMBER() OVER (PARTITION BY symbol, in_window ORDER BY timestamp DESC) AS last_rank,
         ROW_NUMBER() OVER (PARTITION BY symbol, in_window ORDER BY timestamp) AS first_rank
  FROM flagged
),
per_symbol AS (
  SELECT symbol,
         MAX(CASE WHEN in_window AND last_rank = 1 THEN timestamp END) AS last_ts,
         MAX(CASE WHEN in_window AND last_rank = 1 THEN close END) AS last_close,
         MAX(CASE WHEN in_window AND first_rank = 1 THEN open END) AS day_open,
         SUM(CASE WHEN in_window THEN volume ELSE 0.0 END) AS day_volume,
         MAX(CASE WHEN in_range THEN high END) AS range_high,
         MIN(CASE WHEN in_range THEN low END) AS range_low,
         SUM(CASE WHEN is_scan_day THEN 0.0 ELSE volume END) AS prior_volume,
         COUNT(DISTINCT CASE WHEN is_scan_day THEN NULL ELSE trade_day END) AS prior_days
  FROM ordered
  GROUP BY symbol
),",
    );
    w.push(&format!(
        "
scored AS (
  SELECT symbol, last_ts AS timestamp, {} AS tod,
         last_close AS close, day_volume AS volume, range_high, range_low,
         (range_high - range_low) / NULLIF(range_low, 0) * 100.0 AS range_pct,
         day_volume / NULLIF(prior_volume / NULLIF(prior_days, 0), 0) AS relative_volume,
         (last_close - day_open) / NULLIF(day_open, 0) * 100.0 AS day_change_pct
  FROM per_symbol
  WHERE last_ts IS NOT NULL
),",
        TOD_EXPR.replace("timestamp", "last_ts")
    ));

    // Each component is clamped to [0, 1].
    w.push(
        "
components AS (
  SELECT *,
         COALESCE(LEAST(1.0, GREATEST(0.0,
             (close - range_low) / NULLIF(range_high - range_low, 0))), 0.0) AS closeness_score,
         COALESCE(LEAST(1.0, GREATEST(0.0, 1.0 - range_pct / ",
    )
    .bind(c.max_range_pct)
    .push(")), 0.0) AS tightness_score,\n         CASE WHEN relative_volume >= ")
    .bind(c.high_volume_tier)
    .push(" THEN 1.0 WHEN relative_volume >= ")
    .bind(c.mid_volume_tier)
    .push(
        " THEN 0.6 WHEN relative_volume >= 1.0 THEN 0.3 ELSE 0.0 END AS volume_score,
         COALESCE(LEAST(1.0, GREATEST(0.0, day_change_pct / ",
    )
    .bind(c.momentum_target_pct)
    .push(")), 0.0) AS momentum_score\n  FROM scored\n),");
    w.push("\ntotals AS (\n  SELECT *, ")
        .bind(c.weights.closeness)
        .push(" * closeness_score + ")
        .bind(c.weights.tightness)
        .push(" * tightness_score + ")
        .bind(c.weights.volume)
        .push(" * volume_score + ")
        .bind(c.weights.momentum)
        .push(" * momentum_score AS total_score\n  FROM components\n),");
    w.push(
        "
candidates AS (
  SELECT *, 1.0 / (1.0 + EXP(-10.0 * (total_score - 0.5))) AS probability_score
  FROM totals
)",
    );

    select_candidates(w, RowShape::Consolidation, scope, "timestamp DESC");
    w.push("\n  AND total_score >= ")
        .bind(c.min_total_score)
        .push("\n  AND probability_score >= ")
        .bind(c.min_probability);
    market_filters(w, scope);
    keep_first(w, "probability_score DESC, symbol");
    Ok(())
}

// ── Technical / momentum ────────────────────────────────────────────

fn technical(
    w: &mut SqlWriter,
    scope: &Scope<'_>,
    c: &TechnicalConditions,
) -> Result<(), CompileError> {
    let rsi = window_size("technical.rsi_period", c.rsi_period)?;
    let fast = window_size("technical.fast_period", c.fast_period)?;
    let slow = window_size("technical.slow_period", c.slow_period)?;
    let band = window_size("technical.band_period", c.band_period)?;
    if fast >= slow {
        return Err(CompileError::InvalidCondition {
            field: "technical.fast_period".to_string(),
            reason: format!("fast_period ({fast}) must be shorter than slow_period ({slow})"),
        });
    }

    bars_for_day(w, scope);
    w.push(&format!(
        ",
deltas AS (
  SELECT *, close - LAG(close) OVER (PARTITION BY symbol ORDER BY timestamp) AS change
  FROM bars
),
indicators AS (
  SELECT *,
         AVG(CASE WHEN change IS NULL THEN NULL
                  WHEN change > 0 THEN change ELSE 0.0 END) OVER rsi_w AS avg_gain,
         AVG(CASE WHEN change IS NULL THEN NULL
                  WHEN change < 0 THEN -change ELSE 0.0 END) OVER rsi_w AS avg_loss,
         COUNT(change) OVER rsi_w AS rsi_samples,
         AVG(close) OVER fast_w AS fast_ma,
         AVG(close) OVER slow_w AS slow_ma,
         AVG(close) OVER band_w AS band_mid,
         STDDEV_POP(close) OVER band_w AS band_std
  FROM deltas
  WINDOW rsi_w AS (PARTITION BY symbol ORDER BY timestamp
                   ROWS BETWEEN {rsi_lag} PRECEDING AND CURRENT ROW),
         fast_w AS (PARTITION BY symbol ORDER BY timestamp
                    ROWS BETWEEN {fast_lag} PRECEDING AND CURRENT ROW),
         slow_w AS (PARTITION BY symbol ORDER BY timestamp
                    ROWS BETWEEN {slow_lag} PRECEDING AND CURRENT ROW),
         band_w AS (PARTITION BY symbol ORDER BY timestamp
                    ROWS BETWEEN {band_lag} PRECEDING AND CURRENT ROW)
),
oscillators AS (
  SELECT symbol, timestamp, tod, close, volume, fast_ma, slow_ma,
         CASE WHEN rsi_samples = 0 THEN NULL
              WHEN avg_loss = 0 THEN 100.0
              ELSE 100.0 - 100.0 / (1.0 + avg_gain / avg_loss) END AS rsi,
         CASE WHEN fast_ma > slow_ma THEN 'up'
              WHEN fast_ma < slow_ma THEN 'down'
              ELSE 'flat' END AS trend,
         COALESCE((close - band_mid) / NULLIF(band_std * 2.0 * ",
        rsi_lag = rsi - 1,
        fast_lag = fast - 1,
        slow_lag = slow - 1,
        band_lag = band - 1,
    ))
    .bind(c.band_width)
    .push(
        ", 0) + 0.5, 0.5) AS band_position
  FROM indicators
),
candidates AS (
  SELECT *, LEAST(1.0, ABS(rsi - 50.0) / 50.0) AS confidence
  FROM oscillators
)",
    );

    select_candidates(w, RowShape::Technical, scope, "timestamp DESC");
    if let Some(v) = c.rsi_min {
        w.push("\n  AND rsi >= ").bind(v);
    }
    if let Some(v) = c.rsi_max {
        w.push("\n  AND rsi <= ").bind(v);
    }
    if let Some(dir) = c.trend_direction {
        w.push("\n  AND trend = ").bind(dir.as_str());
    }
    if let Some(v) = c.band_position_min {
        w.push("\n  AND band_position >= ").bind(v);
    }
    if let Some(v) = c.band_position_max {
        w.push("\n  AND band_position <= ").bind(v);
    }
    market_filters(w, scope);
    keep_first(w, "symbol");
    Ok(())
}

// ── Volume ──────────────────────────────────────────────────────────

fn volume(w: &mut SqlWriter, scope: &Scope<'_>, c: &VolumeConditions) -> Result<(), CompileError> {
    let short = window_size("volume.short_window", c.short_window)?;
    let long = window_size("volume.long_window", c.long_window)?;
    if short >= long {
        return Err(CompileError::InvalidCondition {
            field: "volume.short_window".to_string(),
            reason: format!("short_window ({short}) must be shorter than long_window ({long})"),
        });
    }

    bars_for_day(w, scope);
    w.push(&format!(
        ",
rolled AS (
  SELECT *,
         AVG(volume) OVER (PARTITION BY symbol ORDER BY timestamp
                           ROWS BETWEEN {short_lag} PRECEDING AND CURRENT ROW) AS short_avg_volume,
         AVG(volume) OVER (PARTITION BY symbol ORDER BY timestamp
                           ROWS BETWEEN {long} PRECEDING AND 1 PRECEDING) AS long_avg_volume,
         LAG(volume, {short}) OVER (PARTITION BY symbol ORDER BY timestamp) AS prior_volume
  FROM bars
),
candidates AS (
  SELECT symbol, timestamp, tod, close, volume, short_avg_volume, long_avg_volume,
         short_avg_volume / NULLIF(long_avg_volume, 0) AS relative_volume,
         (volume - prior_volume) / NULLIF(prior_volume, 0) * 100.0 AS volume_change_pct,
         CASE WHEN short_avg_volume > long_avg_volume THEN 'increasing'
              WHEN short_avg_volume < long_avg_volume THEN 'decreasing'
              ELSE 'flat' END AS volume_trend,
         LEAST(1.0, short_avg_volume / NULLIF(long_avg_volume, 0) / 4.0) AS confidence
  FROM rolled
  WHERE long_avg_volume IS NOT NULL
)",
        short_lag = short - 1,
    ));

    select_candidates(w, RowShape::Volume, scope, "relative_volume DESC, timestamp");
    w.push("\n  AND relative_volume >= ").bind(c.min_relative_volume);
    if let Some(v) = c.min_volume_change_pct {
        w.push("\n  AND volume_change_pct >= ").bind(v);
    }
    if let Some(trend) = c.trend {
        w.push("\n  AND volume_trend = ").bind(trend.as_str());
    }
    market_filters(w, scope);
    keep_first(w, "relative_volume DESC, symbol");
    Ok(())
}

// ── Custom ──────────────────────────────────────────────────────────

fn custom(w: &mut SqlWriter, scope: &Scope<'_>) {
    bars_for_day(w, scope);
    w.push(
        ",
candidates AS (
  SELECT symbol, timestamp, tod, close, volume
  FROM bars
)",
    );
    select_candidates(w, RowShape::Custom, scope, "timestamp DESC");
    market_filters(w, scope);
    keep_first(w, "symbol");
}
