//! Fixed result-row layouts, one per template.

use serde::Serialize;

use crate::schema::RuleType;

/// Columns every shape starts with, in order.
pub const BASE_COLUMNS: [&str; 4] = ["symbol", "timestamp", "price", "volume"];

/// Layout of the rows a compiled query returns. Resolved from the rule
/// type at compile time; the mapper reads columns by these names only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowShape {
    Breakout,
    Consolidation,
    Technical,
    Volume,
    Custom,
}

impl RowShape {
    pub fn for_rule_type(rule_type: RuleType) -> Self {
        match rule_type {
            RuleType::Breakout => RowShape::Breakout,
            RuleType::ConsolidationPattern => RowShape::Consolidation,
            RuleType::Technical | RuleType::Momentum => RowShape::Technical,
            RuleType::Volume => RowShape::Volume,
            RuleType::Custom => RowShape::Custom,
        }
    }

    /// Template-specific columns following [`BASE_COLUMNS`].
    pub fn metric_columns(&self) -> &'static [&'static str] {
        match self {
            RowShape::Breakout => &[
                "avg_price",
                "avg_volume",
                "breakout_pct",
                "volume_multiplier",
                "cutoff_price",
                "eod_price",
                "performance_pct",
            ],
            RowShape::Consolidation => &[
                "range_high",
                "range_low",
                "range_pct",
                "relative_volume",
                "closeness_score",
                "tightness_score",
                "volume_score",
                "momentum_score",
                "total_score",
                "probability_score",
            ],
            RowShape::Technical => &[
                "rsi",
                "fast_ma",
                "slow_ma",
                "trend",
                "band_position",
                "confidence",
            ],
            RowShape::Volume => &[
                "short_avg_volume",
                "long_avg_volume",
                "relative_volume",
                "volume_change_pct",
                "volume_trend",
                "confidence",
            ],
            RowShape::Custom => &[],
        }
    }

    /// Every output column in select order.
    pub fn columns(&self) -> Vec<&'static str> {
        BASE_COLUMNS
            .iter()
            .chain(self.metric_columns())
            .copied()
            .collect()
    }

    /// `(alias, expression)` pairs selected from the `candidates` relation.
    pub fn projection(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("symbol", "symbol".to_string()),
            ("timestamp", "CAST(timestamp AS VARCHAR)".to_string()),
            ("price", "close".to_string()),
            ("volume", "CAST(ROUND(volume) AS BIGINT)".to_string()),
        ];
        out.extend(self.metric_columns().iter().map(|c| (*c, c.to_string())));
        out
    }
}
