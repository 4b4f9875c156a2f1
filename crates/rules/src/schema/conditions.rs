//! Condition blocks consumed by the query templates.
//!
//! Every block has serde defaults so a rule only needs to spell out the
//! thresholds it cares about.

use serde::{Deserialize, Serialize};

/// All condition blocks a rule may carry. Only the block matching the
/// rule's type (plus `time_window` and `market_filters`) is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleConditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakout: Option<BreakoutConditions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationConditions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical: Option<TechnicalConditions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeConditions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_filters: Option<MarketFilters>,
}

/// Intraday window as `HH:MM` or `HH:MM:SS` strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

// ── Breakout ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakoutConditions {
    /// Bars in the trailing average (excluding the current bar).
    pub lookback_bars: u32,
    /// Minimum % move of close over the trailing average price.
    pub min_price_move_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_move_pct: Option<f64>,
    /// Minimum ratio of bar volume to trailing average volume.
    pub min_volume_multiplier: f64,
}

impl Default for BreakoutConditions {
    fn default() -> Self {
        Self {
            lookback_bars: 10,
            min_price_move_pct: 0.5,
            max_price_move_pct: None,
            min_volume_multiplier: 1.5,
        }
    }
}

// ── Consolidation ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsolidationConditions {
    /// Calendar days of history feeding the range high/low.
    pub lookback_days: u32,
    /// Range width (% of range low) at which tightness scores zero.
    pub max_range_pct: f64,
    /// Relative volume scoring 1.0.
    pub high_volume_tier: f64,
    /// Relative volume scoring 0.6.
    pub mid_volume_tier: f64,
    /// Day change % at which momentum saturates.
    pub momentum_target_pct: f64,
    pub weights: ScoreWeights,
    pub min_total_score: f64,
    pub min_probability: f64,
}

impl Default for ConsolidationConditions {
    fn default() -> Self {
        Self {
            lookback_days: 20,
            max_range_pct: 10.0,
            high_volume_tier: 2.0,
            mid_volume_tier: 1.5,
            momentum_target_pct: 2.0,
            weights: ScoreWeights::default(),
            min_total_score: 0.6,
            min_probability: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoreWeights {
    pub closeness: f64,
    pub tightness: f64,
    pub volume: f64,
    pub momentum: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.closeness + self.tightness + self.volume + self.momentum
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            closeness: 0.3,
            tightness: 0.3,
            volume: 0.2,
            momentum: 0.2,
        }
    }
}

// ── Technical / momentum ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Flat => "flat",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TechnicalConditions {
    pub rsi_period: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_max: Option<f64>,
    pub fast_period: u32,
    pub slow_period: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_direction: Option<TrendDirection>,
    pub band_period: u32,
    /// Band half-width in standard deviations.
    pub band_width: f64,
    /// Position inside the band, 0.0 = lower band, 1.0 = upper band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_position_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_position_max: Option<f64>,
}

impl Default for TechnicalConditions {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_min: None,
            rsi_max: None,
            fast_period: 5,
            slow_period: 20,
            trend_direction: None,
            band_period: 20,
            band_width: 2.0,
            band_position_min: None,
            band_position_max: None,
        }
    }
}

// ── Volume ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Flat,
}

impl VolumeTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeTrend::Increasing => "increasing",
            VolumeTrend::Decreasing => "decreasing",
            VolumeTrend::Flat => "flat",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeConditions {
    pub short_window: u32,
    pub long_window: u32,
    /// Minimum short-window average over long-window average.
    pub min_relative_volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_volume_change_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<VolumeTrend>,
}

impl Default for VolumeConditions {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
            min_relative_volume: 1.5,
            min_volume_change_pct: None,
            trend: None,
        }
    }
}

// ── Market filters ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_volume: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_symbols: Vec<String>,
}
