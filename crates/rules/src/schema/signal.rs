//! Signals produced by matched rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::SignalType;

/// Price levels derived from the rule's action percentages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskManagement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
}

/// One trading recommendation. Immutable once generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub signal_id: Uuid,
    pub symbol: String,
    pub rule_id: String,
    pub signal_type: SignalType,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub price: f64,
    pub volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskManagement>,
    /// Row values and rule annotations at generation time.
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}
