//! The rule record and its action block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::conditions::RuleConditions;
use super::kind::RuleType;

/// A declarative scan rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub rule_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rule_type: RuleType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher runs first when no explicit rule list is given.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default)]
    pub actions: RuleActions,
    /// Free-form annotations copied into every signal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Rule {
    /// Minimal enabled rule with default conditions.
    pub fn new(rule_id: impl Into<String>, rule_type: RuleType) -> Self {
        let rule_id = rule_id.into();
        Self {
            name: rule_id.clone(),
            rule_id,
            description: None,
            rule_type,
            enabled: true,
            priority: 0,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.rule_id
        } else {
            &self.name
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    #[default]
    Buy,
    Sell,
    Watch,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "buy",
            SignalType::Sell => "sell",
            SignalType::Watch => "watch",
        }
    }
}

/// What a match turns into.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleActions {
    pub signal_type: SignalType,
    /// Stop-loss distance from entry, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<f64>,
    /// Take-profit distance from entry, in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<f64>,
}
