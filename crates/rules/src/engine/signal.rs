//! Turning matched rows into signals.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::{RiskManagement, Rule, Signal, SignalType};

/// A mapped row, ready to become a signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    /// Already clamped to `[0, 1]`.
    pub confidence: f64,
    pub metadata: BTreeMap<String, Value>,
}

/// Builds the final [`Signal`] for a candidate. Swappable so callers can
/// attach their own risk model or annotations.
pub trait SignalGenerator: Send + Sync {
    fn generate(&self, rule: &Rule, scan_date: &str, candidate: SignalCandidate) -> Signal;
}

/// Applies the rule's action block: signal direction plus stop-loss and
/// take-profit levels computed from the entry price.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSignalGenerator;

impl StandardSignalGenerator {
    pub fn risk_for(rule: &Rule, price: f64) -> Option<RiskManagement> {
        let actions = &rule.actions;
        let (stop_sign, take_sign) = match actions.signal_type {
            SignalType::Buy => (-1.0, 1.0),
            SignalType::Sell => (1.0, -1.0),
            SignalType::Watch => return None,
        };
        let stop_loss = actions
            .stop_loss_pct
            .map(|pct| price * (1.0 + stop_sign * pct / 100.0));
        let take_profit = actions
            .take_profit_pct
            .map(|pct| price * (1.0 + take_sign * pct / 100.0));
        if stop_loss.is_none() && take_profit.is_none() {
            return None;
        }
        Some(RiskManagement {
            stop_loss,
            take_profit,
        })
    }
}

impl SignalGenerator for StandardSignalGenerator {
    fn generate(&self, rule: &Rule, scan_date: &str, candidate: SignalCandidate) -> Signal {
        let mut metadata = candidate.metadata;
        metadata.insert("rule_name".into(), Value::from(rule.display_name()));
        metadata.insert("rule_type".into(), Value::from(rule.rule_type.as_str()));
        metadata.insert("scan_date".into(), Value::from(scan_date));
        for (key, value) in &rule.metadata {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }

        Signal {
            signal_id: Uuid::new_v4(),
            risk: Self::risk_for(rule, candidate.price),
            symbol: candidate.symbol,
            rule_id: rule.rule_id.clone(),
            signal_type: rule.actions.signal_type,
            confidence: candidate.confidence,
            price: candidate.price,
            volume: candidate.volume,
            metadata,
            generated_at: Utc::now(),
        }
    }
}
