//! Rule type enum selecting the query template.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported rule categories. Each maps to one query template and one
/// result row shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    Breakout,
    #[serde(alias = "consolidation_pattern", alias = "consolidation")]
    ConsolidationPattern,
    Technical,
    Volume,
    Momentum,
    Custom,
}

impl RuleType {
    pub const ALL: [RuleType; 6] = [
        RuleType::Breakout,
        RuleType::ConsolidationPattern,
        RuleType::Technical,
        RuleType::Volume,
        RuleType::Momentum,
        RuleType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Breakout => "breakout",
            RuleType::ConsolidationPattern => "consolidation-pattern",
            RuleType::Technical => "technical",
            RuleType::Volume => "volume",
            RuleType::Momentum => "momentum",
            RuleType::Custom => "custom",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "breakout" => Ok(RuleType::Breakout),
            "consolidation-pattern" | "consolidation_pattern" | "consolidation" => {
                Ok(RuleType::ConsolidationPattern)
            }
            "technical" => Ok(RuleType::Technical),
            "volume" => Ok(RuleType::Volume),
            "momentum" => Ok(RuleType::Momentum),
            "custom" => Ok(RuleType::Custom),
            other => Err(format!("unknown rule type: '{}'", other)),
        }
    }
}
