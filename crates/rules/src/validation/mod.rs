//! Rule validation with structured errors and warnings.
//!
//! The engine only depends on the [`RuleValidator`] trait; the standard
//! implementation checks ids, windows and the thresholds of the condition
//! block matching the rule type. Errors reject the rule, warnings are
//! advisory.

mod checks;

pub(crate) mod fuzzy;

pub(crate) use checks::MAX_WINDOW;

use serde::{Deserialize, Serialize};

use crate::schema::Rule;

// ── Result types ────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// Dotted location, e.g. `"conditions.breakout.lookback_bars"`.
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    pub fn error_with_suggestion(
        &mut self,
        path: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: Some(suggestion.into()),
        });
    }

    pub fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

// ── Validator seam ──────────────────────────────────────────────────

/// Decides whether a rule may be loaded into the engine.
pub trait RuleValidator: Send + Sync {
    fn validate(&self, rule: &Rule) -> ValidationResult;
}

/// Built-in checks used when no custom validator is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRuleValidator;

impl RuleValidator for StandardRuleValidator {
    fn validate(&self, rule: &Rule) -> ValidationResult {
        validate_rule(rule)
    }
}

/// Run every standard check against `rule`.
pub fn validate_rule(rule: &Rule) -> ValidationResult {
    let mut result = ValidationResult::new();
    checks::validate_identity(rule, &mut result);
    checks::validate_time_window(rule, &mut result);
    checks::validate_category(rule, &mut result);
    checks::validate_market_filters(rule, &mut result);
    checks::validate_actions(rule, &mut result);
    result
}
