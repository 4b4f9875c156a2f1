//! Rule and signal types with serde deserialization.
//!
//! - `Rule`: the declarative record loaded from YAML/JSON
//! - `RuleConditions`: per-category threshold blocks with defaults
//! - `Signal`: the output of a matched row

mod conditions;
mod kind;
mod rule;
mod signal;

pub use conditions::*;
pub use kind::*;
pub use rule::*;
pub use signal::*;
