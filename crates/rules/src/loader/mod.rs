//! Filesystem rule loader.
//!
//! Scans a directory tree for `*.yml`, `*.yaml` and `*.json` files. A file
//! holds one rule, a list of rules, or a mapping with a `rules` list.
//! Validation happens later, when the rules are handed to the engine.

mod core;
mod error;


pub use self::core::{LoadedRules, RuleLoader};
pub use self::error::{LoadResult, LoadStatus, LoaderError, Result};
