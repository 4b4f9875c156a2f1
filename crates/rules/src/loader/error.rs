//! Error types and load result structures for the rule loader.

use std::path::PathBuf;

use serde::Serialize;

/// Errors that can occur while reading rule files.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parsed, but not a rule document (empty file, blank id, scalar root).
    #[error("invalid rule file: {0}")]
    Invalid(String),

    #[error("rules directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
}

/// Result alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Outcome of loading a single rule file.
#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

/// Status of a single file load attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    /// Every listed rule was parsed.
    Loaded { rule_ids: Vec<String> },
    /// File was skipped (dotfile, other extension, empty).
    Skipped { reason: String },
    /// Parse error; nothing from this file was kept.
    Failed { error: String },
}
