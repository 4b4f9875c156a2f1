//! Core [`RuleLoader`] struct: filesystem-backed rule loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::schema::Rule;

use super::error::{LoadResult, LoadStatus, LoaderError, Result};

/// Rules read from a directory, plus the per-file outcome.
#[derive(Debug, Default)]
pub struct LoadedRules {
    /// Parsed rules in file order, first definition of each id only.
    pub rules: Vec<Rule>,
    pub files: Vec<LoadResult>,
    /// `(rule_id, path)` of definitions dropped because the id was
    /// already defined by an earlier file.
    pub duplicates: Vec<(String, PathBuf)>,
}

impl LoadedRules {
    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, LoadStatus::Failed { .. }))
            .count()
    }
}

/// Reads rule files from one directory tree.
pub struct RuleLoader {
    rules_dir: PathBuf,
}

impl RuleLoader {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Recursively scan the rules directory.
    ///
    /// Dotfiles and other extensions are skipped. Entries are visited in
    /// name order so duplicate resolution is deterministic. Parse errors
    /// are reported per file and do not abort the scan.
    pub fn load_all(&self) -> Result<LoadedRules> {
        if !self.rules_dir.is_dir() {
            return Err(LoaderError::MissingDirectory(self.rules_dir.clone()));
        }
        let mut loaded = LoadedRules::default();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        self.scan_dir_recursive(&self.rules_dir, &mut loaded, &mut seen)?;
        info!(
            path = %self.rules_dir.display(),
            rules = loaded.rules.len(),
            files = loaded.files.len(),
            failed = loaded.failed_files(),
            "scanned rules directory"
        );
        Ok(loaded)
    }

    fn scan_dir_recursive(
        &self,
        dir: &Path,
        loaded: &mut LoadedRules,
        seen: &mut HashMap<String, PathBuf>,
    ) -> Result<()> {
        let mut entries = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for path in entries {
            // Skip dotfiles/dotdirs
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        loaded.files.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, loaded, seen)?;
                continue;
            }

            if RuleFormat::of(&path).is_none() {
                loaded.files.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a rule file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok(rules) if rules.is_empty() => {
                    loaded.files.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "empty file".to_string(),
                        },
                    });
                }
                Ok(rules) => {
                    let mut rule_ids = Vec::with_capacity(rules.len());
                    for rule in rules {
                        if let Some(first) = seen.get(&rule.rule_id) {
                            warn!(
                                rule_id = %rule.rule_id,
                                path = %path.display(),
                                first = %first.display(),
                                "duplicate rule id, keeping first definition"
                            );
                            loaded.duplicates.push((rule.rule_id, path.clone()));
                            continue;
                        }
                        seen.insert(rule.rule_id.clone(), path.clone());
                        rule_ids.push(rule.rule_id.clone());
                        loaded.rules.push(rule);
                    }
                    info!(rules = ?rule_ids, path = %path.display(), "loaded rule file");
                    loaded.files.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { rule_ids },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load rule file");
                    loaded.files.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Parse one file. An empty document yields no rules.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Rule>> {
        let format = RuleFormat::of(path).ok_or_else(|| {
            LoaderError::Invalid(format!("unsupported extension: {}", path.display()))
        })?;
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rules = match format {
            RuleFormat::Yaml => parse_yaml(&contents)?,
            RuleFormat::Json => parse_json(&contents)?,
        };
        if let Some(blank) = rules.iter().position(|r| r.rule_id.trim().is_empty()) {
            return Err(LoaderError::Invalid(format!(
                "rule #{} has an empty rule_id",
                blank + 1
            )));
        }
        Ok(rules)
    }
}

#[derive(Debug, Clone, Copy)]
enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    fn of(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Some(RuleFormat::Yaml),
            Some("json") => Some(RuleFormat::Json),
            _ => None,
        }
    }
}

fn parse_yaml(contents: &str) -> Result<Vec<Rule>> {
    use serde_yaml::Value;

    let value: Value = serde_yaml::from_str(contents)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(_) => Ok(serde_yaml::from_value(value)?),
        Value::Mapping(ref map)
            if is_wrapper(map.contains_key("rules"), map.contains_key("rule_id")) =>
        {
            let rules = map.get("rules").cloned().unwrap_or(Value::Null);
            Ok(serde_yaml::from_value(rules)?)
        }
        Value::Mapping(_) => Ok(vec![serde_yaml::from_value(value)?]),
        _ => Err(LoaderError::Invalid("expected a mapping or a list of rules".into())),
    }
}

fn parse_json(contents: &str) -> Result<Vec<Rule>> {
    use serde_json::Value;

    let value: Value = serde_json::from_str(contents)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(ref map)
            if is_wrapper(map.contains_key("rules"), map.contains_key("rule_id")) =>
        {
            let rules = map.get("rules").cloned().unwrap_or(Value::Null);
            Ok(serde_json::from_value(rules)?)
        }
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => Err(LoaderError::Invalid("expected an object or an array of rules".into())),
    }
}

/// A `{ rules: [...] }` document rather than a single rule.
fn is_wrapper(has_rules: bool, has_rule_id: bool) -> bool {
    has_rules && !has_rule_id
}
