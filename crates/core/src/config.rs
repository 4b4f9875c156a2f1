use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `QUANTSCAN_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("QUANTSCAN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            database: DatabaseConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  database:  path={}, pool={}, memory_limit={}, threads={}",
            self.database.path,
            self.database.max_connections,
            self.database.memory_limit,
            self.database.threads
        );
        tracing::info!(
            "  source:    table={}, dataset_glob={}",
            self.database.source_table,
            self.database.dataset_glob.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  engine:    workers={}, query_cache={}",
            self.engine.max_workers,
            self.engine.query_cache_capacity
        );
        tracing::info!(
            "  cache:     ttl={}s, capacity={}",
            self.cache.ttl_secs,
            self.cache.capacity
        );
        tracing::info!(
            "  pipeline:  rules_dir={}, max_retries={}",
            self.pipeline.rules_dir.display(),
            self.pipeline.max_retries
        );
    }
}

// ── Database ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// DuckDB file path, or `:memory:` for an in-process database.
    pub path: String,
    /// Upper bound on pooled connections.
    pub max_connections: usize,
    /// Session `memory_limit` (e.g. "2GB").
    pub memory_limit: String,
    /// Session `threads`.
    pub threads: u32,
    /// Session `enable_object_cache`.
    pub object_cache: bool,
    /// Persisted table holding intraday bars.
    pub source_table: String,
    /// Optional Parquet glob unioned with the persisted table.
    pub dataset_glob: Option<String>,
}

impl DatabaseConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            path: profiled_env_or(p, "SCAN_DB_PATH", &d.path),
            max_connections: profiled_env_parse(p, "SCAN_POOL_MAX_CONNECTIONS", d.max_connections),
            memory_limit: profiled_env_or(p, "SCAN_DB_MEMORY_LIMIT", &d.memory_limit),
            threads: profiled_env_parse(p, "SCAN_DB_THREADS", d.threads),
            object_cache: profiled_env_bool(p, "SCAN_DB_OBJECT_CACHE", d.object_cache),
            source_table: profiled_env_or(p, "SCAN_SOURCE_TABLE", &d.source_table),
            dataset_glob: profiled_env_opt(p, "SCAN_DATASET_GLOB"),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:"
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            max_connections: 8,
            memory_limit: "2GB".to_string(),
            threads: 4,
            object_cache: true,
            source_table: "market_data".to_string(),
            dataset_glob: None,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for parallel batches. Clamped to the pool size.
    pub max_workers: usize,
    /// Compiled-query cache capacity (FIFO eviction).
    pub query_cache_capacity: usize,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_workers: profiled_env_parse(p, "SCAN_MAX_WORKERS", d.max_workers),
            query_cache_capacity: profiled_env_parse(
                p,
                "SCAN_QUERY_CACHE_CAPACITY",
                d.query_cache_capacity,
            ),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            query_cache_capacity: 256,
        }
    }
}

// ── Result cache ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Maximum live entries; 0 disables the bound.
    pub capacity: usize,
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            ttl_secs: profiled_env_parse(p, "SCAN_RESULT_CACHE_TTL_SECS", d.ttl_secs),
            capacity: profiled_env_parse(p, "SCAN_RESULT_CACHE_CAPACITY", d.capacity),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 1024,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub rules_dir: PathBuf,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            rules_dir: PathBuf::from(profiled_env_or(p, "SCAN_RULES_DIR", "data/rules")),
            max_retries: profiled_env_parse(p, "SCAN_MAX_RETRIES", d.max_retries),
            retry_delay_ms: profiled_env_parse(p, "SCAN_RETRY_DELAY_MS", d.retry_delay_ms),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("data/rules"),
            max_retries: 2,
            retry_delay_ms: 0,
        }
    }
}
