pub mod config;

pub use config::{CacheConfig, Config, DatabaseConfig, EngineConfig, PipelineConfig};
