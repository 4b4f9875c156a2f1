//! rules-scan — run one market scan over a rules directory.
//!
//! Loads configuration from the environment (and `.env`), loads every rule
//! file under the rules directory, optionally initializes the bars schema,
//! runs a cached scan with retries and prints the result as JSON on stdout.
//! Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use quantscan_core::config::{load_dotenv, Config};
use quantscan_rules::loader::LoadStatus;
use quantscan_rules::{ExecutionPipeline, ScanRequest};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run rule-driven market scans against DuckDB.
#[derive(Parser, Debug)]
#[command(name = "rules-scan", version, about)]
struct Cli {
    /// Trading day to scan (YYYY-MM-DD).
    #[arg(long, env = "SCAN_DATE")]
    date: String,

    /// Rules directory. Defaults to SCAN_RULES_DIR.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Only run these rule ids (repeatable). Default: every enabled rule.
    #[arg(long = "rule")]
    rules: Vec<String>,

    /// Window start, HH:MM[:SS].
    #[arg(long)]
    start: Option<String>,

    /// Window end (cutoff), HH:MM[:SS].
    #[arg(long)]
    end: Option<String>,

    /// Comma-separated symbol list.
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Keep only the N most confident signals per rule.
    #[arg(long)]
    max_results: Option<usize>,

    /// Run rules one after another instead of on the worker pool.
    #[arg(long)]
    sequential: bool,

    /// Do not create the bars table, index or dataset view.
    #[arg(long)]
    skip_schema: bool,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn request(&self) -> ScanRequest {
        ScanRequest {
            scan_date: self.date.clone(),
            start_time: self.start.clone(),
            end_time: self.end.clone(),
            symbols: (!self.symbols.is_empty()).then(|| self.symbols.clone()),
            rule_ids: (!self.rules.is_empty()).then(|| self.rules.clone()),
            parallel: !self.sequential,
            max_results: self.max_results,
        }
    }
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let pipeline = ExecutionPipeline::from_config(&config).context("failed to open storage")?;
    if !cli.skip_schema {
        pipeline
            .initialize_schema()
            .context("schema initialization failed")?;
    }

    let report = pipeline
        .load_rules_from_directory(cli.rules_dir.as_deref())
        .context("failed to load rules")?;
    for file in &report.files {
        if let LoadStatus::Failed { error } = &file.status {
            warn!(path = %file.path.display(), error = %error, "rule file not loaded");
        }
    }
    if report.rules.loaded == 0 {
        anyhow::bail!("no valid rules found in {}", report.directory.display());
    }

    let response = pipeline.scan(&cli.request())?;
    info!(
        signals = response.result.batch.total_signals,
        failed = response.result.batch.failed_executions,
        attempts = response.result.attempts,
        "scan finished"
    );

    let json = if cli.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{json}");

    pipeline.close();
    Ok(())
}
