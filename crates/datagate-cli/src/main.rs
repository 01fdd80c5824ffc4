//! datagate — command-line companion to the data-access layer.
//!
//! # Usage
//!
//! ```text
//! datagate analyze "SELECT * FROM users ORDER BY id" --params '[]'
//! datagate config --config datagate.toml
//! datagate config --scaffold > datagate.toml
//! datagate check --config datagate.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use datagate::{CacheConfig, Credentials, DataGateConfig, OptimizerConfig, PoolConfig};
use datagate_query::analyze_query;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "datagate", about = "datagate data-access layer tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the static analyzer over a statement and print the result as JSON.
    Analyze {
        /// SQL statement to analyze.
        sql: String,

        /// Bound parameters as a JSON array.
        #[arg(long, default_value = "[]")]
        params: String,
    },
    /// Print the effective configuration (file plus DATAGATE_* overrides) as TOML.
    Config {
        /// Path to datagate.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print a fully populated default file instead.
        #[arg(long)]
        scaffold: bool,
    },
    /// Validate configuration and DATABASE_URL / DATABASE_API_KEY without connecting.
    Check {
        /// Path to datagate.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,datagate=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze { sql, params } => analyze(&sql, &params),
        Command::Config { config, scaffold } => print_config(config.as_deref(), scaffold),
        Command::Check { config } => check(config.as_deref()),
    }
}

fn analyze(sql: &str, params: &str) -> anyhow::Result<()> {
    let params = parse_params(params)?;
    let analysis = analyze_query(sql, &params);
    debug!(rules = analysis.suggestions.len(), risk = ?analysis.risk, "analysis complete");
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn parse_params(raw: &str) -> anyhow::Result<Vec<Value>> {
    match serde_json::from_str::<Value>(raw).context("--params must be valid JSON")? {
        Value::Array(values) => Ok(values),
        other => bail!("--params must be a JSON array, got {other}"),
    }
}

/// Load the file (if any) and apply DATAGATE_* environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<DataGateConfig> {
    let mut config = match path {
        Some(path) => DataGateConfig::from_file(path)?,
        None => DataGateConfig::default(),
    };
    config.apply_process_env()?;
    Ok(config)
}

fn print_config(path: Option<&Path>, scaffold: bool) -> anyhow::Result<()> {
    let config = if scaffold {
        DataGateConfig::scaffold()
    } else {
        load_config(path)?
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn check(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;

    let pool = PoolConfig::from_settings(&config.pool);
    pool.validate().context("invalid [pool] section")?;
    let cache = CacheConfig::from_settings(&config.cache);
    let optimizer = OptimizerConfig::from_settings(&config.optimizer);

    let credentials = Credentials::from_env();
    credentials.validate().context("database credentials")?;

    info!(
        pool_min = pool.min,
        pool_max = pool.max,
        cache_max_memory = cache.max_memory_size,
        cache_eviction_target = cache.eviction_target(),
        slow_query_threshold = ?optimizer.slow_query_threshold,
        url = %credentials.url,
        "configuration ok"
    );
    println!("ok");
    Ok(())
}
