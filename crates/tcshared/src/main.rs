//! tcshared: TummyCrypt Share server
//!
//! Usage:
//!   tcshared [--config /etc/tcshare/config.toml] [--log info] [--log-format text]
//!
//! Stores encrypted uploads it cannot read. Clients stream segments over the
//! upload channel and fetch byte ranges back over HTTP.

mod daemon;
mod http;
mod metrics;
mod upload;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use tcshare_core::config::TcshareConfig;

#[derive(Parser, Debug)]
#[command(name = "tcshared", version, about = "TummyCrypt Share server")]
struct Cli {
    /// Path to tcshare.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TCSHARE_CONFIG",
        default_value = "/etc/tcshare/config.toml"
    )]
    config: PathBuf,

    /// Log filter; overrides daemon.log_level (RUST_LOG wins over both)
    #[arg(long, env = "TCSHARE_LOG")]
    log: Option<String>,

    /// Log format; overrides daemon.log_format
    #[arg(long, env = "TCSHARE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Unknown names in the config file fall back to text.
    fn from_config(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging depends on the config, so a missing file is reported after init
    let (config, found) = load_config(&cli.config).await?;
    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(level, format);

    if !found {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tcshared starting"
    );

    daemon::run(config).await
}

/// The parsed config and whether it came from a file.
async fn load_config(path: &Path) -> Result<(TcshareConfig, bool)> {
    if !path.exists() {
        return Ok((TcshareConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, true))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}
